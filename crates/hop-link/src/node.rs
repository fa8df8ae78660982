//! Epoch driver for one node
//!
//! A [`LinkNode`] owns every piece of per-node link state and runs it one
//! epoch at a time:
//!
//! 1. pick the schedule for the current mode and (in FH mode) regenerate and
//!    scrub the hop sequence
//! 2. dispatch every slot, folding receive results into the MAC layer
//! 3. assess heartbeats and switch mode
//! 4. measure throughput, summarize the epoch, and step the anti-jam
//!    controller, applying whatever it asks for
//!
//! Only the control task touches this state; slot workers get owned copies
//! of what they need and hand their results back when joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hop_plan::{
    FrequencyPlan, FrequencyTable, HopPolicy, HopSequence, NetConfig, ScheduleMode, Scheduler,
    TaskAction, TimingConfig,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::allocation::SubcarrierAllocation;
use crate::anti_jam::{AntiJamAction, AntiJamConfig, AntiJamController, EpochObservation};
use crate::dispatcher::{
    task_report, BurstOutcome, SlotOutcome, SlotRequest, TaskDispatcher, TxPayload,
};
use crate::error::LinkError;
use crate::events::{AllocationSource, LinkEvent};
use crate::frame::FrameType;
use crate::frontend::{calibrate_noise_threshold, probe_tuning_defect, FrontEnd, HardwareStats};
use crate::heartbeat::HeartbeatConfig;
use crate::mac::{MacConfig, MacEvent, MacLayer, PacketStore};
use crate::modem::{ModemFactory, ModemHandle};
use crate::throughput::{BatchSummary, BatchTracker, ThroughputMeter};

/// Everything a node needs to run its link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub net: NetConfig,
    pub frequency_plan: FrequencyPlan,
    pub timing: TimingConfig,
    pub heartbeat: HeartbeatConfig,
    pub anti_jam: AntiJamConfig,
    pub mac: MacConfig,
    pub hop_policy: HopPolicy,
    /// Run the continuous multi-access schedule instead of FDD/FH
    pub continuous: bool,
    /// Seconds between computing an epoch and its first slot
    pub epoch_lead: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            frequency_plan: FrequencyPlan::default(),
            timing: TimingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            anti_jam: AntiJamConfig::default(),
            mac: MacConfig::default(),
            hop_policy: HopPolicy::default(),
            continuous: false,
            epoch_lead: 0.05,
        }
    }
}

/// Result of one epoch
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: u64,
    pub mode: ScheduleMode,
    pub slots_run: usize,
    /// Stopped early because a drain was requested
    pub drained: bool,
    pub summary: BatchSummary,
    /// Mode selected for the next epoch
    pub next_mode: ScheduleMode,
}

/// Link state machine for one node
pub struct LinkNode {
    config: LinkConfig,
    scheduler: Scheduler,
    table: FrequencyTable,
    hop: HopSequence,
    mac: MacLayer,
    dispatcher: TaskDispatcher,
    anti_jam: AntiJamController,
    meter: ThroughputMeter,
    batches: BatchTracker,
    mode: ScheduleMode,
    epoch: u64,
    started: f64,
    drain: Arc<AtomicBool>,
    events: Option<mpsc::Sender<LinkEvent>>,
}

impl LinkNode {
    /// Build the node: probe the front end, generate tables and schedules,
    /// and install the full-band allocation
    ///
    /// Any planning error here is fatal for the node.
    pub fn new(
        config: LinkConfig,
        front_end: Arc<dyn FrontEnd>,
        modem: Arc<dyn ModemFactory>,
    ) -> Result<Self, LinkError> {
        let role = config.net.role();
        let tuning_defect = probe_tuning_defect(&*front_end)?;
        let table = FrequencyTable::generate(&config.frequency_plan, role, tuning_defect)?;
        let scheduler = Scheduler::new(config.net.clone(), config.heartbeat.activity, &config.timing)?;
        let hop = HopSequence::new(
            config.hop_policy,
            scheduler.active_size(ScheduleMode::Fh),
            table.rf_len(),
            table.baseband_len(),
        )?;
        let mac = MacLayer::new(config.net.clone(), config.mac, config.heartbeat)?;
        let modem = Arc::new(ModemHandle::new(modem, SubcarrierAllocation::full_band()));
        let tx_burst_length = usize::try_from(config.timing.tx_burst_length).map_err(|_| {
            LinkError::InvalidConfig(format!(
                "burst length {} does not fit in memory",
                config.timing.tx_burst_length
            ))
        })?;
        let dispatcher = TaskDispatcher::new(
            front_end.clone(),
            modem,
            table.fdd(),
            scheduler.recommended_rx_samples(),
            tx_burst_length,
        );
        let anti_jam = AntiJamController::new(config.anti_jam.clone(), role);

        let mode = if config.continuous {
            ScheduleMode::Continuous
        } else if mac.heartbeat().selects_normal_mode() {
            ScheduleMode::Fdd
        } else {
            ScheduleMode::Fh
        };
        let started = front_end.now();

        info!(
            "Node {} ({:?}) ready: {} rf / {} baseband hop frequencies, starting in {} mode",
            config.net.node_id,
            role,
            table.rf_len(),
            table.baseband_len(),
            mode
        );
        debug!("Timing budget:\n{}", scheduler.budget());

        Ok(Self {
            config,
            scheduler,
            table,
            hop,
            mac,
            dispatcher,
            anti_jam,
            meter: ThroughputMeter::new(),
            batches: BatchTracker::default(),
            mode,
            epoch: 0,
            started,
            drain: Arc::new(AtomicBool::new(false)),
            events: None,
        })
    }

    /// Attach a packet store to the MAC layer
    pub fn with_packet_store(mut self, store: Box<dyn PacketStore>) -> Self {
        self.mac.set_packet_store(store);
        self
    }

    /// Send link events to `events`
    pub fn with_events(mut self, events: mpsc::Sender<LinkEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a drain flag with other tasks
    pub fn with_drain_flag(mut self, drain: Arc<AtomicBool>) -> Self {
        self.drain = drain;
        self
    }

    pub fn drain_flag(&self) -> Arc<AtomicBool> {
        self.drain.clone()
    }

    pub fn node_id(&self) -> u8 {
        self.config.net.node_id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn table(&self) -> &FrequencyTable {
        &self.table
    }

    pub fn hop_sequence(&self) -> &HopSequence {
        &self.hop
    }

    pub fn mac(&self) -> &MacLayer {
        &self.mac
    }

    pub fn anti_jam(&self) -> &AntiJamController {
        &self.anti_jam
    }

    pub fn hardware_stats(&self) -> &HardwareStats {
        self.dispatcher.stats()
    }

    pub fn modem(&self) -> &Arc<ModemHandle> {
        self.dispatcher.modem()
    }

    fn is_draining(&self) -> bool {
        self.drain.load(Ordering::Relaxed)
    }

    /// Tuning targets of the current mode's schedule
    pub fn task_report(&self) -> String {
        let hop = self.mode.hops().then_some(&self.hop);
        task_report(self.scheduler.schedule(self.mode), hop, &self.table)
    }

    /// Take a receive snapshot and derive the trailing-noise threshold
    pub async fn calibrate_noise(&mut self) -> Result<f32, LinkError> {
        self.scheduler.compute_test(0.0);
        let Some(task) = self.scheduler.schedule(ScheduleMode::Fdd).get(0).copied() else {
            return Ok(self.dispatcher.noise_threshold());
        };
        let request = SlotRequest {
            index: 0,
            task,
            epoch_start: self.dispatcher.front_end().now() + self.config.epoch_lead,
            hopping: false,
            hop: None,
            hop_baseband: None,
            tx_payload: None,
            suppress_rx: false,
        };
        let outcome = self.dispatcher.run_slot(request).await?;
        if let Some(snapshot) = outcome.rx.completed().and_then(|r| r.snapshot.as_ref()) {
            let threshold = calibrate_noise_threshold(snapshot);
            info!("Node {} noise threshold {:.4}", self.node_id(), threshold);
            self.dispatcher.set_noise_threshold(threshold);
        }
        Ok(self.dispatcher.noise_threshold())
    }

    /// Run epochs until `keep_going` returns false or a drain is requested
    pub async fn run_until(
        &mut self,
        mut keep_going: impl FnMut() -> bool,
    ) -> Result<u64, LinkError> {
        while keep_going() && !self.is_draining() {
            self.run_epoch().await?;
        }
        Ok(self.epoch)
    }

    /// Run one epoch
    pub async fn run_epoch(&mut self) -> Result<EpochReport, LinkError> {
        let mode = self.mode;
        let epoch = self.epoch;
        match mode {
            ScheduleMode::Fdd => self.scheduler.compute_fdd(0.0),
            ScheduleMode::Fh => {
                self.scheduler.compute_fh(0.0);
                self.hop.generate();
                let report = self.hop.scrub();
                if !report.is_clean() {
                    warn!(
                        "Hop sequence repaired: {} rf, {} baseband entries",
                        report.repaired_rf, report.repaired_baseband
                    );
                }
            }
            ScheduleMode::Continuous => {}
        }

        let tasks = self.scheduler.schedule(mode).tasks().to_vec();
        let epoch_start = self.dispatcher.front_end().now() + self.config.epoch_lead;
        let mut slots_run = 0;
        let mut drained = false;

        for (index, task) in tasks.into_iter().enumerate() {
            if self.is_draining() {
                info!("Node {} draining at slot {}", self.node_id(), index);
                drained = true;
                break;
            }

            let (hop, hop_baseband) = if mode.hops() {
                let step = self.hop.step(index)?;
                (
                    Some(self.table.rf(step.rf)?),
                    Some(self.table.baseband(step.baseband)?),
                )
            } else {
                (None, None)
            };
            let tx_payload = match task.tx_action {
                TaskAction::Noise => Some(TxPayload::Noise),
                action => self.mac.build_tx_frame(action).map(TxPayload::Frame),
            };

            let outcome = self
                .dispatcher
                .run_slot(SlotRequest {
                    index,
                    task,
                    epoch_start,
                    hopping: mode.hops(),
                    hop,
                    hop_baseband,
                    tx_payload,
                    suppress_rx: false,
                })
                .await?;
            self.fold_slot(mode, outcome).await;
            slots_run += 1;
        }

        self.emit(LinkEvent::ScheduleRun {
            node: self.node_id(),
            epoch,
            mode,
            slots: slots_run,
        })
        .await;

        let next_mode = self.select_mode(mode);
        if next_mode != mode {
            info!("Node {} switching {} -> {}", self.node_id(), mode, next_mode);
            self.emit(LinkEvent::ModeSwitched {
                node: self.node_id(),
                epoch,
                to: next_mode,
            })
            .await;
        }
        self.mode = next_mode;

        let now = self.dispatcher.front_end().now() - self.started;
        let counters = *self.mac.counters();
        let throughput_kbps = self.meter.sample(counters.valid_bytes, now);
        let summary =
            self.batches
                .summarize(epoch, &counters, throughput_kbps, self.anti_jam.state());
        debug!("Node {} {}", self.node_id(), summary);
        self.emit(LinkEvent::Batch {
            node: self.node_id(),
            summary,
        })
        .await;

        let actions = self.anti_jam.step(&EpochObservation {
            now,
            throughput_kbps,
            valid_payloads: counters.valid_payloads,
            epoch,
        });
        for action in actions {
            self.apply(action).await?;
        }

        self.epoch += 1;
        Ok(EpochReport {
            epoch,
            mode,
            slots_run,
            drained,
            summary,
            next_mode,
        })
    }

    fn select_mode(&mut self, mode: ScheduleMode) -> ScheduleMode {
        let selects_normal = self.mac.assess_heartbeat(mode != ScheduleMode::Fh);
        if self.config.continuous {
            ScheduleMode::Continuous
        } else if selects_normal {
            ScheduleMode::Fdd
        } else {
            ScheduleMode::Fh
        }
    }

    async fn fold_slot(&mut self, mode: ScheduleMode, outcome: SlotOutcome) {
        let node = self.node_id();

        match outcome.tx {
            BurstOutcome::Completed(report) => {
                if let Some(frame_type) = report.frame_type {
                    self.mac.note_transmitted(frame_type);
                }
            }
            BurstOutcome::Failed(record) => self.emit(LinkEvent::RfError { node, record }).await,
            BurstOutcome::Skipped => {}
        }

        let heartbeat_expected = self.scheduler.is_heartbeat_expected(mode, outcome.index);
        match outcome.rx {
            BurstOutcome::Completed(report) => {
                for frame in &report.frames {
                    if let Some(event) = self.mac.receive(frame) {
                        self.handle_mac_event(event).await;
                    }
                }
                if heartbeat_expected {
                    self.mac.record_heartbeat(&report.frames, report.noisy);
                }
            }
            BurstOutcome::Failed(record) => {
                if heartbeat_expected {
                    self.mac.record_heartbeat(&[], false);
                }
                self.emit(LinkEvent::RfError { node, record }).await;
            }
            BurstOutcome::Skipped => {}
        }
    }

    async fn handle_mac_event(&mut self, event: MacEvent) {
        match event {
            MacEvent::AllocationReceived(allocation) => {
                if *self.modem().allocation() == allocation {
                    return;
                }
                let description = allocation.to_string();
                let version = self.modem().install(allocation);
                self.emit(LinkEvent::AllocationChanged {
                    node: self.node_id(),
                    version,
                    source: AllocationSource::Received {
                        from_epoch: self.epoch,
                    },
                    description,
                })
                .await;
            }
            MacEvent::Control { source, payload } => {
                debug!("Control message from {}: {} bytes", source, payload.len());
            }
        }
    }

    async fn apply(&mut self, action: AntiJamAction) -> Result<(), LinkError> {
        match action {
            AntiJamAction::Install(allocation) => {
                if *self.modem().allocation() == allocation {
                    return Ok(());
                }
                let description = allocation.to_string();
                let version = self.modem().install(allocation);
                self.emit(LinkEvent::AllocationChanged {
                    node: self.node_id(),
                    version,
                    source: AllocationSource::Local,
                    description,
                })
                .await;
            }
            AntiJamAction::Broadcast {
                allocation,
                repeats,
            } => {
                let frame = self.mac.allocation_frame(&allocation);
                let sent = self.dispatcher.transmit_now(frame, repeats).await?;
                for _ in 0..sent {
                    self.mac.note_transmitted(FrameType::NewAlloc);
                }
                if sent < repeats {
                    warn!(
                        "Node {} allocation broadcast: {} of {} sent",
                        self.node_id(),
                        sent,
                        repeats
                    );
                }
            }
            AntiJamAction::ResizeSchedule(size) => self.scheduler.set_continuous_size(size),
        }
        Ok(())
    }

    /// Forward an event; once the receiver is gone the node stops sending
    async fn emit(&mut self, event: LinkEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events.send(event).await {
            warn!(
                "Node {} event receiver closed, dropping {:?} and later events",
                self.node_id(),
                e.0
            );
            self.events = None;
        }
    }
}
