//! Per-slot task dispatch
//!
//! Each slot runs as two units, one per side. A unit first retunes (when the
//! slot needs it) and then runs its burst; both are blocking front end calls
//! executed on the blocking pool. The two units run concurrently and are
//! joined before the slot is reported, so bursts of different slots never
//! overlap and no burst starts before its own side has retuned.

use std::fmt::Write as _;
use std::sync::Arc;

use hop_plan::{FreqPair, FrequencyTable, HopSequence, RfTask, Schedule, TaskAction};
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, warn};

use crate::error::{FrontEndError, LinkError};
use crate::frame::{Frame, FrameType};
use crate::frontend::{
    trailing_noise_is_high, FrontEnd, HardwareErrorRecord, HardwareStats, Sample, Side,
    DEFAULT_NOISE_THRESHOLD,
};
use crate::modem::{DetectedFrame, ModemHandle};

/// Lead time for transmissions issued outside the schedule
const UNSCHEDULED_TX_LEAD: f64 = 2e-3;

/// Frequency a side should be tuned to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneTarget {
    /// RF center, Hz
    pub rf: f64,
    /// Baseband offset added to the RF center, Hz
    pub baseband: f64,
}

/// What a receive burst produced
#[derive(Debug, Clone, Default)]
pub struct RxBurstReport {
    pub action: TaskAction,
    /// Frames the synchronizer found, valid or not
    pub frames: Vec<DetectedFrame>,
    /// Trailing noise above the calibrated threshold
    pub noisy: bool,
    /// Allocation version the burst was demodulated with
    pub allocation_version: u64,
    /// Raw samples, kept for snapshot bursts only
    pub snapshot: Option<Vec<Sample>>,
}

/// Result of one side of a slot
#[derive(Debug)]
pub enum BurstOutcome<T> {
    /// Nothing scheduled on this side
    Skipped,
    Completed(T),
    /// The retune or the burst failed; the record is kept for the run
    Failed(HardwareErrorRecord),
}

impl<T> BurstOutcome<T> {
    /// Report of a completed burst
    pub fn completed(&self) -> Option<&T> {
        match self {
            BurstOutcome::Completed(t) => Some(t),
            _ => None,
        }
    }

    /// Whether the side failed
    pub fn is_failed(&self) -> bool {
        matches!(self, BurstOutcome::Failed(_))
    }
}

/// What the transmit side sent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxBurstReport {
    pub action: TaskAction,
    /// Type of the frame sent; `None` for a noise burst
    pub frame_type: Option<FrameType>,
    /// Samples handed to the front end
    pub samples: usize,
}

/// Joined outcome of one slot
#[derive(Debug)]
pub struct SlotOutcome {
    /// Slot index within the schedule
    pub index: usize,
    pub rx: BurstOutcome<RxBurstReport>,
    pub tx: BurstOutcome<TxBurstReport>,
}

/// What the transmit side of a slot carries
#[derive(Debug, Clone)]
pub enum TxPayload {
    /// A MAC frame, modulated with the installed allocation
    Frame(Frame),
    /// A calibration noise burst of the configured length
    Noise,
}

/// Everything the dispatcher needs to run one slot
#[derive(Debug, Clone)]
pub struct SlotRequest {
    pub index: usize,
    /// Actions and offsets within the epoch
    pub task: RfTask,
    /// Absolute start of the epoch on the front end clock
    pub epoch_start: f64,
    /// FH mode: retune to the hop targets instead of parking at home
    pub hopping: bool,
    /// Hop targets for the slot (FH mode only)
    pub hop: Option<FreqPair>,
    pub hop_baseband: Option<FreqPair>,
    /// What to send; `None` skips the transmit burst
    pub tx_payload: Option<TxPayload>,
    /// Skip the receive burst (drain in progress)
    pub suppress_rx: bool,
}

/// Executes slots against a front end and modem
pub struct TaskDispatcher {
    front_end: Arc<dyn FrontEnd>,
    modem: Arc<ModemHandle>,
    home: FreqPair,
    rx_samples: usize,
    tx_burst_length: usize,
    noise_threshold: f32,
    rx_at_home: bool,
    tx_at_home: bool,
    stats: HardwareStats,
}

impl TaskDispatcher {
    /// `home` is the FDD pair; the front end is assumed to start there
    pub fn new(
        front_end: Arc<dyn FrontEnd>,
        modem: Arc<ModemHandle>,
        home: FreqPair,
        rx_samples: usize,
        tx_burst_length: usize,
    ) -> Self {
        Self {
            front_end,
            modem,
            home,
            rx_samples,
            tx_burst_length,
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
            rx_at_home: false,
            tx_at_home: false,
            stats: HardwareStats::default(),
        }
    }

    pub fn front_end(&self) -> &Arc<dyn FrontEnd> {
        &self.front_end
    }

    /// Modem handle shared with the slot workers
    pub fn modem(&self) -> &Arc<ModemHandle> {
        &self.modem
    }

    /// Burst attempts, completions and failures per side
    pub fn stats(&self) -> &HardwareStats {
        &self.stats
    }

    /// Trailing-noise magnitude above which a receive counts as noisy
    pub fn noise_threshold(&self) -> f32 {
        self.noise_threshold
    }

    /// Replace the noise threshold, usually with a calibrated one
    pub fn set_noise_threshold(&mut self, threshold: f32) {
        debug!("Noise threshold {} -> {}", self.noise_threshold, threshold);
        self.noise_threshold = threshold;
    }

    /// Whether each side is parked at the home frequency
    pub fn at_home(&self) -> (bool, bool) {
        (self.rx_at_home, self.tx_at_home)
    }

    /// Retune targets for a slot: `(rx, tx)`
    pub fn tune_targets(&self, req: &SlotRequest) -> (Option<TuneTarget>, Option<TuneTarget>) {
        let home_rx = TuneTarget {
            rf: self.home.rx,
            baseband: 0.0,
        };
        let home_tx = TuneTarget {
            rf: self.home.tx,
            baseband: 0.0,
        };

        if !req.hopping {
            let rx = (!self.rx_at_home && req.task.rx_action.has_burst()).then_some(home_rx);
            let tx = (!self.tx_at_home && req.task.tx_action.has_burst()).then_some(home_tx);
            return (rx, tx);
        }

        let hop_rx = req.hop.zip(req.hop_baseband).map(|(rf, bb)| TuneTarget {
            rf: rf.rx,
            baseband: bb.rx,
        });
        let hop_tx = req.hop.zip(req.hop_baseband).map(|(rf, bb)| TuneTarget {
            rf: rf.tx,
            baseband: bb.tx,
        });

        let rx = match req.task.rx_action {
            a if a.always_retunes_rx() => hop_rx,
            TaskAction::Heartbeat if !self.rx_at_home => Some(home_rx),
            _ => None,
        };
        let tx = match req.task.tx_action {
            a if a.always_retunes_tx() => hop_tx,
            TaskAction::Heartbeat if !self.tx_at_home => Some(home_tx),
            _ => None,
        };
        (rx, tx)
    }

    /// Run one slot: retune then burst on each side, both sides joined
    pub async fn run_slot(&mut self, req: SlotRequest) -> Result<SlotOutcome, LinkError> {
        let (rx_tune, tx_tune) = self.tune_targets(&req);
        let rx_burst = req.task.rx_action.has_burst() && !req.suppress_rx;
        let tx_burst = req.task.tx_action.has_burst() && req.tx_payload.is_some();
        if req.task.tx_action.has_burst() && req.tx_payload.is_none() {
            debug!(
                "Slot {}: no frame for {:?} transmit, burst skipped",
                req.index, req.task.tx_action
            );
        }

        let rx_attempt = rx_burst.then(|| self.stats.begin(Side::Rx));
        let tx_attempt = tx_burst.then(|| self.stats.begin(Side::Tx));

        let rx_unit = {
            let front_end = self.front_end.clone();
            let modem = self.modem.clone();
            let start = req.epoch_start + req.task.rx_time;
            let action = req.task.rx_action;
            let samples = self.rx_samples;
            let threshold = self.noise_threshold;
            async move {
                let tuned = match rx_tune {
                    Some(t) => Some(retune(front_end.clone(), Side::Rx, t).await?),
                    None => None,
                };
                let outcome = match (rx_attempt, &tuned) {
                    (None, _) => BurstOutcome::Skipped,
                    (Some(attempt), Some(Err(e))) => {
                        BurstOutcome::Failed(tune_failure(Side::Rx, start, attempt, samples, e))
                    }
                    (Some(attempt), _) => spawn_blocking(move || {
                        receive_burst(&*front_end, &modem, start, samples, action, threshold, attempt)
                    })
                    .await
                    .map_err(worker_failed)?,
                };
                Ok::<_, LinkError>((tuned, outcome))
            }
        };

        let tx_unit = {
            let front_end = self.front_end.clone();
            let modem = self.modem.clone();
            let start = req.epoch_start + req.task.tx_time;
            let action = req.task.tx_action;
            let payload = req.tx_payload.clone();
            let burst_length = self.tx_burst_length;
            async move {
                let tuned = match tx_tune {
                    Some(t) => Some(retune(front_end.clone(), Side::Tx, t).await?),
                    None => None,
                };
                let outcome = match (tx_attempt, payload, &tuned) {
                    (Some(attempt), Some(_), Some(Err(e))) => {
                        BurstOutcome::Failed(tune_failure(Side::Tx, start, attempt, 0, e))
                    }
                    (Some(attempt), Some(payload), _) => spawn_blocking(move || {
                        transmit_burst(&*front_end, &modem, start, action, &payload, burst_length, attempt)
                    })
                    .await
                    .map_err(worker_failed)?,
                    _ => BurstOutcome::Skipped,
                };
                Ok::<_, LinkError>((tuned, outcome))
            }
        };

        let (rx_result, tx_result) = tokio::join!(rx_unit, tx_unit);
        let (rx_tuned, rx) = rx_result?;
        let (tx_tuned, tx) = tx_result?;

        self.fold_tune(Side::Rx, rx_tune, rx_tuned);
        self.fold_tune(Side::Tx, tx_tune, tx_tuned);
        self.fold_outcome(Side::Rx, &rx);
        self.fold_outcome(Side::Tx, &tx);

        Ok(SlotOutcome {
            index: req.index,
            rx,
            tx,
        })
    }

    /// Send a frame several times outside the schedule, one burst after
    /// another
    pub async fn transmit_now(&mut self, frame: Frame, repeats: usize) -> Result<usize, LinkError> {
        let payload = TxPayload::Frame(frame);
        let mut sent = 0;
        for _ in 0..repeats {
            let attempt = self.stats.begin(Side::Tx);
            let front_end = self.front_end.clone();
            let modem = self.modem.clone();
            let payload = payload.clone();
            let burst_length = self.tx_burst_length;
            let outcome = spawn_blocking(move || {
                let start = front_end.now() + UNSCHEDULED_TX_LEAD;
                transmit_burst(&*front_end, &modem, start, TaskAction::Data, &payload, burst_length, attempt)
            })
            .await
            .map_err(worker_failed)?;
            if outcome.completed().is_some() {
                sent += 1;
            }
            self.fold_outcome(Side::Tx, &outcome);
        }
        Ok(sent)
    }

    fn fold_tune(
        &mut self,
        side: Side,
        target: Option<TuneTarget>,
        result: Option<Result<f64, FrontEndError>>,
    ) {
        let (Some(target), Some(result)) = (target, result) else {
            return;
        };
        let home = match side {
            Side::Rx => self.home.rx,
            Side::Tx => self.home.tx,
        };
        let at_home = match result {
            Ok(_) => target.rf == home && target.baseband == 0.0,
            Err(e) => {
                warn!("{} retune to {:.0} Hz failed: {}", side, target.rf, e);
                self.stats.tune_failures += 1;
                false
            }
        };
        match side {
            Side::Rx => self.rx_at_home = at_home,
            Side::Tx => self.tx_at_home = at_home,
        }
    }

    fn fold_outcome<T>(&mut self, side: Side, outcome: &BurstOutcome<T>) {
        match outcome {
            BurstOutcome::Skipped => {}
            BurstOutcome::Completed(_) => self.stats.complete(side),
            BurstOutcome::Failed(record) => {
                warn!("Burst failed: {}", record);
                self.stats.fail(record.clone());
            }
        }
    }
}

fn worker_failed(e: JoinError) -> LinkError {
    LinkError::WorkerFailed(e.to_string())
}

fn tune_failure(
    side: Side,
    start: f64,
    attempt: u64,
    samples: usize,
    error: &FrontEndError,
) -> HardwareErrorRecord {
    HardwareErrorRecord {
        timestamp: start,
        side,
        code: error.code(),
        attempt,
        samples,
        message: format!("retune failed: {}", error),
    }
}

async fn retune(
    front_end: Arc<dyn FrontEnd>,
    side: Side,
    target: TuneTarget,
) -> Result<Result<f64, FrontEndError>, LinkError> {
    spawn_blocking(move || front_end.tune(side, target.rf, target.baseband))
        .await
        .map_err(worker_failed)
}

fn receive_burst(
    front_end: &dyn FrontEnd,
    modem: &ModemHandle,
    start: f64,
    sample_count: usize,
    action: TaskAction,
    threshold: f32,
    attempt: u64,
) -> BurstOutcome<RxBurstReport> {
    let samples = match front_end.issue_timed_receive(start, sample_count) {
        Ok(samples) => samples,
        Err(e) => {
            return BurstOutcome::Failed(HardwareErrorRecord {
                timestamp: start,
                side: Side::Rx,
                code: e.code(),
                attempt,
                samples: sample_count,
                message: e.to_string(),
            })
        }
    };

    let synchronizer = modem.synchronizer();
    let mut frames: Vec<DetectedFrame> = Vec::new();
    synchronizer.inner.demodulate(&samples, &mut frames);
    let noisy = trailing_noise_is_high(&samples, threshold);

    BurstOutcome::Completed(RxBurstReport {
        action,
        frames,
        noisy,
        allocation_version: synchronizer.version,
        snapshot: (action == TaskAction::Snapshot).then_some(samples),
    })
}

fn transmit_burst(
    front_end: &dyn FrontEnd,
    modem: &ModemHandle,
    start: f64,
    action: TaskAction,
    payload: &TxPayload,
    burst_length: usize,
    attempt: u64,
) -> BurstOutcome<TxBurstReport> {
    let generator = modem.generator();
    let (samples, frame_type) = match payload {
        TxPayload::Frame(frame) => (
            generator
                .inner
                .modulate(&frame.header.encode(), &frame.payload),
            Some(frame.frame_type()),
        ),
        TxPayload::Noise => (generator.inner.noise(burst_length), None),
    };

    match front_end.issue_timed_transmit(start, &samples) {
        Ok(()) => BurstOutcome::Completed(TxBurstReport {
            action,
            frame_type,
            samples: samples.len(),
        }),
        Err(e) => BurstOutcome::Failed(HardwareErrorRecord {
            timestamp: start,
            side: Side::Tx,
            code: e.code(),
            attempt,
            samples: samples.len(),
            message: e.to_string(),
        }),
    }
}

/// Per-slot tuning targets of a schedule, one line per slot
pub fn task_report(
    schedule: &Schedule,
    hop: Option<&HopSequence>,
    table: &FrequencyTable,
) -> String {
    let mut out = String::new();
    let home = table.fdd();
    for (i, task) in schedule.iter().enumerate() {
        let (rx, tx) = match hop.and_then(|h| h.step(i).ok()) {
            Some(step) => match (table.rf(step.rf), table.baseband(step.baseband)) {
                (Ok(rf), Ok(bb)) => (rf.rx + bb.rx, rf.tx + bb.tx),
                _ => (f64::NAN, f64::NAN),
            },
            None => (home.rx, home.tx),
        };
        let _ = writeln!(
            out,
            "{:4} rx {:<11} {:>12.6} {:>14.0} Hz | tx {:<11} {:>12.6} {:>14.0} Hz",
            i, task.rx_action, task.rx_time, rx, task.tx_action, task.tx_time, tx
        );
    }
    out
}
