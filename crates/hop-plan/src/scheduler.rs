//! Slot scheduler
//!
//! The scheduler owns three schedules: FDD ("normal"), FH ("anti-jam") and a
//! continuous multi-access schedule. FDD and FH sizes come from the
//! [`TimingBudget`]; the continuous schedule has a runtime-adjustable size
//! capped at [`MAX_CONTINUOUS_SLOTS`].
//!
//! # Example
//!
//! ```rust
//! use hop_plan::{HeartbeatActivity, NetConfig, ScheduleMode, Scheduler, TaskAction, TimingConfig};
//!
//! let net = NetConfig::new(3, 3, vec![1, 2, 3]);
//! let mut scheduler =
//!     Scheduler::new(net, HeartbeatActivity::None, &TimingConfig::default()).unwrap();
//! scheduler.compute_fdd(0.0);
//!
//! // The basestation transmits in every slot
//! let fdd = scheduler.schedule(ScheduleMode::Fdd);
//! assert!(fdd.iter().all(|t| t.tx_action == TaskAction::Data));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PlanError;
use crate::net::{NetConfig, NodeRole};
use crate::task::{RfTask, ScheduleMode, TaskAction};
use crate::timing::{TimingBudget, TimingConfig, MAX_CONTINUOUS_SLOTS};

/// Whether heartbeats are scheduled at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeartbeatActivity {
    /// No heartbeat slots, no heartbeat assessment
    None,
    /// Heartbeat slots near the start and midpoint of every schedule
    #[default]
    PerSchedule,
}

/// An ordered list of slots for one mode
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    mode: ScheduleMode,
    tasks: Vec<RfTask>,
}

impl Schedule {
    fn idle(mode: ScheduleMode, len: usize) -> Self {
        Self {
            mode,
            tasks: vec![RfTask::default(); len],
        }
    }

    /// Mode this schedule belongs to
    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the schedule has no slots
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Slot at `index`
    pub fn get(&self, index: usize) -> Option<&RfTask> {
        self.tasks.get(index)
    }

    /// Iterate over slots in order
    pub fn iter(&self) -> std::slice::Iter<'_, RfTask> {
        self.tasks.iter()
    }

    /// Borrow the slots
    pub fn tasks(&self) -> &[RfTask] {
        &self.tasks
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} schedule, {} slots", self.mode, self.tasks.len())?;
        writeln!(f, "Index   Rx Time   Rx Task       Tx Time   Tx Task")?;
        writeln!(f, "---------------------------------------------------")?;
        for (idx, task) in self.tasks.iter().enumerate() {
            writeln!(
                f,
                "{:>5}  {:<8.6}  {:<12}  {:<8.6}  {:<12}",
                idx, task.rx_time, task.rx_action, task.tx_time, task.tx_action
            )?;
        }
        Ok(())
    }
}

/// Computes per-slot actions and start times for every mode
#[derive(Debug, Clone)]
pub struct Scheduler {
    net: NetConfig,
    activity: HeartbeatActivity,
    budget: TimingBudget,
    fdd: Schedule,
    fh: Schedule,
    continuous: Schedule,
}

impl Scheduler {
    /// Build a scheduler, failing on any infeasible timing budget
    pub fn new(
        net: NetConfig,
        activity: HeartbeatActivity,
        timing: &TimingConfig,
    ) -> Result<Self, PlanError> {
        net.validate()?;
        let slots_per_net = net.slots_per_net();
        let budget = TimingBudget::new(timing, slots_per_net)?;

        let fdd_len = slots_per_net * budget.fdd_nets_per_sec;
        let fh_len = slots_per_net * budget.fh_nets_per_sec;
        let continuous_len = timing.continuous_size.clamp(1, MAX_CONTINUOUS_SLOTS);

        debug!(
            "Scheduler sizes: fdd={} fh={} continuous={}",
            fdd_len, fh_len, continuous_len
        );

        let mut scheduler = Self {
            net,
            activity,
            budget,
            fdd: Schedule::idle(ScheduleMode::Fdd, fdd_len),
            fh: Schedule::idle(ScheduleMode::Fh, fh_len),
            continuous: Schedule::idle(ScheduleMode::Continuous, continuous_len),
        };
        scheduler.compute_continuous();
        Ok(scheduler)
    }

    /// Net this scheduler plans for
    pub fn net(&self) -> &NetConfig {
        &self.net
    }

    /// Role of the local node
    pub fn role(&self) -> NodeRole {
        self.net.role()
    }

    /// Heartbeat activity setting
    pub fn heartbeat_activity(&self) -> HeartbeatActivity {
        self.activity
    }

    /// Derived timing budget
    pub fn budget(&self) -> &TimingBudget {
        &self.budget
    }

    /// Samples each receive burst should request
    pub fn recommended_rx_samples(&self) -> usize {
        self.budget.rx_samples
    }

    /// Gap between consecutive FH receive dwells
    pub fn fh_interdwell_spacing(&self) -> f64 {
        self.budget.fh_interdwell_spacing()
    }

    /// Schedule for a mode
    pub fn schedule(&self, mode: ScheduleMode) -> &Schedule {
        match mode {
            ScheduleMode::Fdd => &self.fdd,
            ScheduleMode::Fh => &self.fh,
            ScheduleMode::Continuous => &self.continuous,
        }
    }

    /// Number of slots in the schedule for a mode
    pub fn active_size(&self, mode: ScheduleMode) -> usize {
        self.schedule(mode).len()
    }

    /// Transmit action of a slot
    pub fn current_tx_action(&self, mode: ScheduleMode, slot: usize) -> Option<TaskAction> {
        self.schedule(mode).get(slot).map(|t| t.tx_action)
    }

    /// Whether the receive side of a slot expects a heartbeat
    pub fn is_heartbeat_expected(&self, mode: ScheduleMode, slot: usize) -> bool {
        self.schedule(mode)
            .get(slot)
            .is_some_and(|t| t.rx_action == TaskAction::Heartbeat)
    }

    /// Recompute the FDD schedule for an epoch starting at `start`
    pub fn compute_fdd(&mut self, start: f64) {
        let slot = self.budget.fdd_slot;
        let guard_begin = self.budget.guard_begin;
        self.fdd.tasks = self.traffic_tasks(self.fdd.len(), |i| {
            let rx = start + i as f64 * slot;
            (rx, rx + guard_begin)
        });
    }

    /// Recompute the FH schedule for an epoch starting at `start`
    ///
    /// Every slot leaves room for a retune before the receive dwell opens.
    pub fn compute_fh(&mut self, start: f64) {
        let slot = self.budget.fh_slot;
        let tune = self.budget.tune;
        let guard_begin = self.budget.guard_begin;
        self.fh.tasks = self.traffic_tasks(self.fh.len(), |i| {
            let rx = start + i as f64 * slot + tune;
            (rx, rx + guard_begin)
        });
    }

    /// Recompute the continuous multi-access schedule
    ///
    /// Every slot both receives and sends: the basestation sends
    /// multi-access downlink bursts and listens for uplink bursts, mobiles
    /// do the reverse.
    pub fn compute_continuous(&mut self) {
        let (rx_action, tx_action) = match self.role() {
            NodeRole::Basestation => (TaskAction::McData, TaskAction::OfdmaData),
            NodeRole::Mobile => (TaskAction::OfdmaData, TaskAction::McData),
        };
        let slot = self.budget.fdd_slot;
        for (i, task) in self.continuous.tasks.iter_mut().enumerate() {
            *task = RfTask {
                rx_action,
                rx_time: i as f64 * slot,
                tx_action,
                tx_time: i as f64 * slot,
            };
        }
    }

    /// Resize the continuous schedule, capped at [`MAX_CONTINUOUS_SLOTS`]
    pub fn set_continuous_size(&mut self, size: usize) {
        let size = size.clamp(1, MAX_CONTINUOUS_SLOTS);
        if size != self.continuous.len() {
            debug!("Continuous schedule size {} -> {}", self.continuous.len(), size);
            self.continuous.tasks.resize(size, RfTask::default());
            self.compute_continuous();
        }
    }

    /// Load both FDD and FH schedules with a single snapshot/noise pair
    pub fn compute_calibration(&mut self, start: f64) {
        let b = &self.budget;
        let fill = |sched: &mut Schedule, slot: f64, offset: f64| {
            for (i, task) in sched.tasks.iter_mut().enumerate() {
                let rx = start + i as f64 * slot + offset;
                let (rx_action, tx_action) = if i == 0 {
                    (TaskAction::Snapshot, TaskAction::Noise)
                } else {
                    (TaskAction::Idle, TaskAction::Idle)
                };
                *task = RfTask {
                    rx_action,
                    rx_time: rx,
                    tx_action,
                    tx_time: rx + b.guard_begin,
                };
            }
        };
        fill(&mut self.fdd, b.fdd_slot, 0.0);
        fill(&mut self.fh, b.fh_slot, b.tune);
    }

    /// Load idle FDD and FH schedules with a snapshot in the first slot
    pub fn compute_test(&mut self, start: f64) {
        let b = &self.budget;
        let fill = |sched: &mut Schedule, slot: f64, offset: f64| {
            for (i, task) in sched.tasks.iter_mut().enumerate() {
                let rx = start + i as f64 * slot + offset;
                *task = RfTask {
                    rx_action: TaskAction::Idle,
                    rx_time: rx,
                    tx_action: TaskAction::Idle,
                    tx_time: rx + b.guard_begin,
                };
            }
            if let Some(first) = sched.tasks.first_mut() {
                first.rx_action = TaskAction::Snapshot;
                first.rx_time = start;
            }
        };
        fill(&mut self.fdd, b.fdd_slot, 0.0);
        fill(&mut self.fh, b.fh_slot, b.tune);
    }

    /// Build receive-everywhere / role-dependent transmit slots, then
    /// overwrite heartbeat slots
    fn traffic_tasks(&self, len: usize, times: impl Fn(usize) -> (f64, f64)) -> Vec<RfTask> {
        let slots_per_net = self.net.slots_per_net();
        let mobile_slot = self.net.mobile_slot();

        let mut tasks: Vec<RfTask> = (0..len)
            .map(|i| {
                let (rx_time, tx_time) = times(i);
                let transmits = match mobile_slot {
                    None => true,
                    Some(own) => i % slots_per_net == own,
                };
                RfTask {
                    rx_action: TaskAction::Data,
                    rx_time,
                    tx_action: if transmits {
                        TaskAction::Data
                    } else {
                        TaskAction::Idle
                    },
                    tx_time,
                }
            })
            .collect();

        if self.activity == HeartbeatActivity::PerSchedule {
            let per_node = self.net.num_nodes();
            let mid = len / 2;
            let ranges = [0..per_node.min(len), mid..(mid + per_node).min(len)];
            for range in ranges {
                for task in &mut tasks[range] {
                    task.rx_action = TaskAction::Heartbeat;
                    if task.tx_action == TaskAction::Data {
                        task.tx_action = TaskAction::Heartbeat;
                    }
                }
            }
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(node_id: u8, activity: HeartbeatActivity) -> Scheduler {
        Scheduler::new(
            NetConfig::new(node_id, 3, vec![1, 2, 3]),
            activity,
            &TimingConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_sizes_follow_budget() {
        let s = scheduler(1, HeartbeatActivity::None);
        let b = s.budget();
        assert_eq!(s.active_size(ScheduleMode::Fdd), 2 * b.fdd_nets_per_sec);
        assert_eq!(s.active_size(ScheduleMode::Fh), 2 * b.fh_nets_per_sec);
        assert_eq!(s.active_size(ScheduleMode::Continuous), MAX_CONTINUOUS_SLOTS);
    }

    #[test]
    fn test_fdd_times() {
        let mut s = scheduler(1, HeartbeatActivity::None);
        s.compute_fdd(2.0);
        let b = s.budget().clone();
        let t = s.schedule(ScheduleMode::Fdd).get(3).copied().unwrap();
        assert!((t.rx_time - (2.0 + 3.0 * b.fdd_slot)).abs() < 1e-12);
        assert!((t.tx_time - t.rx_time - b.guard_begin).abs() < 1e-12);
        assert!(t.tx_time >= t.rx_time);
    }

    #[test]
    fn test_fh_times_leave_room_to_tune() {
        let mut s = scheduler(1, HeartbeatActivity::None);
        s.compute_fh(0.0);
        let b = s.budget().clone();
        let t = s.schedule(ScheduleMode::Fh).get(0).copied().unwrap();
        assert!((t.rx_time - b.tune).abs() < 1e-12);
    }

    #[test]
    fn test_mobile_transmits_once_per_net() {
        let mut s = scheduler(2, HeartbeatActivity::None);
        s.compute_fdd(0.0);
        let fdd = s.schedule(ScheduleMode::Fdd);
        for (i, t) in fdd.iter().enumerate() {
            let expected = if i % 2 == 1 {
                TaskAction::Data
            } else {
                TaskAction::Idle
            };
            assert_eq!(t.tx_action, expected, "slot {}", i);
            assert_eq!(t.rx_action, TaskAction::Data);
        }
    }

    #[test]
    fn test_heartbeat_insertion() {
        let mut s = scheduler(3, HeartbeatActivity::PerSchedule);
        s.compute_fdd(0.0);
        let fdd = s.schedule(ScheduleMode::Fdd);
        let mid = fdd.len() / 2;
        for i in (0..3).chain(mid..mid + 3) {
            let t = fdd.get(i).unwrap();
            assert_eq!(t.rx_action, TaskAction::Heartbeat);
            assert_eq!(t.tx_action, TaskAction::Heartbeat);
            assert!(s.is_heartbeat_expected(ScheduleMode::Fdd, i));
        }
        assert!(!s.is_heartbeat_expected(ScheduleMode::Fdd, 3));
        assert_eq!(fdd.get(3).unwrap().tx_action, TaskAction::Data);
    }

    #[test]
    fn test_continuous_roles_and_cap() {
        let mut bs = scheduler(3, HeartbeatActivity::PerSchedule);
        assert!(bs
            .schedule(ScheduleMode::Continuous)
            .iter()
            .all(|t| t.tx_action == TaskAction::OfdmaData && t.rx_action == TaskAction::McData));
        bs.set_continuous_size(100);
        assert_eq!(bs.active_size(ScheduleMode::Continuous), 40);
        bs.set_continuous_size(5);
        assert_eq!(bs.active_size(ScheduleMode::Continuous), 5);

        let mobile = scheduler(1, HeartbeatActivity::PerSchedule);
        assert_eq!(
            mobile.current_tx_action(ScheduleMode::Continuous, 0),
            Some(TaskAction::McData)
        );
    }

    #[test]
    fn test_continuous_slots_receive_after_resize() {
        let mut mobile = scheduler(1, HeartbeatActivity::PerSchedule);
        mobile.set_continuous_size(5);
        let sched = mobile.schedule(ScheduleMode::Continuous);
        assert_eq!(sched.len(), 5);
        for task in sched.iter() {
            assert_eq!(task.rx_action, TaskAction::OfdmaData);
            assert!(task.rx_action.has_burst());
        }
        assert!(!mobile.is_heartbeat_expected(ScheduleMode::Continuous, 0));
    }

    #[test]
    fn test_calibration_schedule() {
        let mut s = scheduler(1, HeartbeatActivity::PerSchedule);
        s.compute_calibration(0.0);
        for mode in [ScheduleMode::Fdd, ScheduleMode::Fh] {
            let sched = s.schedule(mode);
            assert_eq!(sched.get(0).unwrap().rx_action, TaskAction::Snapshot);
            assert_eq!(sched.get(0).unwrap().tx_action, TaskAction::Noise);
            assert!(sched.iter().skip(1).all(|t| t.rx_action == TaskAction::Idle
                && t.tx_action == TaskAction::Idle));
        }
    }

    #[test]
    fn test_test_schedule() {
        let mut s = scheduler(1, HeartbeatActivity::PerSchedule);
        s.compute_test(1.0);
        let fh = s.schedule(ScheduleMode::Fh);
        assert_eq!(fh.get(0).unwrap().rx_action, TaskAction::Snapshot);
        assert_eq!(fh.get(0).unwrap().rx_time, 1.0);
        assert!(fh.iter().all(|t| t.tx_action == TaskAction::Idle));
    }

    #[test]
    fn test_out_of_range_queries() {
        let s = scheduler(1, HeartbeatActivity::PerSchedule);
        assert_eq!(s.current_tx_action(ScheduleMode::Fdd, usize::MAX), None);
        assert!(!s.is_heartbeat_expected(ScheduleMode::Fh, usize::MAX));
    }

    #[test]
    fn test_schedule_report() {
        let mut s = scheduler(3, HeartbeatActivity::None);
        s.set_continuous_size(2);
        let report = s.schedule(ScheduleMode::Continuous).to_string();
        assert!(report.contains("continuous schedule, 2 slots"));
        assert!(report.contains("ofdma-data"));
    }
}
