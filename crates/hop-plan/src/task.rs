//! Per-slot radio tasks
//!
//! A slot carries at most one receive action and one transmit action, each
//! with an absolute start time measured from the epoch start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the radio does on one side (receive or transmit) during a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskAction {
    /// Nothing scheduled
    #[default]
    Idle,
    /// Retune without a burst
    RetuneOnly,
    /// Point-to-point data burst
    Data,
    /// Multi-access downlink burst (basestation)
    OfdmaData,
    /// Multi-access uplink burst (mobile)
    McData,
    /// Heartbeat burst used for jamming inference
    Heartbeat,
    /// Raw receive snapshot for calibration
    Snapshot,
    /// Transmit noise for calibration
    Noise,
}

impl TaskAction {
    /// Short name used in schedule reports
    pub fn name(&self) -> &'static str {
        match self {
            TaskAction::Idle => "idle",
            TaskAction::RetuneOnly => "retune-only",
            TaskAction::Data => "data",
            TaskAction::OfdmaData => "ofdma-data",
            TaskAction::McData => "mc-data",
            TaskAction::Heartbeat => "heartbeat",
            TaskAction::Snapshot => "snapshot",
            TaskAction::Noise => "noise",
        }
    }

    /// Whether a receive slot with this action must retune while hopping
    ///
    /// Heartbeats are special-cased by the dispatcher: they only retune when
    /// the radio is not already parked at its home frequency.
    pub fn always_retunes_rx(&self) -> bool {
        matches!(
            self,
            TaskAction::RetuneOnly | TaskAction::Data | TaskAction::Snapshot
        )
    }

    /// Whether a transmit slot with this action must retune while hopping
    pub fn always_retunes_tx(&self) -> bool {
        matches!(
            self,
            TaskAction::RetuneOnly | TaskAction::Data | TaskAction::Noise
        )
    }

    /// Whether this action runs a burst on the front end
    pub fn has_burst(&self) -> bool {
        !matches!(self, TaskAction::Idle | TaskAction::RetuneOnly)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One scheduled slot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RfTask {
    /// Receive side action
    pub rx_action: TaskAction,
    /// Receive start, seconds from epoch start
    pub rx_time: f64,
    /// Transmit side action
    pub tx_action: TaskAction,
    /// Transmit start, seconds from epoch start
    pub tx_time: f64,
}

/// Which schedule drives an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScheduleMode {
    /// Frequency-division duplex ("normal")
    #[default]
    Fdd,
    /// Frequency hopping ("anti-jam")
    Fh,
    /// Continuous multi-access operation without guard arithmetic
    Continuous,
}

impl ScheduleMode {
    /// Human-readable mode name
    pub fn name(&self) -> &'static str {
        match self {
            ScheduleMode::Fdd => "FDD",
            ScheduleMode::Fh => "FH",
            ScheduleMode::Continuous => "continuous",
        }
    }

    /// Whether slots in this mode hop frequencies
    pub fn hops(&self) -> bool {
        matches!(self, ScheduleMode::Fh)
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retune_classification() {
        assert!(TaskAction::Data.always_retunes_rx());
        assert!(TaskAction::Snapshot.always_retunes_rx());
        assert!(!TaskAction::Heartbeat.always_retunes_rx());
        assert!(!TaskAction::Idle.always_retunes_rx());
        assert!(TaskAction::Noise.always_retunes_tx());
        assert!(!TaskAction::Snapshot.always_retunes_tx());
    }

    #[test]
    fn test_burst_classification() {
        assert!(!TaskAction::Idle.has_burst());
        assert!(!TaskAction::RetuneOnly.has_burst());
        assert!(TaskAction::McData.has_burst());
        assert!(TaskAction::Heartbeat.has_burst());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(ScheduleMode::Fdd.to_string(), "FDD");
        assert!(ScheduleMode::Fh.hops());
        assert!(!ScheduleMode::Continuous.hops());
    }
}
