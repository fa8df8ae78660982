//! Error types for link planning

use thiserror::Error;

use crate::task::ScheduleMode;

/// Errors raised while building schedules, frequency tables or hop sequences
///
/// All of these describe an operator or programmer misconfiguration; none of
/// them can be recovered from at runtime.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    /// The net period does not leave enough of the second for the 1PPS guard
    #[error("cannot support {mode} net: net period {net_period:.6e}s leaves less than the {pps_guard:.3e}s 1PPS guard")]
    InfeasibleTiming {
        mode: ScheduleMode,
        net_period: f64,
        pps_guard: f64,
    },

    /// Too few hop windows survive the prohibited-range filter
    #[error("only {allowed} hopping window(s) clear the prohibited ranges; at least 2 are required")]
    InsufficientFrequencies { allowed: usize },

    /// A table that must have entries is empty
    #[error("{0} table is empty")]
    EmptyTable(&'static str),

    /// The node running this link is not a member of its own net
    #[error("node {0} is not a member of the net")]
    NodeNotInNet(u8),

    /// The net membership is unusable
    #[error("invalid net: {0}")]
    InvalidNet(String),

    /// A numeric parameter is out of its meaningful range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Bounds-checked table access failed
    #[error("{table} index {index} out of range (len {len})")]
    IndexOutOfRange {
        table: &'static str,
        index: usize,
        len: usize,
    },
}
