//! Error types for the link runtime

use hop_plan::PlanError;
use thiserror::Error;

/// Errors reported by a front end
///
/// These are transient: a failed burst is recorded and the next slot is the
/// retry unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrontEndError {
    /// No samples arrived before the receive deadline
    #[error("receive timeout (code {code})")]
    Timeout { code: i32 },

    /// Samples were dropped by the host
    #[error("sample overflow (code {code})")]
    Overflow { code: i32 },

    /// A timed command arrived after its start time
    #[error("late command (code {code})")]
    LateCommand { code: i32 },

    /// The synthesizer failed to lock
    #[error("tune failed: {0}")]
    Tune(String),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl FrontEndError {
    /// Numeric hardware code, or -1 when the error carries none
    pub fn code(&self) -> i32 {
        match self {
            FrontEndError::Timeout { code }
            | FrontEndError::Overflow { code }
            | FrontEndError::LateCommand { code } => *code,
            FrontEndError::Tune(_) | FrontEndError::Transport(_) => -1,
        }
    }
}

/// Errors that can occur in the link runtime
#[derive(Debug, Error)]
pub enum LinkError {
    /// Planning failed (infeasible timing, bad frequency plan, bad net)
    #[error("planning error: {0}")]
    Plan(#[from] PlanError),

    /// Front end error outside of a burst (boot probe, calibration)
    #[error("front end error: {0}")]
    FrontEnd(#[from] FrontEndError),

    /// Frame payload exceeds the configured buffer
    #[error("frame too large: {size} bytes exceeds {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame header could not be decoded
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Subcarrier allocation could not be decoded
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    /// A slot worker panicked or was cancelled
    #[error("slot worker failed: {0}")]
    WorkerFailed(String),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
