//! Link Planning Library
//!
//! This crate decides *when* a node of a half-duplex radio net transmits or
//! receives and *which* frequency it uses in each slot:
//!
//! - **Timing**: guard-banded slot and net-period durations derived from the
//!   measured sample rates, bounded by a one-second epoch and a 1PPS guard
//! - **Scheduler**: per-slot receive/transmit actions for the FDD ("normal"),
//!   FH ("anti-jam") and continuous multi-access modes
//! - **Frequency tables**: the RF-stage and baseband-stage hopping tables,
//!   filtered against prohibited ranges
//! - **Hop sequences**: per-slot indices into both tables, produced by one of
//!   ten selectable policies
//!
//! Nothing here touches hardware. The runtime that executes a schedule lives
//! in the `hop-link` crate.
//!
//! # Example
//!
//! ```rust
//! use hop_plan::{FrequencyPlan, FrequencyTable, HopPolicy, HopSequence, NodeRole};
//!
//! let table = FrequencyTable::generate(&FrequencyPlan::default(), NodeRole::Mobile, false).unwrap();
//! assert_eq!(table.rf_len(), 200);
//!
//! let mut seq = HopSequence::new(HopPolicy::RestartAlgA, 64, table.rf_len(), table.baseband_len()).unwrap();
//! seq.generate();
//! assert!(seq.scrub().is_clean());
//! ```

pub mod error;
pub mod freq_table;
pub mod hop_seq;
pub mod net;
pub mod scheduler;
pub mod task;
pub mod timing;

pub use error::PlanError;
pub use freq_table::{FreqPair, FrequencyPlan, FrequencyTable, ProhibitedRange};
pub use hop_seq::{interleave, HopPolicy, HopSequence, HopStats, HopStep, ScrubReport};
pub use net::{NetConfig, NodeRole, BROADCAST_ID, NULL_ID};
pub use scheduler::{HeartbeatActivity, Schedule, Scheduler};
pub use task::{RfTask, ScheduleMode, TaskAction};
pub use timing::{TimingBudget, TimingConfig, MAX_CONTINUOUS_SLOTS};
