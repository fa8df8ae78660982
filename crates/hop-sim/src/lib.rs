//! Hopping Radio Simulation Library
//!
//! This crate stands in for the hardware and modem so a whole net can run
//! in one process:
//!
//! - **SimAir**: shared medium with an optional narrowband jammer
//! - **SimFrontEnd**: timed front end with optional pacing, a switchable
//!   tuning defect and fault injection
//! - **SimModemFactory**: sample-level frame carrier that honours subcarrier
//!   allocations and the jammer
//! - **MemoryPacketStore**: in-memory fragmentation and reassembly
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use hop_link::{probe_tuning_defect, FrontEnd, Sample};
//! use hop_sim::{SimAir, SimFrontEnd};
//!
//! let air = Arc::new(SimAir::default());
//! let a = SimFrontEnd::new(1, air.clone());
//! let b = SimFrontEnd::new(2, air.clone());
//! assert!(!probe_tuning_defect(&a).unwrap());
//!
//! a.issue_timed_transmit(0.0, &[Sample::new(1.0, 0.0)]).unwrap();
//! assert_eq!(air.pending(2), 1);
//! assert_eq!(b.issue_timed_receive(0.0, 256).unwrap().len(), 256);
//! ```

pub mod air;
pub mod frontend;
pub mod modem;
pub mod store;

pub use air::{AirBurst, JammerConfig, SimAir, DEFAULT_NOISE_FLOOR};
pub use frontend::{SimFrontEnd, TuneRecord};
pub use modem::{fingerprint, SimModemFactory};
pub use store::{MemoryPacketStore, SharedPacketStore};
