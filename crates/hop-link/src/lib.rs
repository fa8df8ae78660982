//! Link Runtime Library
//!
//! This crate runs the link layer of one node of a hopping radio net on top
//! of the plans produced by `hop-plan`:
//!
//! - **Dispatcher**: executes every slot as a retune-then-burst unit per side,
//!   both sides joined before the next slot
//! - **MAC**: frame building, type dispatch, frame and link counters
//! - **Heartbeat**: classifies heartbeat opportunities and selects normal
//!   (FDD) or anti-jam (FH) mode
//! - **Anti-jam**: sweeps a null hole across the subcarrier allocation while
//!   throughput is low
//! - **Node**: the per-node epoch driver tying it all together
//!
//! Hardware and modem are reached through the [`FrontEnd`] and
//! [`ModemFactory`] traits; the `hop-sim` crate provides simulated versions.
//!
//! # Example
//!
//! ```rust
//! use hop_link::{AntiJamConfig, AntiJamController, EpochObservation};
//! use hop_plan::NodeRole;
//!
//! let mut controller = AntiJamController::new(AntiJamConfig::default(), NodeRole::Mobile);
//! let actions = controller.step(&EpochObservation {
//!     now: 5.0,
//!     throughput_kbps: 0.0,
//!     valid_payloads: 10,
//!     epoch: 5,
//! });
//! assert!(!actions.is_empty());
//! ```

pub mod allocation;
pub mod anti_jam;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod frame;
pub mod frontend;
pub mod heartbeat;
pub mod mac;
pub mod modem;
pub mod node;
pub mod throughput;

pub use allocation::{SubcarrierAllocation, SubcarrierKind, NUM_SUBCARRIERS};
pub use anti_jam::{AntiJamAction, AntiJamConfig, AntiJamController, AntiJamState, EpochObservation};
pub use dispatcher::{
    task_report, BurstOutcome, RxBurstReport, SlotOutcome, SlotRequest, TaskDispatcher,
    TuneTarget, TxBurstReport, TxPayload,
};
pub use error::{FrontEndError, LinkError};
pub use events::{AllocationSource, LinkEvent};
pub use frame::{
    FragmentHeader, Frame, FrameHeader, FrameType, HEADER_DEFAULT_SIZE, HEADER_MAX_SIZE,
    PAYLOAD_DEFAULT_SIZE, PAYLOAD_MAX_SIZE,
};
pub use frontend::{
    calibrate_noise_threshold, mean_magnitude, probe_tuning_defect, trailing_noise_is_high,
    FrontEnd, HardwareErrorRecord, HardwareStats, Sample, Side, SideStats,
};
pub use heartbeat::{
    HeartbeatClass, HeartbeatConfig, HeartbeatMonitor, HeartbeatPolicy, HeartbeatWindow,
    SessionHeartbeatStats, WINDOW_ASSESSMENTS,
};
pub use mac::{
    FrameStats, LinkCounters, MacConfig, MacEvent, MacLayer, PacketStatus, PacketStore,
    StoredFrame,
};
pub use modem::{
    DetectedFrame, FrameGenerator, FrameSink, FrameSynchronizer, GeneratorStage, ModemFactory,
    ModemHandle, SignalStats, SynchronizerStage, Versioned,
};
pub use node::{EpochReport, LinkConfig, LinkNode};
pub use throughput::{BatchSummary, BatchTracker, ThroughputMeter};
