//! Link event stream
//!
//! The epoch driver reports schedule runs, mode switches, RF errors,
//! allocation changes and batch summaries as events. Each event renders as a
//! single log line; nothing reads them back.

use std::fmt;

use hop_plan::ScheduleMode;

use crate::frontend::HardwareErrorRecord;
use crate::throughput::BatchSummary;

/// Where an allocation change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    /// Chosen by the local anti-jam controller
    Local,
    /// Announced by another node
    Received { from_epoch: u64 },
}

/// Events emitted by a [`LinkNode`](crate::node::LinkNode)
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A schedule finished running
    ScheduleRun {
        node: u8,
        epoch: u64,
        mode: ScheduleMode,
        slots: usize,
    },

    /// The heartbeat policy changed the operating mode
    ModeSwitched { node: u8, epoch: u64, to: ScheduleMode },

    /// A burst or retune failed
    RfError { node: u8, record: HardwareErrorRecord },

    /// A new subcarrier allocation was installed
    AllocationChanged {
        node: u8,
        version: u64,
        source: AllocationSource,
        description: String,
    },

    /// Per-epoch counters
    Batch { node: u8, summary: BatchSummary },
}

impl LinkEvent {
    /// Node that emitted the event
    pub fn node(&self) -> u8 {
        match self {
            LinkEvent::ScheduleRun { node, .. }
            | LinkEvent::ModeSwitched { node, .. }
            | LinkEvent::RfError { node, .. }
            | LinkEvent::AllocationChanged { node, .. }
            | LinkEvent::Batch { node, .. } => *node,
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::ScheduleRun {
                node,
                epoch,
                mode,
                slots,
            } => write!(f, "[{}] SCHEDULE epoch={} mode={} slots={}", node, epoch, mode, slots),
            LinkEvent::ModeSwitched { node, epoch, to } => {
                write!(f, "[{}] MODE epoch={} -> {}", node, epoch, to)
            }
            LinkEvent::RfError { node, record } => write!(f, "[{}] RF {}", node, record),
            LinkEvent::AllocationChanged {
                node,
                version,
                source,
                description,
            } => {
                let source = match source {
                    AllocationSource::Local => "local".to_string(),
                    AllocationSource::Received { from_epoch } => {
                        format!("received@{}", from_epoch)
                    }
                };
                write!(f, "[{}] ALLOC v{} {} {}", node, version, source, description)
            }
            LinkEvent::Batch { node, summary } => write!(f, "[{}] BATCH {}", node, summary),
        }
    }
}
