//! Run-time manager

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

/// Milestones of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppReport {
    Started,
    InitDone,
    SwitchedToNormal { node: u8 },
    SwitchedToAntiJam { node: u8 },
    ScheduleCount { node: u8, schedules: u64 },
    RunComplete,
    FinalizationDone,
}

impl fmt::Display for AppReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppReport::Started => write!(f, "started"),
            AppReport::InitDone => write!(f, "initialization done"),
            AppReport::SwitchedToNormal { node } => write!(f, "node {} switched to normal mode", node),
            AppReport::SwitchedToAntiJam { node } => {
                write!(f, "node {} switched to anti-jam mode", node)
            }
            AppReport::ScheduleCount { node, schedules } => {
                write!(f, "node {} ran {} schedules", node, schedules)
            }
            AppReport::RunComplete => write!(f, "run complete"),
            AppReport::FinalizationDone => write!(f, "finalization done"),
        }
    }
}

/// Tracks the run time and manual termination
///
/// Cloning shares the termination flag, which is also the drain flag
/// handed to every node.
#[derive(Debug, Clone)]
pub struct AppManager {
    run_time: Duration,
    started: Instant,
    terminated: Arc<AtomicBool>,
}

impl AppManager {
    pub fn new(run_time: Duration) -> Self {
        Self {
            run_time,
            started: Instant::now(),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn run_time(&self) -> Duration {
        self.run_time
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Flag set by [`AppManager::terminate`]
    pub fn termination_flag(&self) -> Arc<AtomicBool> {
        self.terminated.clone()
    }

    /// Stop the run at the next slot boundary
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }

    /// False once the run time has expired or the run was terminated
    pub fn is_continuing(&self) -> bool {
        !self.is_terminated() && self.elapsed() < self.run_time
    }

    pub fn report(&self, report: AppReport) {
        info!("[{:>8.3}s] {}", self.elapsed().as_secs_f64(), report);
    }
}
