//! Heartbeat classification and mode-selection policy
//!
//! Every expected heartbeat opportunity is classified as valid, missing,
//! errored or jammed. Assessments run once per epoch; after
//! [`WINDOW_ASSESSMENTS`] of them the window is scored by the active policy,
//! folded into the session totals, and reset.

use std::fmt;

use hop_plan::HeartbeatActivity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Assessments per scoring window
pub const WINDOW_ASSESSMENTS: u32 = 3;

/// How heartbeat statistics select the operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeartbeatPolicy {
    /// Always normal (FDD)
    LockedFdd,
    /// Always anti-jam (FH)
    LockedFh,
    /// Normal unless jamming dominates the usable samples
    #[default]
    PolicyA,
    /// Keep the current mode; an external controller decides
    PolicyB,
}

impl HeartbeatPolicy {
    /// Short name used in logs and settings files
    pub fn name(&self) -> &'static str {
        match self {
            HeartbeatPolicy::LockedFdd => "locked-fdd",
            HeartbeatPolicy::LockedFh => "locked-fh",
            HeartbeatPolicy::PolicyA => "policy-a",
            HeartbeatPolicy::PolicyB => "policy-b",
        }
    }
}

/// Heartbeat settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Where heartbeat slots sit in the schedule
    pub activity: HeartbeatActivity,
    pub policy: HeartbeatPolicy,
}

/// Outcome of one heartbeat opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatClass {
    /// A frame decoded cleanly
    Valid,
    /// Nothing detected on a quiet channel
    Missing,
    /// A frame was detected but did not decode, channel quiet
    Errored,
    /// Trailing noise above the threshold with no clean frame
    Jammed,
}

impl HeartbeatClass {
    /// Classify an opportunity from what the receive burst saw
    pub fn classify(detected: bool, valid: bool, noisy: bool) -> Self {
        match (detected, valid, noisy) {
            (false, _, true) => HeartbeatClass::Jammed,
            (false, _, false) => HeartbeatClass::Missing,
            (true, false, true) => HeartbeatClass::Jammed,
            (true, false, false) => HeartbeatClass::Errored,
            (true, true, _) => HeartbeatClass::Valid,
        }
    }
}

/// Counters over one scoring window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatWindow {
    /// Heartbeat slots sampled so far
    pub opportunities: u32,
    pub missing: u32,
    pub valid: u32,
    pub errored: u32,
    pub jammed: u32,
}

impl HeartbeatWindow {
    /// Count one classified opportunity
    pub fn record(&mut self, class: HeartbeatClass) {
        self.opportunities += 1;
        match class {
            HeartbeatClass::Valid => self.valid += 1,
            HeartbeatClass::Missing => self.missing += 1,
            HeartbeatClass::Errored => self.errored += 1,
            HeartbeatClass::Jammed => self.jammed += 1,
        }
    }

    /// Policy A verdict: `Some(true)` for normal, `None` when too few samples
    pub fn policy_a_selects_normal(&self) -> Option<bool> {
        if self.opportunities < 2 {
            return None;
        }
        let usable = self
            .opportunities
            .saturating_sub(self.missing)
            .saturating_sub(self.errored);
        Some(2 * self.jammed <= usable)
    }
}

/// Cumulative heartbeat totals for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionHeartbeatStats {
    /// Windows scored and folded in
    pub windows: u64,
    /// Opportunities over all scored windows
    pub opportunities: u64,
    pub missing: u64,
    pub valid: u64,
    pub errored: u64,
    pub jammed: u64,
}

impl SessionHeartbeatStats {
    fn fold(&mut self, window: &HeartbeatWindow) {
        self.windows += 1;
        self.opportunities += u64::from(window.opportunities);
        self.missing += u64::from(window.missing);
        self.valid += u64::from(window.valid);
        self.errored += u64::from(window.errored);
        self.jammed += u64::from(window.jammed);
    }
}

impl fmt::Display for SessionHeartbeatStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Heartbeat windows:       {}", self.windows)?;
        writeln!(f, "Heartbeat opportunities: {}", self.opportunities)?;
        writeln!(f, "  valid:   {}", self.valid)?;
        writeln!(f, "  missing: {}", self.missing)?;
        writeln!(f, "  errored: {}", self.errored)?;
        write!(f, "  jammed:  {}", self.jammed)
    }
}

/// Heartbeat sampling and mode selection
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    window: HeartbeatWindow,
    session: SessionHeartbeatStats,
    assessments: u32,
    selects_normal: bool,
}

impl HeartbeatMonitor {
    /// Fresh monitor; starts in normal mode unless the policy locks FH
    pub fn new(config: HeartbeatConfig) -> Self {
        let selects_normal = config.policy != HeartbeatPolicy::LockedFh;
        Self {
            config,
            window: HeartbeatWindow::default(),
            session: SessionHeartbeatStats::default(),
            assessments: 0,
            selects_normal,
        }
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.config
    }

    /// Classify and record one heartbeat opportunity
    ///
    /// `detected` means the burst held a frame, `valid` that it decoded,
    /// `noisy` that the trailing noise exceeded the threshold.
    pub fn record(&mut self, detected: bool, valid: bool, noisy: bool) -> HeartbeatClass {
        let class = HeartbeatClass::classify(detected, valid, noisy);
        debug!("Heartbeat opportunity: {:?}", class);
        self.window.record(class);
        class
    }

    /// Run the once-per-epoch assessment; returns whether normal mode is
    /// selected afterwards
    ///
    /// `waveform_is_normal` is the mode the epoch just ran in.
    pub fn assess(&mut self, waveform_is_normal: bool) -> bool {
        if self.config.activity == HeartbeatActivity::None {
            return self.selects_normal;
        }
        self.assessments += 1;
        if self.assessments < WINDOW_ASSESSMENTS {
            return self.selects_normal;
        }

        let previous = self.selects_normal;
        self.selects_normal = match self.config.policy {
            HeartbeatPolicy::LockedFdd => true,
            HeartbeatPolicy::LockedFh => false,
            HeartbeatPolicy::PolicyA => self
                .window
                .policy_a_selects_normal()
                .unwrap_or(waveform_is_normal),
            HeartbeatPolicy::PolicyB => waveform_is_normal,
        };
        if previous != self.selects_normal {
            info!(
                "Heartbeat policy {} selects {} mode ({:?})",
                self.config.policy.name(),
                if self.selects_normal { "normal" } else { "anti-jam" },
                self.window
            );
        }

        self.session.fold(&self.window);
        self.window = HeartbeatWindow::default();
        self.assessments = 0;
        self.selects_normal
    }

    /// Mode chosen by the last scored window
    pub fn selects_normal_mode(&self) -> bool {
        self.selects_normal
    }

    /// The window being filled
    pub fn window(&self) -> &HeartbeatWindow {
        &self.window
    }

    /// Totals over every scored window
    pub fn session(&self) -> &SessionHeartbeatStats {
        &self.session
    }
}
