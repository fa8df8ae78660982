//! Null-hole sweep controller
//!
//! While throughput stays below the jamming threshold the controller sweeps a
//! hole of null subcarriers across the band, alternating with a re-test of the
//! full band each time the sweep turns around. Once throughput recovers it
//! keeps the hole open for a dwell period, then restores the full band and
//! reverses the sweep direction for the next detection.
//!
//! The controller never touches the modem itself: each call to
//! [`AntiJamController::step`] returns the actions the epoch driver applies.

use std::fmt;

use hop_plan::{NodeRole, MAX_CONTINUOUS_SLOTS};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocation::SubcarrierAllocation;

/// Anti-jam settings; durations in seconds, widths in subcarriers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiJamConfig {
    pub enabled: bool,
    /// Throughput (kbps) below which the link counts as jammed
    pub jamming_threshold: f64,
    /// Dwell with good throughput before an open hole is closed
    pub close_hole_timeout: f64,
    /// Give up on a hole after this long with low throughput
    pub mitigation_timeout: Option<f64>,
    /// Cooldown before mitigation re-enables itself
    pub reenable_timeout: f64,
    /// Full-band keep-alive period while mitigation is disabled
    pub keepalive_interval: f64,
    /// This node announces allocations to the net
    pub broadcast_allocations: bool,
    /// Copies of each announcement
    pub broadcast_repeats: usize,
    pub hole_width: i32,
    pub hole_step: i32,
    /// Left edge at which the sweep turns back
    pub right_limit: i32,
    /// Continuous schedule size while sweeping
    pub sweep_size: usize,
    /// Continuous schedule size right after a full-band re-test
    pub probe_size: usize,
}

impl Default for AntiJamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jamming_threshold: 50.0,
            close_hole_timeout: 30.0,
            mitigation_timeout: None,
            reenable_timeout: 190.0,
            keepalive_interval: 1.0,
            broadcast_allocations: false,
            broadcast_repeats: 5,
            hole_width: 150,
            hole_step: 25,
            right_limit: 412,
            sweep_size: 5,
            probe_size: 10,
        }
    }
}

/// Sweep state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntiJamState {
    pub sweeping: bool,
    pub left_edge: i32,
    pub direction: i32,
    /// A hole is currently installed
    pub mitigation_running: bool,
    pub mitigation_enabled: bool,
    /// Reopen the hole at the same edge on the next sweep step
    pub resuming: bool,
    /// Re-test the full band before the next hole
    pub check_full_band: bool,
}

impl Default for AntiJamState {
    fn default() -> Self {
        Self {
            sweeping: true,
            left_edge: 0,
            direction: 1,
            mitigation_running: false,
            mitigation_enabled: true,
            resuming: false,
            check_full_band: true,
        }
    }
}

impl AntiJamState {
    /// Move the left edge after a hole was opened
    ///
    /// At or below 0 the sweep restarts forward from 0; at or beyond
    /// `right_limit` it turns back. Either way the next step re-tests the
    /// full band. Returns `true` when the edge stayed put because the
    /// controller is resuming.
    pub fn advance_edge(&mut self, step: i32, right_limit: i32) -> bool {
        if self.left_edge <= 0 {
            self.left_edge = 0;
            self.direction = 1;
            self.check_full_band = true;
        } else if self.left_edge >= right_limit {
            self.direction = -1;
            self.check_full_band = true;
        }

        if self.resuming {
            self.resuming = false;
            true
        } else {
            self.left_edge += step * self.direction;
            false
        }
    }
}

impl fmt::Display for AntiJamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sweeping={} left_edge={} dir={} running={} enabled={}",
            self.sweeping,
            self.left_edge,
            self.direction,
            self.mitigation_running,
            self.mitigation_enabled
        )
    }
}

/// What the controller saw at the end of an epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochObservation {
    /// Seconds since the run started
    pub now: f64,
    pub throughput_kbps: f64,
    /// Valid payloads received since the run started
    pub valid_payloads: u64,
    /// Epochs completed so far
    pub epoch: u64,
}

/// Something the epoch driver must do on the controller's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum AntiJamAction {
    /// Install an allocation locally
    Install(SubcarrierAllocation),
    /// Announce an allocation to the net
    Broadcast {
        allocation: SubcarrierAllocation,
        repeats: usize,
    },
    /// Resize the continuous schedule
    ResizeSchedule(usize),
}

/// Throughput-driven null-hole sweep
#[derive(Debug, Clone)]
pub struct AntiJamController {
    config: AntiJamConfig,
    role: NodeRole,
    full_band: SubcarrierAllocation,
    state: AntiJamState,
    mitigation_since: f64,
    good_since: f64,
    disabled_at: f64,
    last_keepalive: f64,
}

impl AntiJamController {
    pub fn new(config: AntiJamConfig, role: NodeRole) -> Self {
        Self {
            config,
            role,
            full_band: SubcarrierAllocation::full_band(),
            state: AntiJamState::default(),
            mitigation_since: 0.0,
            good_since: 0.0,
            disabled_at: 0.0,
            last_keepalive: 0.0,
        }
    }

    pub fn config(&self) -> &AntiJamConfig {
        &self.config
    }

    pub fn state(&self) -> AntiJamState {
        self.state
    }

    /// Run one control iteration
    pub fn step(&mut self, obs: &EpochObservation) -> Vec<AntiJamAction> {
        let mut actions = Vec::new();

        if !(self.config.enabled && self.state.mitigation_enabled) {
            self.idle_step(obs, &mut actions);
            return actions;
        }
        if obs.valid_payloads == 0 || self.role.is_basestation() || obs.epoch <= 3 {
            return actions;
        }

        if obs.throughput_kbps < self.config.jamming_threshold {
            if self.mitigation_timed_out(obs.now) {
                self.give_up(obs.now, &mut actions);
                return actions;
            }
            if !self.state.sweeping {
                info!(
                    "Throughput {:.1} kbps below {:.1}: switching to anti-jam sweep",
                    obs.throughput_kbps, self.config.jamming_threshold
                );
                self.mitigation_since = obs.now;
                self.state.mitigation_running = true;
            }
            self.state.sweeping = true;
            actions.push(AntiJamAction::ResizeSchedule(self.config.sweep_size));
            self.good_since = obs.now;
        } else {
            self.state.check_full_band = true;
            self.mitigation_since = obs.now;
            self.state.sweeping = false;
            actions.push(AntiJamAction::ResizeSchedule(MAX_CONTINUOUS_SLOTS));

            if self.state.mitigation_running
                && obs.now - self.good_since > self.config.close_hole_timeout
            {
                info!("Throughput recovered: closing null hole");
                self.restore_full_band(self.config.broadcast_repeats, &mut actions);
                self.state.mitigation_running = false;
                self.state.resuming = true;
                self.state.direction = -self.state.direction;
                actions.push(AntiJamAction::ResizeSchedule(MAX_CONTINUOUS_SLOTS));
            }
        }

        if self.state.sweeping {
            self.sweep_step(&mut actions);
        }
        actions
    }

    fn sweep_step(&mut self, actions: &mut Vec<AntiJamAction>) {
        if self.state.check_full_band {
            debug!("Re-testing full band");
            actions.push(AntiJamAction::Install(self.full_band.clone()));
            self.state.mitigation_running = false;
            self.state.check_full_band = false;
            actions.push(AntiJamAction::ResizeSchedule(self.config.probe_size));
            return;
        }

        let left = self.state.left_edge;
        let hole = self
            .full_band
            .with_null_hole(left, left + self.config.hole_width);
        debug!("Opening null hole at [{}, {}]", left, left + self.config.hole_width);
        if self.config.broadcast_allocations {
            actions.push(AntiJamAction::Broadcast {
                allocation: hole.clone(),
                repeats: self.config.broadcast_repeats,
            });
        }
        actions.push(AntiJamAction::Install(hole));
        self.state.mitigation_running = true;

        if self
            .state
            .advance_edge(self.config.hole_step, self.config.right_limit)
        {
            actions.push(AntiJamAction::ResizeSchedule(self.config.probe_size));
        }
    }

    fn mitigation_timed_out(&self, now: f64) -> bool {
        self.state.mitigation_running
            && self
                .config
                .mitigation_timeout
                .is_some_and(|timeout| now - self.mitigation_since > timeout)
    }

    /// Abandon the current hole and disable mitigation until the cooldown
    /// elapses
    fn give_up(&mut self, now: f64, actions: &mut Vec<AntiJamAction>) {
        info!(
            "Mitigation timed out; disabling anti-jam for {:.0} s",
            self.config.reenable_timeout
        );
        self.restore_full_band(1, actions);
        self.state.mitigation_running = false;
        self.state.resuming = true;
        self.state.direction = -self.state.direction;
        self.state.mitigation_enabled = false;
        self.state.sweeping = false;
        self.disabled_at = now;
        actions.push(AntiJamAction::ResizeSchedule(MAX_CONTINUOUS_SLOTS));
    }

    /// Keep-alive and re-enable handling while mitigation is off
    fn idle_step(&mut self, obs: &EpochObservation, actions: &mut Vec<AntiJamAction>) {
        if self.config.broadcast_allocations
            && obs.now - self.last_keepalive > self.config.keepalive_interval
        {
            debug!("Full-band keep-alive");
            actions.push(AntiJamAction::Broadcast {
                allocation: self.full_band.clone(),
                repeats: 1,
            });
            self.last_keepalive = obs.now;
        }
        if !self.state.mitigation_enabled && obs.now - self.disabled_at > self.config.reenable_timeout
        {
            info!("Re-enabling anti-jam mitigation");
            self.state.mitigation_enabled = true;
        }
    }

    fn restore_full_band(&self, repeats: usize, actions: &mut Vec<AntiJamAction>) {
        if self.config.broadcast_allocations {
            actions.push(AntiJamAction::Broadcast {
                allocation: self.full_band.clone(),
                repeats,
            });
        }
        actions.push(AntiJamAction::Install(self.full_band.clone()));
    }
}
