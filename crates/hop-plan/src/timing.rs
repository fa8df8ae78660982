//! Guard-banded slot timing
//!
//! Every duration here is in seconds. The budget is derived once from the
//! measured front-end sample rates and the net size, and it decides how many
//! slots fit into one epoch (one second less the 1PPS guard).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::task::ScheduleMode;

/// Largest continuous-mode schedule
pub const MAX_CONTINUOUS_SLOTS: usize = 40;

/// Timing inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Measured receive sample rate (samples/s)
    pub rx_rate: f64,
    /// Measured transmit sample rate (samples/s)
    pub tx_rate: f64,
    /// Samples in one transmit burst
    pub tx_burst_length: u64,
    /// Front-end retune settling delay
    pub retune_delay: f64,
    /// Guard before the transmit burst
    pub guard_begin: f64,
    /// Nominal guard after the transmit burst (re-derived)
    pub guard_end: f64,
    /// End-of-slot margin in FDD mode
    pub fdd_endslot_margin: f64,
    /// End-of-slot margin in FH mode
    pub fh_endslot_margin: f64,
    /// Time reserved at the end of every second
    pub pps_guard: f64,
    /// Initial continuous-mode schedule size
    pub continuous_size: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rx_rate: 5e6,
            tx_rate: 5e6,
            tx_burst_length: 10_000,
            retune_delay: 1.4e-3,
            guard_begin: 1.715e-4,
            guard_end: 1.715e-4,
            fdd_endslot_margin: 1.2e-3,
            fh_endslot_margin: 1.8e-3,
            pps_guard: 10e-3,
            continuous_size: MAX_CONTINUOUS_SLOTS,
        }
    }
}

/// Derived intra- and inter-slot timing
#[derive(Debug, Clone, PartialEq)]
pub struct TimingBudget {
    /// Retune delay
    pub tune: f64,
    /// Guard before the transmit burst
    pub guard_begin: f64,
    /// Transmit burst duration
    pub tx_burst: f64,
    /// Guard after the burst, re-derived to fill the receive dwell exactly
    pub guard_end: f64,
    /// Receive dwell
    pub rx_dwell: f64,
    /// Samples requested per receive burst
    pub rx_samples: usize,
    /// FDD end-of-slot margin
    pub fdd_endslot_margin: f64,
    /// FH end-of-slot margin
    pub fh_endslot_margin: f64,
    /// 1PPS guard
    pub pps_guard: f64,
    /// FDD slot duration
    pub fdd_slot: f64,
    /// FDD net period
    pub fdd_net: f64,
    /// Whole FDD net periods per second
    pub fdd_nets_per_sec: usize,
    /// Unused time per second in FDD mode
    pub fdd_margin_per_sec: f64,
    /// FH slot duration
    pub fh_slot: f64,
    /// FH net period
    pub fh_net: f64,
    /// Whole FH net periods per second
    pub fh_nets_per_sec: usize,
    /// Unused time per second in FH mode
    pub fh_margin_per_sec: f64,
}

impl TimingBudget {
    /// Derive the budget for a net with `slots_per_net` slots per period
    pub fn new(config: &TimingConfig, slots_per_net: usize) -> Result<Self, PlanError> {
        if !(config.rx_rate > 0.0 && config.tx_rate > 0.0) {
            return Err(PlanError::InvalidParameter(format!(
                "sample rates must be positive (rx {}, tx {})",
                config.rx_rate, config.tx_rate
            )));
        }
        if config.tx_burst_length == 0 {
            return Err(PlanError::InvalidParameter("tx burst length is zero".into()));
        }
        if slots_per_net == 0 {
            return Err(PlanError::InvalidParameter("net period has no slots".into()));
        }

        let guard_begin = config.guard_begin;
        let tx_burst = config.tx_burst_length as f64 / config.tx_rate;
        let rx_samples = (config.rx_rate * (guard_begin + tx_burst + config.guard_end)).ceil();
        let rx_dwell = rx_samples / config.rx_rate;
        let guard_end = rx_dwell - guard_begin - tx_burst;

        let fdd_slot = rx_dwell + config.fdd_endslot_margin;
        let fdd_net = fdd_slot * slots_per_net as f64;
        if (1.0 - fdd_net) < config.pps_guard {
            return Err(PlanError::InfeasibleTiming {
                mode: ScheduleMode::Fdd,
                net_period: fdd_net,
                pps_guard: config.pps_guard,
            });
        }
        let fdd_nets_per_sec = ((1.0 - config.pps_guard) / fdd_net).floor() as usize;

        let fh_slot = config.retune_delay + rx_dwell + config.fh_endslot_margin;
        let fh_net = fh_slot * slots_per_net as f64;
        if (1.0 - fh_net) < config.pps_guard {
            return Err(PlanError::InfeasibleTiming {
                mode: ScheduleMode::Fh,
                net_period: fh_net,
                pps_guard: config.pps_guard,
            });
        }
        let fh_nets_per_sec = ((1.0 - config.pps_guard) / fh_net).floor() as usize;

        Ok(Self {
            tune: config.retune_delay,
            guard_begin,
            tx_burst,
            guard_end,
            rx_dwell,
            rx_samples: rx_samples as usize,
            fdd_endslot_margin: config.fdd_endslot_margin,
            fh_endslot_margin: config.fh_endslot_margin,
            pps_guard: config.pps_guard,
            fdd_slot,
            fdd_net,
            fdd_nets_per_sec,
            fdd_margin_per_sec: 1.0 - fdd_nets_per_sec as f64 * fdd_net,
            fh_slot,
            fh_net,
            fh_nets_per_sec,
            fh_margin_per_sec: 1.0 - fh_nets_per_sec as f64 * fh_net,
        })
    }

    /// Gap between the end of one FH receive dwell and the start of the next
    pub fn fh_interdwell_spacing(&self) -> f64 {
        self.tune + self.guard_begin + self.guard_end + self.fh_endslot_margin
    }
}

impl fmt::Display for TimingBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Timing values")?;
        writeln!(f, "  intraslot:")?;
        writeln!(f, "    tune               : {:e}", self.tune)?;
        writeln!(f, "    guard begin        : {:e}", self.guard_begin)?;
        writeln!(f, "    tx burst           : {:e}", self.tx_burst)?;
        writeln!(f, "    guard end          : {:e}", self.guard_end)?;
        writeln!(f, "    rx dwell           : {:e}", self.rx_dwell)?;
        writeln!(f, "    rx samples         : {}", self.rx_samples)?;
        writeln!(f, "    fdd endslot margin : {:e}", self.fdd_endslot_margin)?;
        writeln!(f, "    fh endslot margin  : {:e}", self.fh_endslot_margin)?;
        writeln!(f, "  interslot:")?;
        writeln!(f, "    1pps guard         : {:e}", self.pps_guard)?;
        writeln!(f, "    fdd slot           : {:e}", self.fdd_slot)?;
        writeln!(f, "    fdd net            : {:e}", self.fdd_net)?;
        writeln!(f, "    fdd nets/s         : {}", self.fdd_nets_per_sec)?;
        writeln!(f, "    fdd margin/s       : {:e}", self.fdd_margin_per_sec)?;
        writeln!(f, "    fh slot            : {:e}", self.fh_slot)?;
        writeln!(f, "    fh net             : {:e}", self.fh_net)?;
        writeln!(f, "    fh nets/s          : {}", self.fh_nets_per_sec)?;
        write!(f, "    fh margin/s        : {:e}", self.fh_margin_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_end_fills_dwell() {
        let budget = TimingBudget::new(&TimingConfig::default(), 2).unwrap();
        let sum = budget.guard_begin + budget.tx_burst + budget.guard_end;
        assert!((sum - budget.rx_dwell).abs() < 1e-12);
        assert_eq!(budget.rx_samples as f64, (budget.rx_dwell * 5e6).round());
    }

    #[test]
    fn test_nets_per_second_fit_budget() {
        let budget = TimingBudget::new(&TimingConfig::default(), 2).unwrap();
        assert!(budget.fdd_nets_per_sec >= 1);
        assert!(budget.fdd_nets_per_sec as f64 * budget.fdd_net <= 1.0 - budget.pps_guard);
        assert!(budget.fh_nets_per_sec as f64 * budget.fh_net <= 1.0 - budget.pps_guard);
        assert!(budget.fh_slot > budget.fdd_slot);
    }

    #[test]
    fn test_rejects_zero_rates() {
        let config = TimingConfig {
            rx_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            TimingBudget::new(&config, 2),
            Err(PlanError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_interdwell_spacing() {
        let budget = TimingBudget::new(&TimingConfig::default(), 2).unwrap();
        let expected =
            budget.tune + budget.guard_begin + budget.guard_end + budget.fh_endslot_margin;
        assert_eq!(budget.fh_interdwell_spacing(), expected);
    }
}
