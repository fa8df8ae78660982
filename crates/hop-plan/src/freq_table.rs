//! Hopping frequency tables
//!
//! Tuning is split into two stages: a coarse RF stage that the front end's
//! synthesizer settles to, and a fine baseband offset applied digitally. The
//! RF table holds evenly spaced windows across the hopping range with any
//! window whose transmit or receive image touches a prohibited range removed.
//! The baseband table holds symmetric offsets around zero inside one window.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PlanError;
use crate::net::NodeRole;

/// A `[begin, end)` range of frequencies that must not be used
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProhibitedRange {
    /// Lower edge (Hz)
    pub begin: f64,
    /// Upper edge (Hz)
    pub end: f64,
}

impl ProhibitedRange {
    /// Create a prohibited range
    pub fn new(begin: f64, end: f64) -> Self {
        Self { begin, end }
    }
}

/// Frequency plan inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyPlan {
    /// Center frequency used in FDD mode (Hz)
    pub normal_freq: f64,
    /// Fixed transmit-to-receive separation (Hz)
    pub separation: f64,
    /// Lower edge of the hopping range (Hz)
    pub fh_freq_min: f64,
    /// Upper edge of the hopping range (Hz)
    pub fh_freq_max: f64,
    /// Width of one RF-stage window (Hz)
    pub window_medium: f64,
    /// Width of one baseband-stage step (Hz)
    pub window_small: f64,
    /// Ranges no transmit or receive window may overlap
    pub prohibited: Vec<ProhibitedRange>,
}

impl Default for FrequencyPlan {
    fn default() -> Self {
        Self {
            normal_freq: 2.5e9,
            separation: 20e6,
            fh_freq_min: 400e6,
            fh_freq_max: 4400e6,
            window_medium: 20e6,
            window_small: 1e6,
            prohibited: Vec::new(),
        }
    }
}

/// A receive/transmit frequency pair
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FreqPair {
    /// Receive frequency (Hz)
    pub rx: f64,
    /// Transmit frequency (Hz)
    pub tx: f64,
}

impl FreqPair {
    /// Create a pair
    pub fn new(rx: f64, tx: f64) -> Self {
        Self { rx, tx }
    }
}

/// RF and baseband tuning tables for one node
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    role: NodeRole,
    tuning_defect: bool,
    fdd: FreqPair,
    rf: Vec<FreqPair>,
    baseband: Vec<FreqPair>,
}

impl FrequencyTable {
    /// Build both tables
    ///
    /// `tuning_defect` selects the antisymmetric baseband table that
    /// compensates a front end whose receive tuning applies the baseband
    /// offset with the wrong sign.
    pub fn generate(
        plan: &FrequencyPlan,
        role: NodeRole,
        tuning_defect: bool,
    ) -> Result<Self, PlanError> {
        if !(plan.window_medium > 0.0 && plan.window_small > 0.0) {
            return Err(PlanError::InvalidParameter(format!(
                "window sizes must be positive (medium {}, small {})",
                plan.window_medium, plan.window_small
            )));
        }
        if plan.fh_freq_max <= plan.fh_freq_min {
            return Err(PlanError::InvalidParameter(format!(
                "hopping range [{:e}, {:e}] is empty",
                plan.fh_freq_min, plan.fh_freq_max
            )));
        }

        let fdd = Self::oriented(role, plan.normal_freq, plan.separation);
        let rf = Self::rf_stage(plan, role)?;
        let baseband = Self::baseband_stage(plan, tuning_defect);

        debug!(
            "Frequency tables: {} rf windows, {} baseband offsets (defect={})",
            rf.len(),
            baseband.len(),
            tuning_defect
        );

        Ok(Self {
            role,
            tuning_defect,
            fdd,
            rf,
            baseband,
        })
    }

    /// Apply the tx/rx orientation for a role around a window center
    fn oriented(role: NodeRole, center: f64, separation: f64) -> FreqPair {
        match role {
            NodeRole::Basestation => FreqPair::new(center + separation, center),
            NodeRole::Mobile => FreqPair::new(center, center + separation),
        }
    }

    fn rf_stage(plan: &FrequencyPlan, role: NodeRole) -> Result<Vec<FreqPair>, PlanError> {
        let large = plan.fh_freq_max - plan.fh_freq_min;
        let count = (large / plan.window_medium).floor() as usize;
        let half = plan.window_medium / 2.0;
        let centers =
            (0..count).map(|i| plan.fh_freq_min + (i + 1) as f64 * plan.window_medium - half);

        if plan.prohibited.is_empty() {
            if count == 0 {
                return Err(PlanError::EmptyTable("rf"));
            }
            return Ok(centers
                .map(|c| Self::oriented(role, c, plan.separation))
                .collect());
        }

        let allowed: Vec<f64> = centers
            .filter(|c| Self::window_is_allowed(plan, *c))
            .collect();

        if allowed.len() <= 1 {
            for p in &plan.prohibited {
                warn!("Blocked range ({:e}, {:e})", p.begin, p.end);
            }
            return Err(PlanError::InsufficientFrequencies {
                allowed: allowed.len(),
            });
        }

        Ok(allowed
            .into_iter()
            .map(|c| Self::oriented(role, c, plan.separation))
            .collect())
    }

    fn baseband_stage(plan: &FrequencyPlan, tuning_defect: bool) -> Vec<FreqPair> {
        let mut count = (plan.window_medium / plan.window_small).floor() as usize;
        let mut offsets = count / 2;
        // Force an odd count so the table is symmetric around index 0
        if count % 2 == 0 && count > 0 {
            count -= 1;
            offsets = offsets.saturating_sub(1);
        }

        let mut table = vec![FreqPair::default(); count.max(1)];
        if offsets < 1 {
            warn!("Baseband window too small to produce useful tuning offsets");
            return table;
        }

        for k in 1..=offsets {
            let step = k as f64 * plan.window_small;
            if tuning_defect {
                table[k] = FreqPair::new(-step, step);
                table[k + offsets] = FreqPair::new(step, -step);
            } else {
                table[k] = FreqPair::new(step, step);
                table[k + offsets] = FreqPair::new(-step, -step);
            }
        }
        table
    }

    /// Whether the window at `center` and its image one separation above
    /// both lie on the same side of every prohibited range
    pub fn window_is_allowed(plan: &FrequencyPlan, center: f64) -> bool {
        let half = plan.window_medium / 2.0;
        let (tx_begin, tx_end) = (center - half, center + half);
        let (rx_begin, rx_end) = (tx_begin + plan.separation, tx_end + plan.separation);
        plan.prohibited.iter().all(|p| {
            (tx_begin >= p.end && rx_begin >= p.end) || (tx_end <= p.begin && rx_end <= p.begin)
        })
    }

    /// Role the tables were oriented for
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Whether the antisymmetric baseband table is in use
    pub fn tuning_defect(&self) -> bool {
        self.tuning_defect
    }

    /// FDD ("home") RF frequencies; the baseband offset is zero in FDD mode
    pub fn fdd(&self) -> FreqPair {
        self.fdd
    }

    /// RF table size
    pub fn rf_len(&self) -> usize {
        self.rf.len()
    }

    /// Baseband table size
    pub fn baseband_len(&self) -> usize {
        self.baseband.len()
    }

    /// RF table entry
    pub fn rf(&self, index: usize) -> Result<FreqPair, PlanError> {
        self.rf.get(index).copied().ok_or(PlanError::IndexOutOfRange {
            table: "rf",
            index,
            len: self.rf.len(),
        })
    }

    /// Baseband table entry
    pub fn baseband(&self, index: usize) -> Result<FreqPair, PlanError> {
        self.baseband
            .get(index)
            .copied()
            .ok_or(PlanError::IndexOutOfRange {
                table: "baseband",
                index,
                len: self.baseband.len(),
            })
    }

    /// Iterate RF entries
    pub fn rf_entries(&self) -> &[FreqPair] {
        &self.rf
    }

    /// Iterate baseband entries
    pub fn baseband_entries(&self) -> &[FreqPair] {
        &self.baseband
    }
}

impl fmt::Display for FrequencyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Frequency tables")?;
        writeln!(f, "FDD: rx {:e} tx {:e}", self.fdd.rx, self.fdd.tx)?;
        writeln!(f, "RF stage, {} entries", self.rf.len())?;
        writeln!(f, "    Index   Rx            Tx")?;
        for (i, p) in self.rf.iter().enumerate() {
            writeln!(f, "    {:>5}   {:<12.6e}  {:<12.6e}", i, p.rx, p.tx)?;
        }
        writeln!(f, "Baseband stage, {} entries", self.baseband.len())?;
        writeln!(f, "    Index   Rx            Tx")?;
        for (i, p) in self.baseband.iter().enumerate() {
            writeln!(f, "    {:>5}   {:<12.6e}  {:<12.6e}", i, p.rx, p.tx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_has_200_windows() {
        let table =
            FrequencyTable::generate(&FrequencyPlan::default(), NodeRole::Mobile, false).unwrap();
        assert_eq!(table.rf_len(), 200);
        assert_eq!(table.rf(0).unwrap(), FreqPair::new(410e6, 430e6));
    }

    #[test]
    fn test_roles_swap_orientation() {
        let plan = FrequencyPlan::default();
        let bs = FrequencyTable::generate(&plan, NodeRole::Basestation, false).unwrap();
        let mobile = FrequencyTable::generate(&plan, NodeRole::Mobile, false).unwrap();
        assert_eq!(bs.rf(5).unwrap().rx, mobile.rf(5).unwrap().tx);
        assert_eq!(bs.rf(5).unwrap().tx, mobile.rf(5).unwrap().rx);
        assert_eq!(bs.fdd(), FreqPair::new(2.52e9, 2.5e9));
        assert_eq!(mobile.fdd(), FreqPair::new(2.5e9, 2.52e9));
    }

    #[test]
    fn test_baseband_forced_odd() {
        // 20 steps -> 19 entries, 9 offsets each side
        let table =
            FrequencyTable::generate(&FrequencyPlan::default(), NodeRole::Mobile, false).unwrap();
        assert_eq!(table.baseband_len(), 19);
        assert_eq!(table.baseband(0).unwrap(), FreqPair::new(0.0, 0.0));
        assert_eq!(table.baseband(9).unwrap(), FreqPair::new(9e6, 9e6));
        assert_eq!(table.baseband(10).unwrap(), FreqPair::new(-1e6, -1e6));

        let plan = FrequencyPlan {
            window_medium: 21e6,
            ..Default::default()
        };
        let table = FrequencyTable::generate(&plan, NodeRole::Mobile, false).unwrap();
        assert_eq!(table.baseband_len(), 21);
    }

    #[test]
    fn test_defect_flips_receive_side() {
        let plan = FrequencyPlan::default();
        let table = FrequencyTable::generate(&plan, NodeRole::Mobile, true).unwrap();
        assert_eq!(table.baseband(1).unwrap(), FreqPair::new(-1e6, 1e6));
        assert_eq!(table.baseband(10).unwrap(), FreqPair::new(1e6, -1e6));
        assert!(table.tuning_defect());
    }

    #[test]
    fn test_tiny_baseband_window_keeps_zero_offset() {
        let plan = FrequencyPlan {
            window_small: 30e6,
            ..Default::default()
        };
        let table = FrequencyTable::generate(&plan, NodeRole::Mobile, false).unwrap();
        assert_eq!(table.baseband_len(), 1);
        assert_eq!(table.baseband(0).unwrap(), FreqPair::default());
    }

    #[test]
    fn test_prohibited_range_removes_windows() {
        let plan = FrequencyPlan {
            prohibited: vec![ProhibitedRange::new(1000e6, 1100e6)],
            ..Default::default()
        };
        let table = FrequencyTable::generate(&plan, NodeRole::Mobile, false).unwrap();
        assert!(table.rf_len() < 200);
        for p in table.rf_entries() {
            let (rx_lo, rx_hi) = (p.rx - 10e6, p.rx + 10e6);
            let (tx_lo, tx_hi) = (p.tx - 10e6, p.tx + 10e6);
            assert!(rx_hi <= 1000e6 || rx_lo >= 1100e6);
            assert!(tx_hi <= 1000e6 || tx_lo >= 1100e6);
            assert!(FrequencyTable::window_is_allowed(&plan, p.rx));
        }
    }

    #[test]
    fn test_whole_band_prohibited_fails() {
        let plan = FrequencyPlan {
            prohibited: vec![ProhibitedRange::new(0.0, 10e9)],
            ..Default::default()
        };
        assert!(matches!(
            FrequencyTable::generate(&plan, NodeRole::Mobile, false),
            Err(PlanError::InsufficientFrequencies { allowed: 0 })
        ));
    }

    #[test]
    fn test_out_of_range_access() {
        let table =
            FrequencyTable::generate(&FrequencyPlan::default(), NodeRole::Mobile, false).unwrap();
        assert!(matches!(
            table.rf(200),
            Err(PlanError::IndexOutOfRange { table: "rf", index: 200, len: 200 })
        ));
        assert!(table.baseband(19).is_err());
    }
}
