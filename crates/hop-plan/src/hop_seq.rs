//! Frequency-hopping sequences
//!
//! A hop sequence assigns every FH slot a pair of indices into the RF and
//! baseband frequency tables. The sequence never carries frequencies itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PlanError;

/// Tables smaller than this are permuted by simple reversal
const MIN_INTERLEAVE_SIZE: usize = 4;

/// Sequence generation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HopPolicy {
    /// Stay at (0, 0)
    None,
    /// Stay at (0, 1)
    One,
    /// RF 0, baseband alternating 1, 2
    Toggle,
    /// Ramp the RF index, baseband 0
    SweepRf,
    /// Ramp the baseband index, RF 0
    SweepBaseband,
    /// RF outer loop, baseband inner loop
    SweepRfBaseband,
    /// Baseband outer loop, RF inner loop
    SweepBasebandRf,
    /// Interleaved tables, RF outer loop
    #[default]
    RestartAlgA,
    /// Interleaved tables, baseband outer loop
    RestartAlgB,
    /// Leave the sequence untouched
    Test,
}

impl HopPolicy {
    /// Every policy, in declaration order
    pub const ALL: [HopPolicy; 10] = [
        HopPolicy::None,
        HopPolicy::One,
        HopPolicy::Toggle,
        HopPolicy::SweepRf,
        HopPolicy::SweepBaseband,
        HopPolicy::SweepRfBaseband,
        HopPolicy::SweepBasebandRf,
        HopPolicy::RestartAlgA,
        HopPolicy::RestartAlgB,
        HopPolicy::Test,
    ];

    /// Human-readable policy name
    pub fn name(&self) -> &'static str {
        match self {
            HopPolicy::None => "none",
            HopPolicy::One => "one",
            HopPolicy::Toggle => "toggle",
            HopPolicy::SweepRf => "sweep-rf",
            HopPolicy::SweepBaseband => "sweep-baseband",
            HopPolicy::SweepRfBaseband => "sweep-rf-baseband",
            HopPolicy::SweepBasebandRf => "sweep-baseband-rf",
            HopPolicy::RestartAlgA => "restart-alg-a",
            HopPolicy::RestartAlgB => "restart-alg-b",
            HopPolicy::Test => "test",
        }
    }
}

/// Table indices for one hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HopStep {
    /// Index into the RF table
    pub rf: usize,
    /// Index into the baseband table
    pub baseband: usize,
}

impl HopStep {
    /// Create a step
    pub fn new(rf: usize, baseband: usize) -> Self {
        Self { rf, baseband }
    }
}

/// Generation and scrub counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HopStats {
    /// Completed generations
    pub generations: u64,
    /// Scrub passes
    pub scrub_requests: u64,
    /// RF indices clamped by scrubbing
    pub repaired_rf: u64,
    /// Baseband indices clamped by scrubbing
    pub repaired_baseband: u64,
}

/// Result of one scrub pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrubReport {
    /// RF indices clamped in this pass
    pub repaired_rf: usize,
    /// Baseband indices clamped in this pass
    pub repaired_baseband: usize,
}

impl ScrubReport {
    /// Whether anything was repaired
    pub fn is_clean(&self) -> bool {
        self.repaired_rf == 0 && self.repaired_baseband == 0
    }
}

/// Row-column interleaver permutation of `0..size`
///
/// Indices are laid out row-major in a `stride x stride` grid
/// (`stride = ceil(sqrt(size))`) and read back column by column; cells past
/// the end of the table are skipped. Tables smaller than 4 are reversed.
pub fn interleave(size: usize) -> Vec<usize> {
    if size < MIN_INTERLEAVE_SIZE {
        return (0..size).rev().collect();
    }
    let stride = (size as f64).sqrt().ceil() as usize;
    let mut order = Vec::with_capacity(size);
    for column in 0..stride {
        for row in 0..stride {
            let pick = row * stride + column;
            if pick < size {
                order.push(pick);
            }
        }
    }
    order
}

/// Per-slot hop indices for FH mode
#[derive(Debug, Clone)]
pub struct HopSequence {
    policy: HopPolicy,
    rf_len: usize,
    baseband_len: usize,
    steps: Vec<HopStep>,
    stats: HopStats,
}

impl HopSequence {
    /// Create a sequence of `num_steps` entries, all (0, 0) until generated
    pub fn new(
        policy: HopPolicy,
        num_steps: usize,
        rf_len: usize,
        baseband_len: usize,
    ) -> Result<Self, PlanError> {
        Self::check_sizes(rf_len, baseband_len)?;
        Ok(Self {
            policy,
            rf_len,
            baseband_len,
            steps: vec![HopStep::default(); num_steps],
            stats: HopStats::default(),
        })
    }

    fn check_sizes(rf_len: usize, baseband_len: usize) -> Result<(), PlanError> {
        if rf_len == 0 {
            return Err(PlanError::EmptyTable("rf"));
        }
        if baseband_len == 0 {
            return Err(PlanError::EmptyTable("baseband"));
        }
        Ok(())
    }

    /// Active policy
    pub fn policy(&self) -> HopPolicy {
        self.policy
    }

    /// Change the policy used by the next generation
    pub fn set_policy(&mut self, policy: HopPolicy) {
        self.policy = policy;
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the sequence has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// RF table size the sequence targets
    pub fn rf_len(&self) -> usize {
        self.rf_len
    }

    /// Baseband table size the sequence targets
    pub fn baseband_len(&self) -> usize {
        self.baseband_len
    }

    /// Update the target table sizes
    ///
    /// Existing entries are not touched; call [`HopSequence::scrub`] (or
    /// regenerate) before using the sequence again.
    pub fn set_table_sizes(&mut self, rf_len: usize, baseband_len: usize) -> Result<(), PlanError> {
        Self::check_sizes(rf_len, baseband_len)?;
        self.rf_len = rf_len;
        self.baseband_len = baseband_len;
        Ok(())
    }

    /// Bounds-checked step access
    pub fn step(&self, index: usize) -> Result<HopStep, PlanError> {
        self.steps
            .get(index)
            .copied()
            .ok_or(PlanError::IndexOutOfRange {
                table: "hop sequence",
                index,
                len: self.steps.len(),
            })
    }

    /// All steps
    pub fn steps(&self) -> &[HopStep] {
        &self.steps
    }

    /// Counters
    pub fn stats(&self) -> HopStats {
        self.stats
    }

    /// Clear counters
    pub fn reset_stats(&mut self) {
        self.stats = HopStats::default();
    }

    /// Regenerate the sequence with the active policy
    pub fn generate(&mut self) {
        let (rf_len, bb_len) = (self.rf_len, self.baseband_len);
        match self.policy {
            HopPolicy::None => self.fill(|_| HopStep::new(0, 0)),
            HopPolicy::One => self.fill(|_| HopStep::new(0, 1 % bb_len)),
            HopPolicy::Toggle => self.fill(|i| HopStep::new(0, (1 + i % 2) % bb_len)),
            HopPolicy::SweepRf => self.fill(|i| HopStep::new(i % rf_len, 0)),
            HopPolicy::SweepBaseband => self.fill(|i| HopStep::new(0, i % bb_len)),
            HopPolicy::SweepRfBaseband => {
                self.fill(|i| HopStep::new((i / bb_len) % rf_len, i % bb_len))
            }
            HopPolicy::SweepBasebandRf => {
                self.fill(|i| HopStep::new(i % rf_len, (i / rf_len) % bb_len))
            }
            HopPolicy::RestartAlgA => {
                let (rf, bb) = (interleave(rf_len), interleave(bb_len));
                self.fill(|i| HopStep::new(rf[(i / bb_len) % rf_len], bb[i % bb_len]))
            }
            HopPolicy::RestartAlgB => {
                let (rf, bb) = (interleave(rf_len), interleave(bb_len));
                self.fill(|i| HopStep::new(rf[i % rf_len], bb[(i / rf_len) % bb_len]))
            }
            HopPolicy::Test => {}
        }
        self.stats.generations += 1;
        debug!(
            "Generated {} hop sequence ({} steps, rf {}, baseband {})",
            self.policy.name(),
            self.steps.len(),
            rf_len,
            bb_len
        );
    }

    fn fill(&mut self, step_at: impl Fn(usize) -> HopStep) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            *step = step_at(i);
        }
    }

    /// Clamp out-of-range indices to 0
    pub fn scrub(&mut self) -> ScrubReport {
        let mut report = ScrubReport::default();
        for step in &mut self.steps {
            if step.rf >= self.rf_len {
                step.rf = 0;
                report.repaired_rf += 1;
            }
            if step.baseband >= self.baseband_len {
                step.baseband = 0;
                report.repaired_baseband += 1;
            }
        }
        self.stats.scrub_requests += 1;
        self.stats.repaired_rf += report.repaired_rf as u64;
        self.stats.repaired_baseband += report.repaired_baseband as u64;
        report
    }
}

impl fmt::Display for HopSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Hop sequence ({}, {} steps)",
            self.policy.name(),
            self.steps.len()
        )?;
        writeln!(f, "  Step     RF   Baseband")?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {:>4}  {:>5}  {:>9}", i, step.rf, step.baseband)?;
        }
        write!(
            f,
            "  generations {}, scrubs {}, repaired rf {}, repaired baseband {}",
            self.stats.generations,
            self.stats.scrub_requests,
            self.stats.repaired_rf,
            self.stats.repaired_baseband
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(policy: HopPolicy, steps: usize, rf: usize, bb: usize) -> Vec<HopStep> {
        let mut seq = HopSequence::new(policy, steps, rf, bb).unwrap();
        seq.generate();
        seq.steps().to_vec()
    }

    #[test]
    fn test_interleave_small_tables_reverse() {
        assert_eq!(interleave(3), vec![2, 1, 0]);
        assert_eq!(interleave(1), vec![0]);
        assert!(interleave(0).is_empty());
    }

    #[test]
    fn test_interleave_column_major() {
        // 3x3 grid, read column by column
        assert_eq!(interleave(9), vec![0, 3, 6, 1, 4, 7, 2, 5, 8]);
        // 7 entries in a 3x3 grid: cells 7 and 8 are skipped
        assert_eq!(interleave(7), vec![0, 3, 6, 1, 4, 2, 5]);
    }

    #[test]
    fn test_constant_policies() {
        assert!(generated(HopPolicy::None, 5, 4, 4)
            .iter()
            .all(|s| *s == HopStep::new(0, 0)));
        assert!(generated(HopPolicy::One, 5, 4, 4)
            .iter()
            .all(|s| *s == HopStep::new(0, 1)));
    }

    #[test]
    fn test_toggle() {
        let steps = generated(HopPolicy::Toggle, 4, 4, 4);
        let bb: Vec<usize> = steps.iter().map(|s| s.baseband).collect();
        assert_eq!(bb, vec![1, 2, 1, 2]);
        assert!(steps.iter().all(|s| s.rf == 0));
    }

    #[test]
    fn test_sweeps_wrap() {
        let steps = generated(HopPolicy::SweepRf, 5, 3, 4);
        let rf: Vec<usize> = steps.iter().map(|s| s.rf).collect();
        assert_eq!(rf, vec![0, 1, 2, 0, 1]);

        let steps = generated(HopPolicy::SweepRfBaseband, 5, 2, 2);
        assert_eq!(
            steps,
            vec![
                HopStep::new(0, 0),
                HopStep::new(0, 1),
                HopStep::new(1, 0),
                HopStep::new(1, 1),
                HopStep::new(0, 0),
            ]
        );

        let steps = generated(HopPolicy::SweepBasebandRf, 3, 2, 2);
        assert_eq!(
            steps,
            vec![HopStep::new(0, 0), HopStep::new(1, 0), HopStep::new(0, 1)]
        );
    }

    #[test]
    fn test_alg_a_nests_baseband_inside_rf() {
        let steps = generated(HopPolicy::RestartAlgA, 6, 2, 3);
        // Both tables are small, so each is reversed
        assert_eq!(
            steps,
            vec![
                HopStep::new(1, 2),
                HopStep::new(1, 1),
                HopStep::new(1, 0),
                HopStep::new(0, 2),
                HopStep::new(0, 1),
                HopStep::new(0, 0),
            ]
        );
    }

    #[test]
    fn test_alg_b_nests_rf_inside_baseband() {
        let steps = generated(HopPolicy::RestartAlgB, 3, 9, 1);
        assert_eq!(
            steps,
            vec![HopStep::new(0, 0), HopStep::new(3, 0), HopStep::new(6, 0)]
        );
    }

    #[test]
    fn test_test_policy_leaves_entries() {
        let mut seq = HopSequence::new(HopPolicy::SweepRf, 4, 4, 4).unwrap();
        seq.generate();
        seq.set_policy(HopPolicy::Test);
        seq.generate();
        assert_eq!(seq.step(3).unwrap(), HopStep::new(3, 0));
        assert_eq!(seq.stats().generations, 2);
    }

    #[test]
    fn test_small_baseband_stays_in_range() {
        for policy in [HopPolicy::One, HopPolicy::Toggle] {
            assert!(generated(policy, 6, 2, 1).iter().all(|s| s.baseband == 0));
        }
    }

    #[test]
    fn test_scrub_counts_repairs() {
        let mut seq = HopSequence::new(HopPolicy::SweepRf, 10, 10, 1).unwrap();
        seq.generate();
        seq.set_table_sizes(4, 1).unwrap();
        let report = seq.scrub();
        assert_eq!(report.repaired_rf, 6);
        assert_eq!(report.repaired_baseband, 0);
        assert!(seq.steps().iter().all(|s| s.rf < 4));
        assert!(seq.scrub().is_clean());
        assert_eq!(seq.stats().scrub_requests, 2);
        assert_eq!(seq.stats().repaired_rf, 6);
    }

    #[test]
    fn test_empty_tables_rejected() {
        assert!(matches!(
            HopSequence::new(HopPolicy::None, 1, 0, 1),
            Err(PlanError::EmptyTable("rf"))
        ));
        let mut seq = HopSequence::new(HopPolicy::None, 1, 1, 1).unwrap();
        assert!(seq.set_table_sizes(1, 0).is_err());
    }

    #[test]
    fn test_step_bounds() {
        let seq = HopSequence::new(HopPolicy::None, 2, 1, 1).unwrap();
        assert!(seq.step(1).is_ok());
        assert!(seq.step(2).is_err());
    }
}
