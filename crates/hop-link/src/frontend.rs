//! Timed radio front end interface
//!
//! The front end is driven from blocking worker threads, so every method is
//! synchronous and the trait is `Send + Sync`. Times are seconds on the front
//! end's own clock.

use std::collections::VecDeque;
use std::fmt;

use tracing::{info, warn};

use crate::error::FrontEndError;

/// RF frequency used by the tuning-defect probe
pub const PROBE_RF_FREQ: f64 = 2.405e9;
/// Baseband offset used by the tuning-defect probe
pub const PROBE_BASEBAND_FREQ: f64 = 1e6;

/// Default trailing-noise threshold before calibration
pub const DEFAULT_NOISE_THRESHOLD: f32 = 1e-2;
/// Calibrated threshold is the snapshot mean magnitude times this factor
pub const NOISE_THRESHOLD_FACTOR: f32 = 2.0;
/// Samples at the end of a burst used for the trailing-noise test
pub const NOISE_TAIL_SAMPLES: usize = 64;

/// Error records kept in [`HardwareStats`]
const MAX_ERROR_RECORDS: usize = 256;

/// Receive or transmit chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Rx,
    Tx,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Rx => f.write_str("rx"),
            Side::Tx => f.write_str("tx"),
        }
    }
}

/// Complex baseband sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub re: f32,
    pub im: f32,
}

impl Sample {
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    pub fn magnitude(&self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }
}

/// Mean magnitude of a block of samples
pub fn mean_magnitude(samples: &[Sample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(Sample::magnitude).sum::<f32>() / samples.len() as f32
}

/// Whether the tail of a receive burst is above the noise threshold
pub fn trailing_noise_is_high(samples: &[Sample], threshold: f32) -> bool {
    let tail = &samples[samples.len().saturating_sub(NOISE_TAIL_SAMPLES)..];
    !tail.is_empty() && mean_magnitude(tail) > threshold
}

/// Threshold derived from a calibration snapshot
pub fn calibrate_noise_threshold(snapshot: &[Sample]) -> f32 {
    let threshold = mean_magnitude(snapshot) * NOISE_THRESHOLD_FACTOR;
    if threshold > 0.0 {
        threshold
    } else {
        DEFAULT_NOISE_THRESHOLD
    }
}

/// Timed radio hardware
pub trait FrontEnd: Send + Sync {
    /// Current time on the front end clock
    fn now(&self) -> f64;

    /// Tune one side to `rf_freq + baseband_freq`; blocks until locked and
    /// returns the frequency actually reached
    fn tune(&self, side: Side, rf_freq: f64, baseband_freq: f64) -> Result<f64, FrontEndError>;

    /// Capture `sample_count` samples starting at `start_time`
    fn issue_timed_receive(
        &self,
        start_time: f64,
        sample_count: usize,
    ) -> Result<Vec<Sample>, FrontEndError>;

    /// Send `samples` starting at `start_time`
    fn issue_timed_transmit(&self, start_time: f64, samples: &[Sample])
        -> Result<(), FrontEndError>;
}

/// Boot-time probe for the baseband sign inversion on the receive chain
///
/// Tunes rx to 2.405 GHz with a 1 MHz baseband offset; anything other than
/// 2.406 GHz means the defect is present.
pub fn probe_tuning_defect(front_end: &dyn FrontEnd) -> Result<bool, FrontEndError> {
    let achieved = front_end.tune(Side::Rx, PROBE_RF_FREQ, PROBE_BASEBAND_FREQ)?;
    let expected = PROBE_RF_FREQ + PROBE_BASEBAND_FREQ;
    let defect = (achieved - expected).abs() > 1.0;
    if defect {
        warn!(
            "Tuning defect present: asked for {:.0} Hz, got {:.0} Hz",
            expected, achieved
        );
    } else {
        info!("Tuning probe ok at {:.0} Hz", achieved);
    }
    Ok(defect)
}

/// One failed burst
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareErrorRecord {
    /// Front end time when the burst was issued
    pub timestamp: f64,
    pub side: Side,
    pub code: i32,
    /// Attempt number on this side, starting at 1
    pub attempt: u64,
    /// Samples requested or offered
    pub samples: usize,
    pub message: String,
}

impl fmt::Display for HardwareErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {} attempt {} code {} samples {}: {}",
            self.timestamp, self.side, self.attempt, self.code, self.samples, self.message
        )
    }
}

/// Burst counters per side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideStats {
    pub attempts: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Hardware burst statistics, merged by the control loop after each slot
#[derive(Debug, Clone, Default)]
pub struct HardwareStats {
    pub rx: SideStats,
    pub tx: SideStats,
    pub tune_failures: u64,
    errors: VecDeque<HardwareErrorRecord>,
}

impl HardwareStats {
    pub fn side(&self, side: Side) -> &SideStats {
        match side {
            Side::Rx => &self.rx,
            Side::Tx => &self.tx,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideStats {
        match side {
            Side::Rx => &mut self.rx,
            Side::Tx => &mut self.tx,
        }
    }

    /// Count a burst attempt and return its attempt number
    pub fn begin(&mut self, side: Side) -> u64 {
        let stats = self.side_mut(side);
        stats.attempts += 1;
        stats.attempts
    }

    pub fn complete(&mut self, side: Side) {
        self.side_mut(side).completed += 1;
    }

    pub fn fail(&mut self, record: HardwareErrorRecord) {
        self.side_mut(record.side).failed += 1;
        if self.errors.len() == MAX_ERROR_RECORDS {
            self.errors.pop_front();
        }
        self.errors.push_back(record);
    }

    pub fn errors(&self) -> impl Iterator<Item = &HardwareErrorRecord> {
        self.errors.iter()
    }
}

impl fmt::Display for HardwareStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rx bursts: {} attempted, {} completed, {} failed",
            self.rx.attempts, self.rx.completed, self.rx.failed
        )?;
        writeln!(
            f,
            "tx bursts: {} attempted, {} completed, {} failed",
            self.tx.attempts, self.tx.completed, self.tx.failed
        )?;
        write!(f, "tune failures: {}", self.tune_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTuner {
        inverted: bool,
    }

    impl FrontEnd for FixedTuner {
        fn now(&self) -> f64 {
            0.0
        }

        fn tune(&self, _side: Side, rf: f64, bb: f64) -> Result<f64, FrontEndError> {
            Ok(if self.inverted { rf - bb } else { rf + bb })
        }

        fn issue_timed_receive(&self, _: f64, n: usize) -> Result<Vec<Sample>, FrontEndError> {
            Ok(vec![Sample::default(); n])
        }

        fn issue_timed_transmit(&self, _: f64, _: &[Sample]) -> Result<(), FrontEndError> {
            Ok(())
        }
    }

    #[test]
    fn test_probe_detects_inversion() {
        assert!(probe_tuning_defect(&FixedTuner { inverted: true }).unwrap());
        assert!(!probe_tuning_defect(&FixedTuner { inverted: false }).unwrap());
    }

    #[test]
    fn test_trailing_noise() {
        let mut samples = vec![Sample::new(0.001, 0.0); 200];
        assert!(!trailing_noise_is_high(&samples, DEFAULT_NOISE_THRESHOLD));
        for s in samples.iter_mut().skip(150) {
            *s = Sample::new(0.0, 0.5);
        }
        assert!(trailing_noise_is_high(&samples, DEFAULT_NOISE_THRESHOLD));
        assert!(!trailing_noise_is_high(&[], DEFAULT_NOISE_THRESHOLD));
    }

    #[test]
    fn test_calibration() {
        let snapshot = vec![Sample::new(0.03, 0.04); 10];
        let threshold = calibrate_noise_threshold(&snapshot);
        assert!((threshold - 0.1).abs() < 1e-6);
        assert_eq!(calibrate_noise_threshold(&[]), DEFAULT_NOISE_THRESHOLD);
    }

    #[test]
    fn test_error_log_is_bounded() {
        let mut stats = HardwareStats::default();
        for i in 0..(MAX_ERROR_RECORDS as u64 + 10) {
            let attempt = stats.begin(Side::Rx);
            stats.fail(HardwareErrorRecord {
                timestamp: i as f64,
                side: Side::Rx,
                code: 1,
                attempt,
                samples: 10,
                message: "timeout".into(),
            });
        }
        assert_eq!(stats.errors().count(), MAX_ERROR_RECORDS);
        assert_eq!(stats.rx.failed, MAX_ERROR_RECORDS as u64 + 10);
        assert_eq!(stats.errors().next().map(|r| r.attempt), Some(11));
    }
}
