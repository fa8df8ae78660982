//! Simulated timed front end

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use hop_link::{FrontEnd, FrontEndError, Sample, Side};
use tracing::debug;

use crate::air::SimAir;

/// Noise samples appended after every received burst
const NOISE_TAIL: usize = 128;

/// A retune seen by the front end
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneRecord {
    pub side: Side,
    pub rf: f64,
    pub baseband: f64,
    pub achieved: f64,
}

#[derive(Debug, Default)]
struct FrontEndState {
    rx_freq: f64,
    tx_freq: f64,
    tunes: Vec<TuneRecord>,
    rx_faults: VecDeque<FrontEndError>,
    tx_faults: VecDeque<FrontEndError>,
    transmitted: u64,
}

/// Front end of one simulated node
#[derive(Debug)]
pub struct SimFrontEnd {
    node: u8,
    air: Arc<SimAir>,
    clock: Instant,
    paced: bool,
    tuning_defect: bool,
    state: Mutex<FrontEndState>,
}

impl SimFrontEnd {
    /// Attach a node to the air; timed operations run immediately
    pub fn new(node: u8, air: Arc<SimAir>) -> Self {
        air.attach(node);
        Self {
            node,
            air,
            clock: Instant::now(),
            paced: false,
            tuning_defect: false,
            state: Mutex::new(FrontEndState::default()),
        }
    }

    /// Sleep until each timed operation's start time
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Invert the baseband offset on the receive chain
    pub fn with_tuning_defect(mut self, defect: bool) -> Self {
        self.tuning_defect = defect;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FrontEndState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node(&self) -> u8 {
        self.node
    }

    /// Make the next burst on `side` fail with `error`
    pub fn inject_fault(&self, side: Side, error: FrontEndError) {
        let mut state = self.state();
        match side {
            Side::Rx => state.rx_faults.push_back(error),
            Side::Tx => state.tx_faults.push_back(error),
        }
    }

    /// Frequency a side is tuned to
    pub fn tuned(&self, side: Side) -> f64 {
        let state = self.state();
        match side {
            Side::Rx => state.rx_freq,
            Side::Tx => state.tx_freq,
        }
    }

    pub fn tunes(&self) -> Vec<TuneRecord> {
        self.state().tunes.clone()
    }

    /// Bursts put on the air
    pub fn transmitted(&self) -> u64 {
        self.state().transmitted
    }

    fn wait_until(&self, start_time: f64) {
        if !self.paced {
            return;
        }
        let wait = start_time - self.now();
        if wait > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(wait));
        }
    }

    fn noise(&self, count: usize) -> impl Iterator<Item = Sample> {
        let level = self.air.noise_level(self.node);
        (0..count).map(move |i| {
            if i % 2 == 0 {
                Sample::new(level, 0.0)
            } else {
                Sample::new(0.0, -level)
            }
        })
    }
}

impl FrontEnd for SimFrontEnd {
    fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    fn tune(&self, side: Side, rf_freq: f64, baseband_freq: f64) -> Result<f64, FrontEndError> {
        let achieved = if self.tuning_defect && side == Side::Rx {
            rf_freq - baseband_freq
        } else {
            rf_freq + baseband_freq
        };
        let mut state = self.state();
        match side {
            Side::Rx => state.rx_freq = achieved,
            Side::Tx => state.tx_freq = achieved,
        }
        state.tunes.push(TuneRecord {
            side,
            rf: rf_freq,
            baseband: baseband_freq,
            achieved,
        });
        Ok(achieved)
    }

    fn issue_timed_receive(
        &self,
        start_time: f64,
        sample_count: usize,
    ) -> Result<Vec<Sample>, FrontEndError> {
        self.wait_until(start_time);
        if let Some(error) = self.state().rx_faults.pop_front() {
            return Err(error);
        }

        let mut samples = self
            .air
            .take(self.node)
            .map(|burst| burst.samples)
            .unwrap_or_default();
        let total = sample_count.max(samples.len() + NOISE_TAIL);
        samples.extend(self.noise(total - samples.len()));
        Ok(samples)
    }

    fn issue_timed_transmit(&self, start_time: f64, samples: &[Sample]) -> Result<(), FrontEndError> {
        self.wait_until(start_time);
        let frequency = {
            let mut state = self.state();
            if let Some(error) = state.tx_faults.pop_front() {
                return Err(error);
            }
            state.transmitted += 1;
            state.tx_freq
        };
        let receivers = self.air.transmit(self.node, frequency, samples.to_vec());
        debug!(
            "Node {} sent {} samples at {:.0} Hz to {} receivers",
            self.node,
            samples.len(),
            frequency,
            receivers
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hop_link::probe_tuning_defect;

    #[test]
    fn test_tuning_defect_probe() {
        let air = Arc::new(SimAir::default());
        let healthy = SimFrontEnd::new(1, air.clone());
        let defective = SimFrontEnd::new(2, air).with_tuning_defect(true);
        assert!(!probe_tuning_defect(&healthy).unwrap());
        assert!(probe_tuning_defect(&defective).unwrap());
        assert_eq!(defective.tuned(Side::Rx), 2.404e9);
    }

    #[test]
    fn test_receive_appends_noise_tail() {
        let air = Arc::new(SimAir::default());
        let tx = SimFrontEnd::new(1, air.clone());
        let rx = SimFrontEnd::new(2, air);
        tx.issue_timed_transmit(0.0, &[Sample::new(9.0, 0.0); 10]).unwrap();
        assert_eq!(tx.transmitted(), 1);

        let samples = rx.issue_timed_receive(0.0, 1000).unwrap();
        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0], Sample::new(9.0, 0.0));

        let samples = rx.issue_timed_receive(0.0, 50).unwrap();
        assert_eq!(samples.len(), NOISE_TAIL);

        tx.issue_timed_transmit(0.0, &[Sample::new(9.0, 0.0); 10]).unwrap();
        let samples = rx.issue_timed_receive(0.0, 20).unwrap();
        assert_eq!(samples.len(), 10 + NOISE_TAIL);
    }

    #[test]
    fn test_injected_faults() {
        let air = Arc::new(SimAir::default());
        let fe = SimFrontEnd::new(1, air);
        fe.inject_fault(Side::Rx, FrontEndError::Overflow { code: 8 });
        assert_eq!(
            fe.issue_timed_receive(0.0, 10),
            Err(FrontEndError::Overflow { code: 8 })
        );
        assert!(fe.issue_timed_receive(0.0, 10).is_ok());
    }
}
