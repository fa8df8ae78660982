//! Shared simulated medium
//!
//! Every transmission is copied into the inbox of every other attached node.
//! A receive takes the oldest burst from the node's own inbox. An optional
//! jammer raises the noise level and occupies a band of subcarriers, either
//! at every receiver or only at the one node it sits next to.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use hop_link::{Sample, SubcarrierAllocation, SubcarrierKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bursts kept per inbox before the oldest is dropped
const MAX_INBOX: usize = 64;

/// Default noise magnitude on a quiet channel
pub const DEFAULT_NOISE_FLOOR: f32 = 1e-3;

/// A narrowband jammer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JammerConfig {
    /// First occupied subcarrier
    pub first_subcarrier: usize,
    /// Last occupied subcarrier (inclusive)
    pub last_subcarrier: usize,
    /// Noise magnitude added to every receive burst
    pub power: f32,
    /// Only this node's receiver is affected; `None` jams every node
    #[serde(default)]
    pub victim: Option<u8>,
}

impl Default for JammerConfig {
    fn default() -> Self {
        Self {
            first_subcarrier: 300,
            last_subcarrier: 340,
            power: 0.5,
            victim: None,
        }
    }
}

impl JammerConfig {
    /// Jammer local to `node`
    pub fn near(node: u8) -> Self {
        Self {
            victim: Some(node),
            ..Self::default()
        }
    }

    /// Whether a receiver on `node` is within reach; an unnamed receiver
    /// always is
    pub fn reaches(&self, node: Option<u8>) -> bool {
        match (self.victim, node) {
            (Some(victim), Some(node)) => victim == node,
            _ => true,
        }
    }

    /// Whether the jammer lands on any non-null subcarrier of `allocation`
    pub fn hits(&self, allocation: &SubcarrierAllocation) -> bool {
        (self.first_subcarrier..=self.last_subcarrier)
            .any(|i| matches!(allocation.get(i), Some(k) if k != SubcarrierKind::Null))
    }
}

/// One transmission on the air
#[derive(Debug, Clone)]
pub struct AirBurst {
    pub from: u8,
    /// Frequency the sender was tuned to
    pub frequency: f64,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Default)]
struct AirState {
    inboxes: HashMap<u8, VecDeque<AirBurst>>,
    jammer: Option<JammerConfig>,
}

/// The medium shared by all simulated front ends
#[derive(Debug)]
pub struct SimAir {
    state: Mutex<AirState>,
    noise_floor: f32,
}

impl Default for SimAir {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_FLOOR)
    }
}

impl SimAir {
    pub fn new(noise_floor: f32) -> Self {
        Self {
            state: Mutex::new(AirState::default()),
            noise_floor,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, AirState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give a node an inbox
    pub fn attach(&self, node: u8) {
        self.state().inboxes.entry(node).or_default();
    }

    pub fn set_jammer(&self, jammer: Option<JammerConfig>) {
        debug!("Jammer set to {:?}", jammer);
        self.state().jammer = jammer;
    }

    pub fn jammer(&self) -> Option<JammerConfig> {
        self.state().jammer
    }

    /// Noise magnitude a receiver on `node` currently sees
    pub fn noise_level(&self, node: u8) -> f32 {
        let jammer = self.jammer().filter(|j| j.reaches(Some(node)));
        self.noise_floor + jammer.map_or(0.0, |j| j.power)
    }

    /// Deliver a burst to every other node; returns the number of receivers
    pub fn transmit(&self, from: u8, frequency: f64, samples: Vec<Sample>) -> usize {
        let mut state = self.state();
        let mut delivered = 0;
        for (_, inbox) in state.inboxes.iter_mut().filter(|(node, _)| **node != from) {
            if inbox.len() == MAX_INBOX {
                inbox.pop_front();
            }
            inbox.push_back(AirBurst {
                from,
                frequency,
                samples: samples.clone(),
            });
            delivered += 1;
        }
        delivered
    }

    /// Oldest burst waiting for `node`
    pub fn take(&self, node: u8) -> Option<AirBurst> {
        self.state().inboxes.get_mut(&node)?.pop_front()
    }

    /// Bursts waiting for `node`
    pub fn pending(&self, node: u8) -> usize {
        self.state().inboxes.get(&node).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_skips_sender() {
        let air = SimAir::default();
        air.attach(1);
        air.attach(2);
        air.attach(3);
        assert_eq!(air.transmit(1, 2.5e9, vec![Sample::new(1.0, 0.0)]), 2);
        assert_eq!(air.pending(1), 0);
        assert_eq!(air.pending(2), 1);
        assert_eq!(air.take(3).map(|b| b.from), Some(1));
        assert!(air.take(3).is_none());
    }

    #[test]
    fn test_inbox_is_bounded() {
        let air = SimAir::default();
        air.attach(1);
        air.attach(2);
        for _ in 0..(MAX_INBOX + 5) {
            air.transmit(1, 0.0, Vec::new());
        }
        assert_eq!(air.pending(2), MAX_INBOX);
    }

    #[test]
    fn test_jammer_raises_noise_and_hits_allocation() {
        let air = SimAir::new(0.01);
        assert_eq!(air.noise_level(1), 0.01);
        let jammer = JammerConfig::default();
        air.set_jammer(Some(jammer));
        assert!((air.noise_level(1) - 0.51).abs() < 1e-6);

        let full = SubcarrierAllocation::full_band();
        assert!(jammer.hits(&full));
        // left edge 0 nulls subcarriers 256..=406
        assert!(!jammer.hits(&full.with_null_hole(0, 150)));
    }

    #[test]
    fn test_local_jammer_only_reaches_its_victim() {
        let air = SimAir::new(0.01);
        air.set_jammer(Some(JammerConfig::near(2)));
        assert!((air.noise_level(2) - 0.51).abs() < 1e-6);
        assert_eq!(air.noise_level(3), 0.01);

        let jammer = JammerConfig::near(2);
        assert!(jammer.reaches(Some(2)));
        assert!(!jammer.reaches(Some(3)));
        assert!(jammer.reaches(None));
        assert!(JammerConfig::default().reaches(Some(3)));
    }
}
