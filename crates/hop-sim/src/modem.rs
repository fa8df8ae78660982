//! Simulated modem
//!
//! Frames are carried as plain samples: a marker sample holding the
//! allocation fingerprint, a length sample, then one sample per header and
//! payload byte. The synchronizer checks the jammer against its own
//! allocation (when the jammer reaches its node) and the fingerprint
//! against the sender's, so a jammed
//! subcarrier band or an allocation mismatch corrupts the frame the way it
//! would on the air.

use std::sync::Arc;

use hop_link::{
    DetectedFrame, FrameGenerator, FrameSink, FrameSynchronizer, ModemFactory, Sample,
    SignalStats, SubcarrierAllocation,
};

use crate::air::SimAir;

/// Real part of the sample that starts a frame
const FRAME_MARKER: f32 = -7.0;

/// Builds simulated modem stages that consult the shared air for jamming
#[derive(Debug, Clone)]
pub struct SimModemFactory {
    air: Arc<SimAir>,
    node: Option<u8>,
}

impl SimModemFactory {
    /// Modem that every jammer reaches
    pub fn new(air: Arc<SimAir>) -> Self {
        Self { air, node: None }
    }

    /// Place the receiver on `node`, out of reach of jammers local to
    /// other nodes
    pub fn for_node(mut self, node: u8) -> Self {
        self.node = Some(node);
        self
    }
}

impl ModemFactory for SimModemFactory {
    fn generator(&self, allocation: &SubcarrierAllocation) -> Box<dyn FrameGenerator> {
        Box::new(SimGenerator {
            fingerprint: fingerprint(allocation),
        })
    }

    fn synchronizer(&self, allocation: &SubcarrierAllocation) -> Box<dyn FrameSynchronizer> {
        Box::new(SimSynchronizer {
            air: self.air.clone(),
            node: self.node,
            allocation: allocation.clone(),
            fingerprint: fingerprint(allocation),
        })
    }
}

/// Checksum of an allocation, exact in an `f32`
pub fn fingerprint(allocation: &SubcarrierAllocation) -> u32 {
    allocation
        .to_bytes()
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, &b)| {
            (acc + u32::from(b) * (i as u32 + 1)) % 65_521
        })
}

struct SimGenerator {
    fingerprint: u32,
}

impl FrameGenerator for SimGenerator {
    fn modulate(&self, header: &[u8], payload: &[u8]) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(2 + header.len() + payload.len());
        samples.push(Sample::new(FRAME_MARKER, self.fingerprint as f32));
        samples.push(Sample::new(header.len() as f32, payload.len() as f32));
        samples.extend(
            header
                .iter()
                .chain(payload)
                .map(|&b| Sample::new(f32::from(b), 0.0)),
        );
        samples
    }

    fn noise(&self, sample_count: usize) -> Vec<Sample> {
        (0..sample_count)
            .map(|i| Sample::new(0.5, if i % 2 == 0 { 0.5 } else { -0.5 }))
            .collect()
    }
}

struct SimSynchronizer {
    air: Arc<SimAir>,
    node: Option<u8>,
    allocation: SubcarrierAllocation,
    fingerprint: u32,
}

impl FrameSynchronizer for SimSynchronizer {
    fn demodulate(&self, samples: &[Sample], sink: &mut dyn FrameSink) {
        let jammed = self
            .air
            .jammer()
            .is_some_and(|jammer| jammer.reaches(self.node) && jammer.hits(&self.allocation));

        let mut i = 0;
        while i < samples.len() {
            if samples[i].re != FRAME_MARKER || i + 1 >= samples.len() {
                i += 1;
                continue;
            }
            let sender_fingerprint = samples[i].im as u32;
            let header_len = samples[i + 1].re as usize;
            let payload_len = samples[i + 1].im as usize;
            let body = i + 2;
            let end = body + header_len + payload_len;
            if end > samples.len() {
                break;
            }

            let bytes = |range: std::ops::Range<usize>| -> Vec<u8> {
                samples[range].iter().map(|s| s.re as u8).collect()
            };
            let matched = sender_fingerprint == self.fingerprint;
            sink.on_frame(DetectedFrame {
                header: bytes(body..body + header_len),
                header_valid: !jammed,
                payload: bytes(body + header_len..end),
                payload_valid: !jammed && matched,
                stats: SignalStats {
                    evm_db: if jammed { -3.0 } else { -28.0 },
                    rssi_db: -40.0,
                    cfo: 0.0,
                },
            });
            i = end;
        }
    }
}
