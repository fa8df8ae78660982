//! Throughput measurement and per-epoch batch summaries

use std::fmt;

use crate::anti_jam::AntiJamState;
use crate::mac::LinkCounters;

/// Valid-payload throughput between successive samples
#[derive(Debug, Clone, Default)]
pub struct ThroughputMeter {
    last_bytes: u64,
    last_time: Option<f64>,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start measuring from `now`
    pub fn reset(&mut self, total_bytes: u64, now: f64) {
        self.last_bytes = total_bytes;
        self.last_time = Some(now);
    }

    /// Throughput in kbps since the previous sample
    ///
    /// `((Δbytes × 8) / 1024) / elapsed`; the first sample and zero elapsed
    /// time report 0.
    pub fn sample(&mut self, total_bytes: u64, now: f64) -> f64 {
        let kbps = match self.last_time {
            Some(last) if now > last => {
                let delta = total_bytes.saturating_sub(self.last_bytes) as f64;
                (delta * 8.0 / 1024.0) / (now - last)
            }
            _ => 0.0,
        };
        self.reset(total_bytes, now);
        kbps
    }
}

/// What happened during one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub epoch: u64,
    pub bad_headers: u64,
    pub bad_payloads: u64,
    pub packets_received: u64,
    pub packets_transmitted: u64,
    pub throughput_kbps: f64,
    pub anti_jam: AntiJamState,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch {} rx {} tx {} bad-hdr {} bad-payload {} {:.1} kbps [{}]",
            self.epoch,
            self.packets_received,
            self.packets_transmitted,
            self.bad_headers,
            self.bad_payloads,
            self.throughput_kbps,
            self.anti_jam
        )
    }
}

/// Turns cumulative link counters into per-epoch deltas
#[derive(Debug, Clone, Default)]
pub struct BatchTracker {
    last: LinkCounters,
}

impl BatchTracker {
    pub fn summarize(
        &mut self,
        epoch: u64,
        counters: &LinkCounters,
        throughput_kbps: f64,
        anti_jam: AntiJamState,
    ) -> BatchSummary {
        let summary = BatchSummary {
            epoch,
            bad_headers: counters.invalid_headers - self.last.invalid_headers,
            bad_payloads: counters.invalid_payloads - self.last.invalid_payloads,
            packets_received: counters.valid_payloads - self.last.valid_payloads,
            packets_transmitted: counters.packets_transmitted - self.last.packets_transmitted,
            throughput_kbps,
            anti_jam,
        };
        self.last = *counters;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_kbps() {
        let mut meter = ThroughputMeter::new();
        assert_eq!(meter.sample(0, 0.0), 0.0);
        // 12800 bytes in 2 s = 100 kbit / 2 s
        assert_eq!(meter.sample(12_800, 2.0), 50.0);
        assert_eq!(meter.sample(12_800, 2.0), 0.0);
        assert_eq!(meter.sample(12_800, 3.0), 0.0);
    }

    #[test]
    fn test_batch_deltas() {
        let mut tracker = BatchTracker::default();
        let mut counters = LinkCounters {
            invalid_headers: 2,
            valid_payloads: 10,
            packets_transmitted: 5,
            ..Default::default()
        };
        let first = tracker.summarize(1, &counters, 0.0, AntiJamState::default());
        assert_eq!(first.bad_headers, 2);
        assert_eq!(first.packets_received, 10);

        counters.valid_payloads = 14;
        counters.invalid_payloads = 1;
        let second = tracker.summarize(2, &counters, 10.0, AntiJamState::default());
        assert_eq!(second.bad_headers, 0);
        assert_eq!(second.bad_payloads, 1);
        assert_eq!(second.packets_received, 4);
        assert_eq!(second.packets_transmitted, 0);
    }
}
