//! OFDM subcarrier allocations
//!
//! An allocation classifies each of the [`NUM_SUBCARRIERS`] subcarriers as
//! null, pilot or data. Index 0 is the DC subcarrier and the band edges meet
//! around index `NUM_SUBCARRIERS / 2`.

use std::fmt;

use crate::error::LinkError;

/// Subcarriers per OFDM symbol
pub const NUM_SUBCARRIERS: usize = 512;

/// Fraction of subcarriers left null as guard at the band edges
const GUARD_FRACTION: f64 = 0.05;

/// Pilot spacing in the full-band allocation
const PILOT_SPACING: usize = 8;

/// Role of a single subcarrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubcarrierKind {
    Null,
    Pilot,
    Data,
}

impl SubcarrierKind {
    /// Byte code used in `NewAlloc` payloads
    pub fn code(&self) -> u8 {
        match self {
            SubcarrierKind::Null => 0,
            SubcarrierKind::Pilot => 1,
            SubcarrierKind::Data => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SubcarrierKind::Null),
            1 => Some(SubcarrierKind::Pilot),
            2 => Some(SubcarrierKind::Data),
            _ => None,
        }
    }
}

/// Which subcarriers carry data, pilots, or nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcarrierAllocation {
    kinds: Vec<SubcarrierKind>,
}

impl Default for SubcarrierAllocation {
    fn default() -> Self {
        Self::full_band()
    }
}

impl SubcarrierAllocation {
    /// Full band with edge guards, a null DC subcarrier and regular pilots
    pub fn full_band() -> Self {
        let half = NUM_SUBCARRIERS / 2;
        let guard = (NUM_SUBCARRIERS as f64 * GUARD_FRACTION).round() as usize / 2;
        let mut kinds = vec![SubcarrierKind::Null; NUM_SUBCARRIERS];
        for i in 1..half - guard {
            let kind = if (i + PILOT_SPACING / 2) % PILOT_SPACING == 0 {
                SubcarrierKind::Pilot
            } else {
                SubcarrierKind::Data
            };
            kinds[i] = kind;
            kinds[NUM_SUBCARRIERS - i] = kind;
        }
        Self { kinds }
    }

    /// Outer allocation: pilot blocks surround a null block at the band edge
    pub fn outer() -> Self {
        Self::from_runs(&[
            (178, SubcarrierKind::Data),
            (52, SubcarrierKind::Pilot),
            (52, SubcarrierKind::Null),
            (52, SubcarrierKind::Pilot),
        ])
    }

    /// Inner allocation: pilot blocks sit between data blocks
    pub fn inner() -> Self {
        Self::from_runs(&[
            (106, SubcarrierKind::Data),
            (52, SubcarrierKind::Pilot),
            (72, SubcarrierKind::Data),
            (52, SubcarrierKind::Null),
            (72, SubcarrierKind::Data),
            (52, SubcarrierKind::Pilot),
        ])
    }

    /// Lay out runs from index 0 and fill the rest with data; the first and
    /// last subcarrier are always null
    fn from_runs(runs: &[(usize, SubcarrierKind)]) -> Self {
        let mut kinds = Vec::with_capacity(NUM_SUBCARRIERS);
        for &(len, kind) in runs {
            kinds.extend(std::iter::repeat(kind).take(len));
        }
        kinds.resize(NUM_SUBCARRIERS, SubcarrierKind::Data);
        kinds[0] = SubcarrierKind::Null;
        kinds[NUM_SUBCARRIERS - 1] = SubcarrierKind::Null;
        Self { kinds }
    }

    /// Null a band of subcarriers given in centered coordinates
    ///
    /// `start` and `end` are shifted by half the band and reduced modulo
    /// [`NUM_SUBCARRIERS`] (truncating remainder). A start that is still
    /// negative falls back to `[256, 356]`. A start past the end wraps the
    /// hole through the top of the index space. Both ends are inclusive.
    pub fn open_null_hole(&mut self, start: i32, end: i32) {
        let n = NUM_SUBCARRIERS as i32;
        let half = n / 2;
        let mut start = (start + half) % n;
        let mut end = (end + half) % n;
        if start < 0 {
            start = half;
            end = half + 100;
        }

        if start > end {
            for i in start..n {
                self.kinds[i as usize] = SubcarrierKind::Null;
            }
            for i in 0..=end {
                self.kinds[i as usize] = SubcarrierKind::Null;
            }
        } else {
            for i in start..=end {
                self.kinds[i as usize] = SubcarrierKind::Null;
            }
        }
    }

    /// Copy of this allocation with a null hole opened
    pub fn with_null_hole(&self, start: i32, end: i32) -> Self {
        let mut alloc = self.clone();
        alloc.open_null_hole(start, end);
        alloc
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<SubcarrierKind> {
        self.kinds.get(index).copied()
    }

    pub fn kinds(&self) -> &[SubcarrierKind] {
        &self.kinds
    }

    /// Number of subcarriers of a kind
    pub fn count(&self, kind: SubcarrierKind) -> usize {
        self.kinds.iter().filter(|&&k| k == kind).count()
    }

    /// Encode as one byte per subcarrier
    pub fn to_bytes(&self) -> Vec<u8> {
        self.kinds.iter().map(SubcarrierKind::code).collect()
    }

    /// Decode a `NewAlloc` payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() != NUM_SUBCARRIERS {
            return Err(LinkError::InvalidAllocation(format!(
                "expected {} subcarriers, got {}",
                NUM_SUBCARRIERS,
                bytes.len()
            )));
        }
        let kinds = bytes
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                SubcarrierKind::from_code(b).ok_or_else(|| {
                    LinkError::InvalidAllocation(format!("subcarrier {} has code {}", i, b))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { kinds })
    }
}

impl fmt::Display for SubcarrierAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} data / {} pilot / {} null",
            self.count(SubcarrierKind::Data),
            self.count(SubcarrierKind::Pilot),
            self.count(SubcarrierKind::Null)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_band_layout() {
        let alloc = SubcarrierAllocation::full_band();
        assert_eq!(alloc.len(), NUM_SUBCARRIERS);
        assert_eq!(alloc.get(0), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(256), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(1), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(4), Some(SubcarrierKind::Pilot));
        assert_eq!(alloc.get(12), Some(SubcarrierKind::Pilot));
        assert_eq!(alloc.get(508), Some(SubcarrierKind::Pilot));
        // 13 guard subcarriers on each side of the band edge
        assert_eq!(alloc.get(242), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(243), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(269), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(270), Some(SubcarrierKind::Data));
    }

    #[test]
    fn test_outer_layout() {
        let alloc = SubcarrierAllocation::outer();
        assert_eq!(alloc.get(0), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(177), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(178), Some(SubcarrierKind::Pilot));
        assert_eq!(alloc.get(230), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(282), Some(SubcarrierKind::Pilot));
        assert_eq!(alloc.get(334), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(511), Some(SubcarrierKind::Null));
        assert_eq!(alloc.count(SubcarrierKind::Pilot), 104);
        assert_eq!(alloc.count(SubcarrierKind::Null), 54);
    }

    #[test]
    fn test_inner_layout() {
        let alloc = SubcarrierAllocation::inner();
        assert_eq!(alloc.get(105), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(106), Some(SubcarrierKind::Pilot));
        assert_eq!(alloc.get(158), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(230), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(281), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(282), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(354), Some(SubcarrierKind::Pilot));
        assert_eq!(alloc.get(406), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(511), Some(SubcarrierKind::Null));
    }

    #[test]
    fn test_null_hole_negative_start_falls_back() {
        let mut alloc = SubcarrierAllocation::outer();
        alloc.open_null_hole(-300, 0);
        for i in 256..=356 {
            assert_eq!(alloc.get(i), Some(SubcarrierKind::Null));
        }
        assert_eq!(alloc.get(357), Some(SubcarrierKind::Data));
    }

    #[test]
    fn test_null_hole_wraps() {
        let mut alloc = SubcarrierAllocation::outer();
        alloc.open_null_hole(200, 300);
        // 456..512 and 0..=44
        assert_eq!(alloc.get(455), Some(SubcarrierKind::Data));
        assert_eq!(alloc.get(456), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(30), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(44), Some(SubcarrierKind::Null));
        assert_eq!(alloc.get(45), Some(SubcarrierKind::Data));
    }

    #[test]
    fn test_bytes_reject_bad_input() {
        let alloc = SubcarrierAllocation::inner();
        let mut bytes = alloc.to_bytes();
        assert_eq!(SubcarrierAllocation::from_bytes(&bytes).unwrap(), alloc);
        bytes[10] = 7;
        assert!(SubcarrierAllocation::from_bytes(&bytes).is_err());
        assert!(SubcarrierAllocation::from_bytes(&bytes[..100]).is_err());
    }
}
