//! MAC frame header and frame types
//!
//! Header layout (big-endian):
//!
//! | bytes | field          |
//! |-------|----------------|
//! | 0..2  | frame id       |
//! | 2     | source id      |
//! | 3     | destination id |
//! | 4     | frame type     |
//!
//! The remaining header bytes up to [`HEADER_DEFAULT_SIZE`] are zero.

use std::fmt;

use crate::error::LinkError;

/// Header size used on the air
pub const HEADER_DEFAULT_SIZE: usize = 8;
/// Largest header the modem accepts
pub const HEADER_MAX_SIZE: usize = 14;
/// Default payload size for data frames
pub const PAYLOAD_DEFAULT_SIZE: usize = 2103;
/// Largest payload buffer
pub const PAYLOAD_MAX_SIZE: usize = 10_000;

/// Kind of a MAC frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Filler sent when nothing else is queued
    IdleMac,
    /// Packet store data
    Data,
    /// Jamming-inference heartbeat
    Heartbeat,
    /// Control message
    Control,
    /// Subcarrier allocation announcement
    NewAlloc,
    /// Emulated traffic
    Test,
}

impl FrameType {
    /// Wire code of this type
    pub fn code(&self) -> u8 {
        match self {
            FrameType::IdleMac => 0,
            FrameType::Data => 1,
            FrameType::Heartbeat => 2,
            FrameType::Control => 3,
            FrameType::NewAlloc => 4,
            FrameType::Test => 255,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameType::IdleMac),
            1 => Some(FrameType::Data),
            2 => Some(FrameType::Heartbeat),
            3 => Some(FrameType::Control),
            4 => Some(FrameType::NewAlloc),
            255 => Some(FrameType::Test),
            _ => None,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::IdleMac => "idle",
            FrameType::Data => "data",
            FrameType::Heartbeat => "heartbeat",
            FrameType::Control => "control",
            FrameType::NewAlloc => "new-alloc",
            FrameType::Test => "test",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded MAC header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_id: u16,
    pub source: u8,
    pub destination: u8,
    pub frame_type: FrameType,
}

impl FrameHeader {
    pub fn new(frame_id: u16, source: u8, destination: u8, frame_type: FrameType) -> Self {
        Self {
            frame_id,
            source,
            destination,
            frame_type,
        }
    }

    /// Encode into a default-size header buffer
    pub fn encode(&self) -> [u8; HEADER_DEFAULT_SIZE] {
        let mut buf = [0u8; HEADER_DEFAULT_SIZE];
        buf[0..2].copy_from_slice(&self.frame_id.to_be_bytes());
        buf[2] = self.source;
        buf[3] = self.destination;
        buf[4] = self.frame_type.code();
        buf
    }

    /// Decode a header, rejecting short buffers and unknown frame types
    pub fn decode(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() < 5 {
            return Err(LinkError::MalformedFrame(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }
        let frame_type = FrameType::from_code(bytes[4]).ok_or_else(|| {
            LinkError::MalformedFrame(format!("unknown frame type {}", bytes[4]))
        })?;
        Ok(Self {
            frame_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            source: bytes[2],
            destination: bytes[3],
            frame_type,
        })
    }
}

/// A frame ready for the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }
}

/// Fragment prefix carried at the front of every `Data` payload
///
/// Lets the receiving packet store reassemble packets that span frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub packet_id: u16,
    pub frame_index: u16,
    pub total_len: u32,
}

impl FragmentHeader {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.packet_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.frame_index.to_be_bytes());
        buf[4..8].copy_from_slice(&self.total_len.to_be_bytes());
        buf
    }

    /// Split a payload into its fragment header and body
    pub fn split(payload: &[u8]) -> Result<(Self, &[u8]), LinkError> {
        if payload.len() < Self::SIZE {
            return Err(LinkError::MalformedFrame(format!(
                "data payload too short: {} bytes",
                payload.len()
            )));
        }
        let (head, body) = payload.split_at(Self::SIZE);
        let header = Self {
            packet_id: u16::from_be_bytes([head[0], head[1]]),
            frame_index: u16::from_be_bytes([head[2], head[3]]),
            total_len: u32::from_be_bytes([head[4], head[5], head[6], head[7]]),
        };
        Ok((header, body))
    }
}
