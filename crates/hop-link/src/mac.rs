//! MAC layer
//!
//! Builds outgoing frames, dispatches received frames by type, keeps frame
//! and link counters, and owns the heartbeat monitor.

use std::fmt;

use hop_plan::{NetConfig, NodeRole, TaskAction, BROADCAST_ID, NULL_ID};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::allocation::SubcarrierAllocation;
use crate::error::LinkError;
use crate::frame::{
    FragmentHeader, Frame, FrameHeader, FrameType, PAYLOAD_DEFAULT_SIZE, PAYLOAD_MAX_SIZE,
};
use crate::heartbeat::{HeartbeatClass, HeartbeatConfig, HeartbeatMonitor};
use crate::modem::DetectedFrame;

/// A frame handed out by the packet store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    pub packet_id: u16,
    pub frame_index: u16,
    pub bytes: Vec<u8>,
    pub total_len: u32,
}

/// Reassembly state after adding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    Complete,
    Incomplete,
}

/// Fragmentation and reassembly of network packets
pub trait PacketStore: Send {
    /// Destination of the next queued frame
    fn next_destination(&mut self) -> Option<u8>;

    /// Next frame queued for `destination`, at most `max_len` bytes
    fn next_frame_for_destination(&mut self, destination: u8, max_len: usize)
        -> Option<StoredFrame>;

    /// Add a received frame to its packet
    fn add_frame(&mut self, packet_id: u16, frame_index: u16, bytes: &[u8], total_len: u32)
        -> PacketStatus;
}

/// MAC settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    /// Payload bytes per data frame
    pub payload_size: usize,
    /// Send test frames when the packet store is empty
    pub emulate_traffic: bool,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            payload_size: PAYLOAD_DEFAULT_SIZE,
            emulate_traffic: true,
        }
    }
}

/// Per-type frame counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub rx_all: u64,
    pub rx_idle: u64,
    pub rx_data_any: u64,
    pub rx_data_this_node: u64,
    pub rx_heartbeat: u64,
    pub rx_test: u64,
    pub rx_control: u64,
    pub rx_new_alloc: u64,
    pub rx_delivered: u64,
    pub tx_all: u64,
    pub tx_idle: u64,
    pub tx_data: u64,
    pub tx_heartbeat: u64,
    pub tx_test: u64,
    pub tx_fetched: u64,
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rx: all {} idle {} data {} (ours {}, delivered {}) heartbeat {} test {} control {} new-alloc {}",
            self.rx_all,
            self.rx_idle,
            self.rx_data_any,
            self.rx_data_this_node,
            self.rx_delivered,
            self.rx_heartbeat,
            self.rx_test,
            self.rx_control,
            self.rx_new_alloc
        )?;
        write!(
            f,
            "tx: all {} idle {} data {} (fetched {}) heartbeat {} test {}",
            self.tx_all, self.tx_idle, self.tx_data, self.tx_fetched, self.tx_heartbeat, self.tx_test
        )
    }
}

/// Physical-level counters over every detected frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkCounters {
    /// Payload bytes of every valid frame; drives the throughput meter
    pub valid_bytes: u64,
    pub valid_headers: u64,
    /// Headers lost to the channel or undecodable
    pub invalid_headers: u64,
    pub valid_payloads: u64,
    /// Header decoded but payload corrupt
    pub invalid_payloads: u64,
    pub packets_transmitted: u64,
}

/// Something the control loop has to act on after a frame was received
#[derive(Debug, Clone, PartialEq)]
pub enum MacEvent {
    /// A peer announced a new subcarrier allocation
    AllocationReceived(SubcarrierAllocation),
    /// A control message arrived
    Control { source: u8, payload: Vec<u8> },
}

/// Frame handling for one node
pub struct MacLayer {
    net: NetConfig,
    config: MacConfig,
    store: Option<Box<dyn PacketStore>>,
    tx_data_frame_id: u16,
    frame_stats: FrameStats,
    counters: LinkCounters,
    heartbeat: HeartbeatMonitor,
}

impl MacLayer {
    /// Validates the payload size against the frame limits
    pub fn new(
        net: NetConfig,
        config: MacConfig,
        heartbeat: HeartbeatConfig,
    ) -> Result<Self, LinkError> {
        if config.payload_size > PAYLOAD_MAX_SIZE {
            return Err(LinkError::FrameTooLarge {
                size: config.payload_size,
                max: PAYLOAD_MAX_SIZE,
            });
        }
        if config.payload_size <= FragmentHeader::SIZE {
            return Err(LinkError::InvalidConfig(format!(
                "payload size {} leaves no room for data",
                config.payload_size
            )));
        }
        Ok(Self {
            net,
            config,
            store: None,
            tx_data_frame_id: 0,
            frame_stats: FrameStats::default(),
            counters: LinkCounters::default(),
            heartbeat: HeartbeatMonitor::new(heartbeat),
        })
    }

    /// Attach a packet store for data frames
    pub fn with_packet_store(mut self, store: Box<dyn PacketStore>) -> Self {
        self.set_packet_store(store);
        self
    }

    /// Replace the packet store
    pub fn set_packet_store(&mut self, store: Box<dyn PacketStore>) {
        self.store = Some(store);
    }

    pub fn node_id(&self) -> u8 {
        self.net.node_id
    }

    pub fn role(&self) -> NodeRole {
        self.net.role()
    }

    /// Per-type frame counters
    pub fn frame_stats(&self) -> &FrameStats {
        &self.frame_stats
    }

    /// Physical-level counters since the node started
    pub fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    /// Heartbeat window and session totals
    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Data frame; increments the data frame id
    pub fn data_frame(&mut self, destination: u8, payload: Vec<u8>) -> Result<Frame, LinkError> {
        if payload.len() > PAYLOAD_MAX_SIZE {
            return Err(LinkError::FrameTooLarge {
                size: payload.len(),
                max: PAYLOAD_MAX_SIZE,
            });
        }
        self.tx_data_frame_id = self.tx_data_frame_id.wrapping_add(1);
        let header = FrameHeader::new(
            self.tx_data_frame_id,
            self.net.node_id,
            destination,
            FrameType::Data,
        );
        Ok(Frame::new(header, payload))
    }

    /// Full-size heartbeat broadcast
    pub fn heartbeat_frame(&self) -> Frame {
        let header = FrameHeader::new(0, self.net.node_id, BROADCAST_ID, FrameType::Heartbeat);
        Frame::new(header, vec![0; self.config.payload_size])
    }

    /// One-byte filler sent when there is nothing else to send
    pub fn idle_frame(&self) -> Frame {
        let header = FrameHeader::new(0, self.net.node_id, NULL_ID, FrameType::IdleMac);
        Frame::new(header, vec![0])
    }

    /// Full-size emulated traffic
    pub fn test_frame(&self, destination: u8) -> Frame {
        let header = FrameHeader::new(0, self.net.node_id, destination, FrameType::Test);
        Frame::new(header, vec![0; self.config.payload_size])
    }

    pub fn control_frame(&self, destination: u8, payload: Vec<u8>) -> Frame {
        let header = FrameHeader::new(0, self.net.node_id, destination, FrameType::Control);
        Frame::new(header, payload)
    }

    /// Broadcast announcement of a subcarrier allocation
    pub fn allocation_frame(&self, allocation: &SubcarrierAllocation) -> Frame {
        let header = FrameHeader::new(0, self.net.node_id, BROADCAST_ID, FrameType::NewAlloc);
        Frame::new(header, allocation.to_bytes())
    }

    /// Frame for the transmit side of a slot, if the action sends one
    pub fn build_tx_frame(&mut self, action: TaskAction) -> Option<Frame> {
        match action {
            TaskAction::Data | TaskAction::OfdmaData | TaskAction::McData => {
                Some(self.fetch_tx_frame())
            }
            TaskAction::Heartbeat => Some(self.heartbeat_frame()),
            TaskAction::Idle | TaskAction::RetuneOnly | TaskAction::Snapshot | TaskAction::Noise => {
                None
            }
        }
    }

    /// Next frame to send: packet store data, emulated traffic, or idle
    pub fn fetch_tx_frame(&mut self) -> Frame {
        if let Some(frame) = self.fetch_stored_frame() {
            self.frame_stats.tx_fetched += 1;
            return frame;
        }
        if self.config.emulate_traffic {
            self.test_frame(BROADCAST_ID)
        } else {
            self.idle_frame()
        }
    }

    fn fetch_stored_frame(&mut self) -> Option<Frame> {
        let max_len = self.config.payload_size - FragmentHeader::SIZE;
        let store = self.store.as_mut()?;
        let destination = store.next_destination()?;
        let stored = store.next_frame_for_destination(destination, max_len)?;

        let fragment = FragmentHeader {
            packet_id: stored.packet_id,
            frame_index: stored.frame_index,
            total_len: stored.total_len,
        };
        let mut payload = Vec::with_capacity(FragmentHeader::SIZE + stored.bytes.len());
        payload.extend_from_slice(&fragment.encode());
        payload.extend_from_slice(&stored.bytes);
        match self.data_frame(destination, payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Dropping stored frame for {}: {}", destination, e);
                None
            }
        }
    }

    /// Count a frame that went out on the air
    pub fn note_transmitted(&mut self, frame_type: FrameType) {
        self.counters.packets_transmitted += 1;
        self.frame_stats.tx_all += 1;
        match frame_type {
            FrameType::IdleMac => self.frame_stats.tx_idle += 1,
            FrameType::Data => self.frame_stats.tx_data += 1,
            FrameType::Heartbeat => self.frame_stats.tx_heartbeat += 1,
            FrameType::Test => self.frame_stats.tx_test += 1,
            FrameType::Control | FrameType::NewAlloc => {}
        }
    }

    /// Fold one detected frame into the counters and dispatch it by type
    pub fn receive(&mut self, detected: &DetectedFrame) -> Option<MacEvent> {
        let header = if detected.header_valid {
            match FrameHeader::decode(&detected.header) {
                Ok(header) => Some(header),
                Err(e) => {
                    debug!("Undecodable header: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let Some(header) = header else {
            self.counters.invalid_headers += 1;
            return None;
        };
        self.counters.valid_headers += 1;

        if !detected.payload_valid {
            self.counters.invalid_payloads += 1;
            return None;
        }
        self.counters.valid_payloads += 1;
        self.counters.valid_bytes += detected.payload.len() as u64;

        if header.frame_type == FrameType::Heartbeat {
            self.frame_stats.rx_heartbeat += 1;
            return None;
        }

        self.frame_stats.rx_all += 1;
        match header.frame_type {
            FrameType::IdleMac => {
                self.frame_stats.rx_idle += 1;
                None
            }
            FrameType::Data => {
                self.receive_data(&header, &detected.payload);
                None
            }
            FrameType::Test => {
                self.frame_stats.rx_test += 1;
                None
            }
            FrameType::Control => {
                self.frame_stats.rx_control += 1;
                Some(MacEvent::Control {
                    source: header.source,
                    payload: detected.payload.clone(),
                })
            }
            FrameType::NewAlloc => {
                self.frame_stats.rx_new_alloc += 1;
                match SubcarrierAllocation::from_bytes(&detected.payload) {
                    Ok(allocation) => Some(MacEvent::AllocationReceived(allocation)),
                    Err(e) => {
                        warn!("Ignoring allocation from node {}: {}", header.source, e);
                        None
                    }
                }
            }
            FrameType::Heartbeat => None,
        }
    }

    /// Whether a data frame with this destination is for us
    pub fn accepts(&self, destination: u8) -> bool {
        match self.role() {
            NodeRole::Basestation => true,
            NodeRole::Mobile => destination == self.net.node_id || destination == BROADCAST_ID,
        }
    }

    fn receive_data(&mut self, header: &FrameHeader, payload: &[u8]) {
        self.frame_stats.rx_data_any += 1;
        if !self.accepts(header.destination) {
            return;
        }
        self.frame_stats.rx_data_this_node += 1;

        let Some(store) = self.store.as_mut() else {
            return;
        };
        match FragmentHeader::split(payload) {
            Ok((fragment, body)) => {
                let status = store.add_frame(
                    fragment.packet_id,
                    fragment.frame_index,
                    body,
                    fragment.total_len,
                );
                if status == PacketStatus::Complete {
                    self.frame_stats.rx_delivered += 1;
                }
            }
            Err(e) => debug!("Data frame {} from {}: {}", header.frame_id, header.source, e),
        }
    }

    /// Classify a heartbeat opportunity from the frames of a receive burst
    pub fn record_heartbeat(&mut self, frames: &[DetectedFrame], noisy: bool) -> HeartbeatClass {
        let detected = !frames.is_empty();
        // any clean frame in a heartbeat slot counts, whatever its type
        let valid = frames.iter().any(DetectedFrame::is_valid);
        self.heartbeat.record(detected, valid, noisy)
    }

    /// Once-per-epoch heartbeat assessment; returns whether normal mode is
    /// selected
    pub fn assess_heartbeat(&mut self, waveform_is_normal: bool) -> bool {
        self.heartbeat.assess(waveform_is_normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct QueueStore {
        outbound: VecDeque<(u8, StoredFrame)>,
        received: Vec<(u16, Vec<u8>)>,
    }

    impl PacketStore for QueueStore {
        fn next_destination(&mut self) -> Option<u8> {
            self.outbound.front().map(|(d, _)| *d)
        }

        fn next_frame_for_destination(&mut self, destination: u8, _max: usize) -> Option<StoredFrame> {
            let pos = self.outbound.iter().position(|(d, _)| *d == destination)?;
            self.outbound.remove(pos).map(|(_, f)| f)
        }

        fn add_frame(&mut self, packet_id: u16, _idx: u16, bytes: &[u8], _total: u32) -> PacketStatus {
            self.received.push((packet_id, bytes.to_vec()));
            PacketStatus::Complete
        }
    }

    fn mac(node_id: u8) -> MacLayer {
        MacLayer::new(
            NetConfig::new(node_id, 3, vec![1, 2, 3]),
            MacConfig::default(),
            HeartbeatConfig::default(),
        )
        .unwrap()
    }

    fn detected(frame: &Frame) -> DetectedFrame {
        DetectedFrame {
            header: frame.header.encode().to_vec(),
            header_valid: true,
            payload: frame.payload.clone(),
            payload_valid: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_data_frame_ids_increment() {
        let mut m = mac(1);
        let a = m.data_frame(3, vec![1]).unwrap();
        let b = m.data_frame(3, vec![2]).unwrap();
        assert_eq!(a.header.frame_id + 1, b.header.frame_id);
        assert!(matches!(
            m.data_frame(3, vec![0; PAYLOAD_MAX_SIZE + 1]),
            Err(LinkError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_builders() {
        let m = mac(1);
        let hb = m.heartbeat_frame();
        assert_eq!(hb.header.frame_id, 0);
        assert_eq!(hb.header.destination, BROADCAST_ID);
        let idle = m.idle_frame();
        assert_eq!(idle.header.destination, NULL_ID);
        assert_eq!(idle.payload.len(), 1);
        let alloc = m.allocation_frame(&SubcarrierAllocation::inner());
        assert_eq!(alloc.frame_type(), FrameType::NewAlloc);
        assert_eq!(alloc.payload.len(), 512);
    }

    #[test]
    fn test_mobile_filters_data_by_destination() {
        let mut sender = mac(3);
        let mut mobile = mac(1).with_packet_store(Box::new(QueueStore::default()));

        let for_other = sender.data_frame(2, vec![0; 16]).unwrap();
        mobile.receive(&detected(&for_other));
        assert_eq!(mobile.frame_stats().rx_data_any, 1);
        assert_eq!(mobile.frame_stats().rx_data_this_node, 0);

        let for_us = sender.data_frame(1, vec![0; 16]).unwrap();
        let broadcast = sender.data_frame(BROADCAST_ID, vec![0; 16]).unwrap();
        mobile.receive(&detected(&for_us));
        mobile.receive(&detected(&broadcast));
        assert_eq!(mobile.frame_stats().rx_data_this_node, 2);
        assert_eq!(mobile.frame_stats().rx_delivered, 2);
    }

    #[test]
    fn test_basestation_accepts_everything() {
        let bs = mac(3);
        assert!(bs.accepts(1));
        assert!(bs.accepts(2));
        assert!(!mac(1).accepts(2));
    }

    #[test]
    fn test_heartbeat_excluded_from_frame_counters() {
        let mut m = mac(1);
        let hb = mac(3).heartbeat_frame();
        assert_eq!(m.receive(&detected(&hb)), None);
        assert_eq!(m.frame_stats().rx_all, 0);
        assert_eq!(m.frame_stats().rx_heartbeat, 1);
        assert_eq!(m.counters().valid_payloads, 1);
    }

    #[test]
    fn test_invalid_frames_counted() {
        let mut m = mac(1);
        let mut frame = detected(&mac(3).test_frame(BROADCAST_ID));
        frame.payload_valid = false;
        m.receive(&frame);
        frame.header[4] = 77;
        m.receive(&frame);
        assert_eq!(m.counters().valid_headers, 1);
        assert_eq!(m.counters().invalid_payloads, 1);
        assert_eq!(m.counters().invalid_headers, 1);
        assert_eq!(m.counters().valid_bytes, 0);
    }

    #[test]
    fn test_new_alloc_event() {
        let mut m = mac(3);
        let alloc = SubcarrierAllocation::full_band().with_null_hole(0, 150);
        let frame = mac(1).allocation_frame(&alloc);
        assert_eq!(
            m.receive(&detected(&frame)),
            Some(MacEvent::AllocationReceived(alloc))
        );
    }

    #[test]
    fn test_fetch_prefers_packet_store() {
        let mut store = QueueStore::default();
        store.outbound.push_back((
            3,
            StoredFrame {
                packet_id: 9,
                frame_index: 0,
                bytes: b"hello".to_vec(),
                total_len: 5,
            },
        ));
        let mut m = mac(1).with_packet_store(Box::new(store));
        let frame = m.fetch_tx_frame();
        assert_eq!(frame.frame_type(), FrameType::Data);
        assert_eq!(frame.header.destination, 3);
        let (fragment, body) = FragmentHeader::split(&frame.payload).unwrap();
        assert_eq!(fragment.packet_id, 9);
        assert_eq!(body, b"hello");

        assert_eq!(m.fetch_tx_frame().frame_type(), FrameType::Test);
    }

    #[test]
    fn test_idle_when_not_emulating() {
        let mut m = MacLayer::new(
            NetConfig::new(1, 3, vec![1, 2, 3]),
            MacConfig {
                emulate_traffic: false,
                ..Default::default()
            },
            HeartbeatConfig::default(),
        )
        .unwrap();
        assert_eq!(m.fetch_tx_frame().frame_type(), FrameType::IdleMac);
        assert_eq!(m.build_tx_frame(TaskAction::Noise), None);
        assert_eq!(
            m.build_tx_frame(TaskAction::Heartbeat).map(|f| f.frame_type()),
            Some(FrameType::Heartbeat)
        );
    }

    #[test]
    fn test_heartbeat_recording() {
        let mut m = mac(1);
        let hb = detected(&mac(3).heartbeat_frame());
        assert_eq!(m.record_heartbeat(&[hb], false), HeartbeatClass::Valid);
        assert_eq!(m.record_heartbeat(&[], true), HeartbeatClass::Jammed);
        assert_eq!(m.heartbeat().window().opportunities, 2);
    }

    #[test]
    fn test_heartbeat_slot_accepts_any_clean_frame() {
        let mut m = mac(1);
        let test = detected(&mac(3).test_frame(BROADCAST_ID));
        assert_eq!(m.record_heartbeat(&[test.clone()], false), HeartbeatClass::Valid);

        let mut corrupt = test;
        corrupt.payload_valid = false;
        assert_eq!(m.record_heartbeat(&[corrupt], false), HeartbeatClass::Errored);
        assert_eq!(m.heartbeat().window().valid, 1);
    }
}
