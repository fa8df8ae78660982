//! In-memory packet store
//!
//! Outbound packets are cut into frames of at most the MAC's payload room;
//! inbound frames are appended to their packet until its total length is
//! reached. Frames are assumed to arrive in order; a frame with index 0
//! restarts its packet.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hop_link::{PacketStatus, PacketStore, StoredFrame};
use tracing::debug;

#[derive(Debug, Clone)]
struct OutboundPacket {
    destination: u8,
    packet_id: u16,
    data: Vec<u8>,
    offset: usize,
    next_index: u16,
}

/// Packet queues for one node
#[derive(Debug, Default)]
pub struct MemoryPacketStore {
    outbound: VecDeque<OutboundPacket>,
    next_packet_id: u16,
    partial: HashMap<u16, Vec<u8>>,
    delivered: Vec<Vec<u8>>,
}

impl MemoryPacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet and return its id
    pub fn queue_packet(&mut self, destination: u8, data: Vec<u8>) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        self.outbound.push_back(OutboundPacket {
            destination,
            packet_id: self.next_packet_id,
            data,
            offset: 0,
            next_index: 0,
        });
        self.next_packet_id
    }

    /// Packets not yet fully handed out
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Reassembled packets
    pub fn delivered(&self) -> &[Vec<u8>] {
        &self.delivered
    }

    pub fn take_delivered(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.delivered)
    }
}

impl PacketStore for MemoryPacketStore {
    fn next_destination(&mut self) -> Option<u8> {
        self.outbound.front().map(|p| p.destination)
    }

    fn next_frame_for_destination(&mut self, destination: u8, max_len: usize) -> Option<StoredFrame> {
        let pos = self
            .outbound
            .iter()
            .position(|p| p.destination == destination)?;
        let packet = &mut self.outbound[pos];

        let end = (packet.offset + max_len).min(packet.data.len());
        let frame = StoredFrame {
            packet_id: packet.packet_id,
            frame_index: packet.next_index,
            bytes: packet.data[packet.offset..end].to_vec(),
            total_len: packet.data.len() as u32,
        };
        packet.offset = end;
        packet.next_index = packet.next_index.wrapping_add(1);
        if packet.offset >= packet.data.len() {
            self.outbound.remove(pos);
        }
        Some(frame)
    }

    fn add_frame(&mut self, packet_id: u16, frame_index: u16, bytes: &[u8], total_len: u32) -> PacketStatus {
        let buffer = self.partial.entry(packet_id).or_default();
        if frame_index == 0 {
            buffer.clear();
        }
        buffer.extend_from_slice(bytes);

        if buffer.len() < total_len as usize {
            return PacketStatus::Incomplete;
        }
        let packet = self.partial.remove(&packet_id).unwrap_or_default();
        debug!("Packet {} reassembled ({} bytes)", packet_id, packet.len());
        self.delivered.push(packet);
        PacketStatus::Complete
    }
}

/// A [`MemoryPacketStore`] shared between a node and its owner
#[derive(Debug, Clone, Default)]
pub struct SharedPacketStore(Arc<Mutex<MemoryPacketStore>>);

impl SharedPacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, MemoryPacketStore> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PacketStore for SharedPacketStore {
    fn next_destination(&mut self) -> Option<u8> {
        self.lock().next_destination()
    }

    fn next_frame_for_destination(&mut self, destination: u8, max_len: usize) -> Option<StoredFrame> {
        self.lock().next_frame_for_destination(destination, max_len)
    }

    fn add_frame(&mut self, packet_id: u16, frame_index: u16, bytes: &[u8], total_len: u32) -> PacketStatus {
        self.lock().add_frame(packet_id, frame_index, bytes, total_len)
    }
}
