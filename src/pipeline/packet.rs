use std::sync::Arc;
use std::time::SystemTime;

use crate::device::types::{LinkType, RawFrame};

/// A captured frame numbered in arrival order within its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedPacket {
    sequence: u64,
    frame: RawFrame,
}

impl WrappedPacket {
    pub fn new(sequence: u64, frame: RawFrame) -> Self {
        Self { sequence, frame }
    }

    /// Position in the session, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    pub fn timestamp(&self) -> SystemTime {
        self.frame.timestamp()
    }

    pub fn link_type(&self) -> LinkType {
        self.frame.link_type()
    }

    /// Captured length in bytes.
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}

/// The session's append-only packet collection, owned by the capture worker.
#[derive(Debug, Default)]
pub struct PacketList {
    packets: Vec<Arc<WrappedPacket>>,
}

impl PacketList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the frames in order and append them. Returns how many were added.
    pub fn wrap_all(&mut self, frames: Vec<RawFrame>) -> usize {
        let added = frames.len();
        self.packets.reserve(added);
        for frame in frames {
            let sequence = self.next_sequence();
            self.packets
                .push(Arc::new(WrappedPacket::new(sequence, frame)));
        }
        added
    }

    /// The sequence number the next wrapped frame will get.
    pub fn next_sequence(&self) -> u64 {
        self.packets.len() as u64
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Immutable view for publishing. Packets are shared, not copied.
    pub fn snapshot(&self) -> PacketSnapshot {
        PacketSnapshot {
            packets: self.packets.iter().cloned().collect(),
        }
    }
}

/// Published view of a session's packets.
///
/// Stored in arrival order, so `get(sequence)` is an index lookup; displays
/// iterate with [`PacketSnapshot::recent_first`].
#[derive(Debug, Clone)]
pub struct PacketSnapshot {
    packets: Arc<[Arc<WrappedPacket>]>,
}

impl PacketSnapshot {
    pub fn empty() -> Self {
        Self {
            packets: Arc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Packets in arrival order (ascending sequence).
    pub fn in_arrival_order(&self) -> &[Arc<WrappedPacket>] {
        &self.packets
    }

    /// Packets newest first, for display.
    pub fn recent_first(&self) -> impl Iterator<Item = &Arc<WrappedPacket>> {
        self.packets.iter().rev()
    }

    /// Look up a packet by sequence number.
    pub fn get(&self, sequence: u64) -> Option<&Arc<WrappedPacket>> {
        usize::try_from(sequence)
            .ok()
            .and_then(|idx| self.packets.get(idx))
    }

    /// The most recently wrapped packet.
    pub fn latest(&self) -> Option<&Arc<WrappedPacket>> {
        self.packets.last()
    }

    /// Packets with a sequence number of at least `sequence`, in arrival order.
    pub fn since(&self, sequence: u64) -> &[Arc<WrappedPacket>] {
        let start = usize::try_from(sequence)
            .unwrap_or(usize::MAX)
            .min(self.packets.len());
        &self.packets[start..]
    }
}

impl Default for PacketSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
