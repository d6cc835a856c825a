use std::sync::Arc;

use tracing::debug;

use crate::decode::PacketDecoder;
use crate::pipeline::packet::{PacketSnapshot, WrappedPacket};

/// Decodes the packet the user selected, once per selection.
pub struct PacketInspector {
    decoder: Arc<dyn PacketDecoder>,
    selection: Option<Selection>,
}

/// The selected packet and its description. Sequence numbers restart with
/// every session, so the cache is keyed on the packet itself.
struct Selection {
    packet: Arc<WrappedPacket>,
    description: String,
}

impl PacketInspector {
    pub fn new(decoder: Arc<dyn PacketDecoder>) -> Self {
        Self {
            decoder,
            selection: None,
        }
    }

    /// Select `sequence` in `packets` and return its description.
    ///
    /// Returns `None` (and clears the selection) when the packet is not in
    /// the snapshot. Re-selecting the current packet reuses the cached text.
    pub fn select(&mut self, packets: &PacketSnapshot, sequence: u64) -> Option<&str> {
        let Some(packet) = packets.get(sequence) else {
            self.selection = None;
            return None;
        };
        let cached = matches!(&self.selection, Some(s) if Arc::ptr_eq(&s.packet, packet));
        if !cached {
            let frame = packet.frame();
            debug!("decoding packet #{sequence} ({} bytes)", frame.len());
            self.selection = Some(Selection {
                packet: Arc::clone(packet),
                description: self.decoder.parse(frame.data(), frame.link_type()),
            });
        }
        self.selection.as_ref().map(|s| s.description.as_str())
    }

    pub fn selected(&self) -> Option<u64> {
        self.selection.as_ref().map(|s| s.packet.sequence())
    }

    /// Drop the selection, e.g. when a new session starts.
    pub fn clear(&mut self) {
        self.selection = None;
    }
}
