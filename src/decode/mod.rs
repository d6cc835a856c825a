// Packet decoding for display. Never called on the capture path.
pub mod summary;

use crate::device::types::LinkType;

/// Turns captured bytes into a human-readable description.
pub trait PacketDecoder: Send + Sync {
    /// Multi-line description of every layer that could be decoded.
    fn parse(&self, data: &[u8], link_type: LinkType) -> String;

    /// One-line summary for list views.
    fn summarize(&self, data: &[u8], link_type: LinkType) -> String;
}

pub use summary::SummaryDecoder;
