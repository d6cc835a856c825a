use crate::pipeline::error::PresentationError;
use crate::pipeline::packet::PacketSnapshot;

/// Consumer of the capture worker's output.
///
/// Both methods are called on the capture worker thread. Implementations that
/// drive a UI should hand the data to their own thread and return quickly.
pub trait PresentationSink: Send + Sync {
    /// The device-reported count of received packets.
    fn set_packets_count(&self, count: u64) -> Result<(), PresentationError>;

    /// The full session collection after a drain. Replaces whatever was
    /// published before.
    fn publish(&self, packets: &PacketSnapshot) -> Result<(), PresentationError>;
}
