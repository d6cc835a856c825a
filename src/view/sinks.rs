use std::io::Write;
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::decode::PacketDecoder;
use crate::pipeline::error::PresentationError;
use crate::pipeline::packet::{PacketSnapshot, WrappedPacket};
use crate::pipeline::sink::PresentationSink;

/// Packets an incremental sink has not emitted yet. `next` is the sequence
/// number after the last emitted packet; callers advance it per packet.
///
/// A snapshot shorter than what was already emitted means a new session
/// started, so emission restarts from 0.
fn unseen<'a>(next: &mut u64, packets: &'a PacketSnapshot) -> &'a [Arc<WrappedPacket>] {
    if (packets.len() as u64) < *next {
        *next = 0;
    }
    packets.since(*next)
}

/// Logs each newly published packet's summary via `tracing`.
pub struct LogSink {
    decoder: Arc<dyn PacketDecoder>,
    next: Mutex<u64>,
}

impl LogSink {
    pub fn new(decoder: Arc<dyn PacketDecoder>) -> Self {
        Self {
            decoder,
            next: Mutex::new(0),
        }
    }
}

impl PresentationSink for LogSink {
    fn set_packets_count(&self, count: u64) -> Result<(), PresentationError> {
        info!("{count} packets received by device");
        Ok(())
    }

    fn publish(&self, packets: &PacketSnapshot) -> Result<(), PresentationError> {
        let mut next = self.next.lock();
        for packet in unseen(&mut next, packets) {
            let frame = packet.frame();
            info!(
                "#{} {}",
                packet.sequence(),
                self.decoder.summarize(frame.data(), frame.link_type())
            );
            *next = packet.sequence() + 1;
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PacketRecord<'a> {
    sequence: u64,
    timestamp_us: u64,
    link_type: String,
    length: usize,
    summary: String,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CountRecord {
    packets_count: u64,
}

/// Writes one JSON object per line: a record per new packet, and a
/// `packetsCount` record per count update.
pub struct JsonLinesSink<W: Write + Send> {
    decoder: Arc<dyn PacketDecoder>,
    state: Mutex<JsonState<W>>,
}

struct JsonState<W> {
    writer: W,
    next: u64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, decoder: Arc<dyn PacketDecoder>) -> Self {
        Self {
            decoder,
            state: Mutex::new(JsonState { writer, next: 0 }),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.state.into_inner().writer
    }
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, record: &T) -> Result<(), PresentationError> {
    serde_json::to_writer(&mut *writer, record).map_err(|e| PresentationError(e.to_string()))?;
    writer
        .write_all(b"\n")
        .map_err(|e| PresentationError(e.to_string()))
}

impl<W: Write + Send> PresentationSink for JsonLinesSink<W> {
    fn set_packets_count(&self, count: u64) -> Result<(), PresentationError> {
        let mut state = self.state.lock();
        write_line(
            &mut state.writer,
            &CountRecord {
                packets_count: count,
            },
        )?;
        state
            .writer
            .flush()
            .map_err(|e| PresentationError(e.to_string()))
    }

    fn publish(&self, packets: &PacketSnapshot) -> Result<(), PresentationError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for packet in unseen(&mut state.next, packets) {
            let frame = packet.frame();
            let data = base64::engine::general_purpose::STANDARD.encode(frame.data());
            let record = PacketRecord {
                sequence: packet.sequence(),
                timestamp_us: frame.timestamp_us(),
                link_type: frame.link_type().to_string(),
                length: frame.len(),
                summary: self.decoder.summarize(frame.data(), frame.link_type()),
                data: &data,
            };
            write_line(&mut state.writer, &record)?;
            state.next = packet.sequence() + 1;
        }
        state
            .writer
            .flush()
            .map_err(|e| PresentationError(e.to_string()))
    }
}
