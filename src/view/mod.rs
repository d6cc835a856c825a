// Presentation adapters for the capture pipeline.
pub mod selection;
pub mod sinks;

pub use selection::PacketInspector;
pub use sinks::{JsonLinesSink, LogSink};
