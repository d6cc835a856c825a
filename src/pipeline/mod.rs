// Capture pipeline: device arrival handler -> queue -> worker -> sink.
pub mod capture;
pub mod error;
pub mod fault;
pub mod packet;
pub mod queue;
pub mod refresh;
pub mod sink;
pub mod worker;
