// Device domain: discovery, lifecycle and frame delivery.

pub mod backend;
pub mod dummy;
pub mod error;
#[cfg(test)]
pub mod mock;
#[cfg(feature = "pcap")]
pub mod pcap;
pub mod types;
