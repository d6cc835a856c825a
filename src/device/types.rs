use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable capture device identifier (the interface name for libpcap devices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new `DeviceId` from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discovered capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub description: Option<String>,
    pub is_loopback: bool,
}

/// Link-layer header type of a captured frame.
///
/// Values follow the libpcap `DLT_*` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// BSD loopback encapsulation (DLT_NULL).
    Null,
    /// Ethernet II / 802.3 (DLT_EN10MB).
    Ethernet,
    /// Raw IPv4 or IPv6 without a link header (DLT_RAW).
    Raw,
    /// 802.11 wireless (DLT_IEEE802_11).
    Ieee80211,
    /// OpenBSD loopback (DLT_LOOP).
    Loopback,
    /// Linux "cooked" capture (DLT_LINUX_SLL).
    LinuxSll,
    /// Any other DLT value.
    Other(i32),
}

impl LinkType {
    /// Map a libpcap DLT value.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            0 => Self::Null,
            1 => Self::Ethernet,
            12 | 14 | 101 => Self::Raw,
            105 => Self::Ieee80211,
            108 => Self::Loopback,
            113 => Self::LinuxSll,
            other => Self::Other(other),
        }
    }

    /// The libpcap DLT value for this link type.
    pub fn dlt(self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Ethernet => 1,
            Self::Raw => 101,
            Self::Ieee80211 => 105,
            Self::Loopback => 108,
            Self::LinuxSll => 113,
            Self::Other(dlt) => dlt,
        }
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Ethernet => "Ethernet",
            Self::Raw => "Raw IP",
            Self::Ieee80211 => "802.11",
            Self::Loopback => "Loopback",
            Self::LinuxSll => "Linux SLL",
            Self::Other(_) => "Unknown",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(dlt) => write!(f, "DLT {dlt}"),
            other => f.write_str(other.name()),
        }
    }
}

/// A single captured frame as delivered by the device.
///
/// Immutable once constructed; ownership moves from the device's arrival
/// handler into the capture queue and then to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    data: Vec<u8>,
    timestamp: SystemTime,
    link_type: LinkType,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, timestamp: SystemTime, link_type: LinkType) -> Self {
        Self {
            data,
            timestamp,
            link_type,
        }
    }

    /// Captured bytes, starting at the link-layer header.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wall-clock arrival time.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Arrival time in microseconds since the Unix epoch (0 for pre-epoch clocks).
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }
}

/// Counters reported by the capture device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatistics {
    /// Packets received by the capture filter.
    pub received: u64,
    /// Packets dropped because the capture buffer was full.
    pub dropped: u64,
    /// Packets dropped by the network interface or driver.
    pub interface_dropped: u64,
}

/// Status delivered with the device's capture-stopped event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopStatus {
    CompletedWithoutError,
    Error(String),
}

impl StopStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Invoked on the device's notification thread for every captured frame.
/// Must return quickly: the device may drop frames while it runs.
pub type ArrivalHandler = Arc<dyn Fn(RawFrame) + Send + Sync>;

/// Invoked on the device's notification thread when capture ends.
pub type StoppedHandler = Arc<dyn Fn(StopStatus) + Send + Sync>;

/// Handler pair registered with a device for the duration of a session.
#[derive(Clone)]
pub struct DeviceHandlers {
    pub on_arrival: ArrivalHandler,
    pub on_stopped: StoppedHandler,
}

impl fmt::Debug for DeviceHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandlers").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn link_type_round_trips_known_dlt_values() {
        for link in [
            LinkType::Null,
            LinkType::Ethernet,
            LinkType::Raw,
            LinkType::Ieee80211,
            LinkType::Loopback,
            LinkType::LinuxSll,
        ] {
            assert_eq!(LinkType::from_dlt(link.dlt()), link);
        }
    }

    #[test]
    fn link_type_maps_legacy_raw_values() {
        assert_eq!(LinkType::from_dlt(12), LinkType::Raw);
        assert_eq!(LinkType::from_dlt(14), LinkType::Raw);
    }

    #[test]
    fn link_type_keeps_unknown_dlt() {
        let link = LinkType::from_dlt(147);
        assert_eq!(link, LinkType::Other(147));
        assert_eq!(link.dlt(), 147);
        assert_eq!(link.to_string(), "DLT 147");
    }

    #[test]
    fn raw_frame_exposes_timestamp_in_micros() {
        let ts = UNIX_EPOCH + Duration::from_micros(1_500_000);
        let frame = RawFrame::new(vec![1, 2, 3], ts, LinkType::Ethernet);
        assert_eq!(frame.timestamp_us(), 1_500_000);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
        assert_eq!(frame.link_type(), LinkType::Ethernet);
    }

    #[test]
    fn device_info_serialises_to_camelcase() {
        let info = DeviceInfo {
            id: DeviceId::new("eth0"),
            name: "eth0".to_string(),
            description: None,
            is_loopback: false,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "eth0");
        assert_eq!(json["isLoopback"], false);
        assert!(json["description"].is_null());
    }

    #[test]
    fn stop_status_reports_errors() {
        assert!(!StopStatus::CompletedWithoutError.is_error());
        assert!(StopStatus::Error("link down".into()).is_error());
    }

    #[test]
    fn handlers_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeviceHandlers>();
    }
}
