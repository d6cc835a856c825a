//! Header dissection for the common link, network and transport layers.
//!
//! Malformed or truncated input never fails: decoding stops at the first
//! layer that cannot be read and the description covers what was decoded.

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::decode::PacketDecoder;
use crate::device::types::LinkType;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;

const ETHERNET_HEADER_LEN: usize = 14;
const SLL_HEADER_LEN: usize = 16;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const ARP_IPV4_LEN: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkHeader {
    Ethernet {
        source: [u8; 6],
        destination: [u8; 6],
        vlan: Option<u16>,
    },
    Cooked {
        source: Option<[u8; 6]>,
    },
    Loopback {
        family: u32,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NetworkHeader {
    Ipv4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: u8,
        ttl: u8,
        total_length: u16,
    },
    Ipv6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
        payload_length: u16,
    },
    Arp {
        operation: u16,
        sender_mac: [u8; 6],
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    },
    Other {
        ethertype: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TransportHeader {
    Tcp {
        source_port: u16,
        destination_port: u16,
        sequence: u32,
        acknowledgement: u32,
        flags: u8,
        window: u16,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
        length: u16,
    },
    Icmp {
        version6: bool,
        kind: u8,
        code: u8,
    },
    Other {
        protocol: u8,
    },
}

/// Every layer decoded from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Dissection {
    length: usize,
    link_type: LinkType,
    link: Option<LinkHeader>,
    network: Option<NetworkHeader>,
    transport: Option<TransportHeader>,
    payload_len: usize,
}

fn be16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*data.get(at)?, *data.get(at + 1)?]))
}

fn be32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn mac(data: &[u8], at: usize) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    out.copy_from_slice(data.get(at..at + 6)?);
    Some(out)
}

fn ipv4(data: &[u8], at: usize) -> Option<Ipv4Addr> {
    let b = data.get(at..at + 4)?;
    Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
}

fn ipv6(data: &[u8], at: usize) -> Option<Ipv6Addr> {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(data.get(at..at + 16)?);
    Some(Ipv6Addr::from(octets))
}

fn format_mac(addr: &[u8; 6]) -> String {
    addr.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// EtherType implied by the IP version nibble, for link types without one.
fn ethertype_from_version(data: &[u8]) -> Option<u16> {
    match data.first()? >> 4 {
        4 => Some(ETHERTYPE_IPV4),
        6 => Some(ETHERTYPE_IPV6),
        _ => None,
    }
}

/// Split the link header off. Returns the header, the EtherType of what
/// follows and the remaining bytes.
fn dissect_link(data: &[u8], link_type: LinkType) -> Option<(LinkHeader, Option<u16>, &[u8])> {
    match link_type {
        LinkType::Ethernet => {
            let destination = mac(data, 0)?;
            let source = mac(data, 6)?;
            let mut ethertype = be16(data, 12)?;
            let mut offset = ETHERNET_HEADER_LEN;
            let mut vlan = None;
            if ethertype == ETHERTYPE_VLAN {
                vlan = Some(be16(data, 14)? & 0x0FFF);
                ethertype = be16(data, 16)?;
                offset += 4;
            }
            let header = LinkHeader::Ethernet {
                source,
                destination,
                vlan,
            };
            Some((header, Some(ethertype), data.get(offset..)?))
        }
        LinkType::LinuxSll => {
            let address_len = be16(data, 4)?;
            let source = if address_len == 6 { mac(data, 6) } else { None };
            let protocol = be16(data, 14)?;
            Some((
                LinkHeader::Cooked { source },
                Some(protocol),
                data.get(SLL_HEADER_LEN..)?,
            ))
        }
        LinkType::Null | LinkType::Loopback => {
            let raw = data.get(..4)?;
            // DLT_NULL uses host byte order, DLT_LOOP network byte order
            let family = if link_type == LinkType::Null {
                u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]])
            } else {
                u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
            };
            let payload = &data[4..];
            Some((
                LinkHeader::Loopback { family },
                ethertype_from_version(payload),
                payload,
            ))
        }
        LinkType::Raw => Some((LinkHeader::None, ethertype_from_version(data), data)),
        LinkType::Ieee80211 | LinkType::Other(_) => None,
    }
}

/// Decode the network layer. Returns the header and the transport bytes.
fn dissect_network(ethertype: u16, data: &[u8]) -> Option<(NetworkHeader, &[u8])> {
    match ethertype {
        ETHERTYPE_IPV4 => {
            if data.len() < IPV4_MIN_HEADER_LEN || data[0] >> 4 != 4 {
                return None;
            }
            let header_len = usize::from(data[0] & 0x0F) * 4;
            let header = NetworkHeader::Ipv4 {
                source: ipv4(data, 12)?,
                destination: ipv4(data, 16)?,
                protocol: data[9],
                ttl: data[8],
                total_length: be16(data, 2)?,
            };
            Some((header, data.get(header_len.max(IPV4_MIN_HEADER_LEN)..)?))
        }
        ETHERTYPE_IPV6 => {
            if data.len() < IPV6_HEADER_LEN || data[0] >> 4 != 6 {
                return None;
            }
            let header = NetworkHeader::Ipv6 {
                source: ipv6(data, 8)?,
                destination: ipv6(data, 24)?,
                next_header: data[6],
                hop_limit: data[7],
                payload_length: be16(data, 4)?,
            };
            Some((header, &data[IPV6_HEADER_LEN..]))
        }
        ETHERTYPE_ARP => {
            if data.len() < ARP_IPV4_LEN {
                return None;
            }
            let header = NetworkHeader::Arp {
                operation: be16(data, 6)?,
                sender_mac: mac(data, 8)?,
                sender_ip: ipv4(data, 14)?,
                target_ip: ipv4(data, 24)?,
            };
            Some((header, &data[ARP_IPV4_LEN..]))
        }
        other => Some((NetworkHeader::Other { ethertype: other }, data)),
    }
}

/// Decode the transport layer. Returns the header and the payload length.
fn dissect_transport(protocol: u8, data: &[u8]) -> Option<(TransportHeader, usize)> {
    match protocol {
        IPPROTO_TCP => {
            let header_len = usize::from(*data.get(12)? >> 4) * 4;
            let header = TransportHeader::Tcp {
                source_port: be16(data, 0)?,
                destination_port: be16(data, 2)?,
                sequence: be32(data, 4)?,
                acknowledgement: be32(data, 8)?,
                flags: *data.get(13)?,
                window: be16(data, 14)?,
            };
            Some((header, data.len().saturating_sub(header_len)))
        }
        IPPROTO_UDP => {
            let header = TransportHeader::Udp {
                source_port: be16(data, 0)?,
                destination_port: be16(data, 2)?,
                length: be16(data, 4)?,
            };
            Some((header, data.len().saturating_sub(8)))
        }
        IPPROTO_ICMP | IPPROTO_ICMPV6 => {
            let header = TransportHeader::Icmp {
                version6: protocol == IPPROTO_ICMPV6,
                kind: *data.first()?,
                code: *data.get(1)?,
            };
            Some((header, data.len().saturating_sub(8)))
        }
        other => Some((TransportHeader::Other { protocol: other }, data.len())),
    }
}

fn dissect(data: &[u8], link_type: LinkType) -> Dissection {
    let mut out = Dissection {
        length: data.len(),
        link_type,
        link: None,
        network: None,
        transport: None,
        payload_len: 0,
    };
    let Some((link, ethertype, rest)) = dissect_link(data, link_type) else {
        return out;
    };
    out.link = Some(link);
    out.payload_len = rest.len();
    let Some((network, rest)) = ethertype.and_then(|t| dissect_network(t, rest)) else {
        return out;
    };
    let protocol = match &network {
        NetworkHeader::Ipv4 { protocol, .. } => Some(*protocol),
        NetworkHeader::Ipv6 { next_header, .. } => Some(*next_header),
        NetworkHeader::Arp { .. } | NetworkHeader::Other { .. } => None,
    };
    out.network = Some(network);
    out.payload_len = rest.len();
    if let Some((transport, payload_len)) = protocol.and_then(|p| dissect_transport(p, rest)) {
        out.transport = Some(transport);
        out.payload_len = payload_len;
    }
    out
}

fn ethertype_name(ethertype: u16) -> &'static str {
    match ethertype {
        ETHERTYPE_IPV4 => "IPv4",
        ETHERTYPE_IPV6 => "IPv6",
        ETHERTYPE_ARP => "ARP",
        0x8035 => "RARP",
        0x88CC => "LLDP",
        0x888E => "EAPOL",
        _ => "unknown",
    }
}

fn icmp_name(version6: bool, kind: u8) -> String {
    let name = match (version6, kind) {
        (false, 0) | (true, 129) => "echo reply",
        (false, 8) | (true, 128) => "echo request",
        (false, 3) | (true, 1) => "destination unreachable",
        (false, 11) | (true, 3) => "time exceeded",
        (true, 135) => "neighbor solicitation",
        (true, 136) => "neighbor advertisement",
        _ => return format!("type {kind}"),
    };
    name.to_string()
}

fn tcp_flags(flags: u8) -> String {
    const NAMES: [(u8, char); 6] = [
        (0x02, 'S'),
        (0x10, '.'),
        (0x08, 'P'),
        (0x01, 'F'),
        (0x04, 'R'),
        (0x20, 'U'),
    ];
    let out: String = NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, c)| *c)
        .collect();
    if out.is_empty() {
        "none".to_string()
    } else {
        out
    }
}

fn addresses(network: &NetworkHeader) -> Option<(IpAddr, IpAddr)> {
    match network {
        NetworkHeader::Ipv4 {
            source,
            destination,
            ..
        } => Some(((*source).into(), (*destination).into())),
        NetworkHeader::Ipv6 {
            source,
            destination,
            ..
        } => Some(((*source).into(), (*destination).into())),
        _ => None,
    }
}

fn endpoint(addr: IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

impl Dissection {
    fn summary(&self) -> String {
        let Some(network) = &self.network else {
            return match &self.link {
                Some(_) => format!("{} frame, {} bytes", self.link_type, self.length),
                None => format!("{} bytes ({})", self.length, self.link_type),
            };
        };
        if let NetworkHeader::Arp {
            operation,
            sender_mac,
            sender_ip,
            target_ip,
        } = network
        {
            return match operation {
                1 => format!("ARP who-has {target_ip} tell {sender_ip}"),
                2 => format!("ARP {sender_ip} is-at {}", format_mac(sender_mac)),
                op => format!("ARP op {op} {sender_ip} > {target_ip}"),
            };
        }
        if let NetworkHeader::Other { ethertype } = network {
            return format!(
                "EtherType 0x{ethertype:04x} ({}), {} bytes",
                ethertype_name(*ethertype),
                self.length
            );
        }
        let Some((source, destination)) = addresses(network) else {
            return format!("{} bytes", self.length);
        };
        match &self.transport {
            Some(TransportHeader::Tcp {
                source_port,
                destination_port,
                flags,
                ..
            }) => format!(
                "{} > {} TCP [{}] len {}",
                endpoint(source, *source_port),
                endpoint(destination, *destination_port),
                tcp_flags(*flags),
                self.payload_len
            ),
            Some(TransportHeader::Udp {
                source_port,
                destination_port,
                ..
            }) => format!(
                "{} > {} UDP len {}",
                endpoint(source, *source_port),
                endpoint(destination, *destination_port),
                self.payload_len
            ),
            Some(TransportHeader::Icmp { version6, kind, .. }) => format!(
                "{source} > {destination} {} {}",
                if *version6 { "ICMPv6" } else { "ICMP" },
                icmp_name(*version6, *kind)
            ),
            Some(TransportHeader::Other { protocol }) => {
                format!("{source} > {destination} protocol {protocol}")
            }
            None => format!("{source} > {destination} (truncated)"),
        }
    }

    fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Frame: {} bytes on {}", self.length, self.link_type);

        match &self.link {
            Some(LinkHeader::Ethernet {
                source,
                destination,
                vlan,
            }) => {
                let _ = write!(
                    out,
                    "Ethernet II: {} > {}",
                    format_mac(source),
                    format_mac(destination)
                );
                if let Some(id) = vlan {
                    let _ = write!(out, ", vlan {id}");
                }
                out.push('\n');
            }
            Some(LinkHeader::Cooked { source }) => {
                let from = source.as_ref().map_or_else(|| "?".to_string(), format_mac);
                let _ = writeln!(out, "Linux cooked capture: from {from}");
            }
            Some(LinkHeader::Loopback { family }) => {
                let _ = writeln!(out, "Loopback: family {family}");
            }
            Some(LinkHeader::None) => {}
            None => {
                let _ = writeln!(out, "Link layer not decoded");
                return out;
            }
        }

        match &self.network {
            Some(NetworkHeader::Ipv4 {
                source,
                destination,
                protocol,
                ttl,
                total_length,
            }) => {
                let _ = writeln!(
                    out,
                    "IPv4: {source} > {destination}, protocol {protocol}, ttl {ttl}, length {total_length}"
                );
            }
            Some(NetworkHeader::Ipv6 {
                source,
                destination,
                next_header,
                hop_limit,
                payload_length,
            }) => {
                let _ = writeln!(
                    out,
                    "IPv6: {source} > {destination}, next header {next_header}, hop limit {hop_limit}, payload {payload_length}"
                );
            }
            Some(NetworkHeader::Arp {
                operation,
                sender_mac,
                sender_ip,
                target_ip,
            }) => {
                let _ = writeln!(
                    out,
                    "ARP: operation {operation}, sender {sender_ip} ({}), target {target_ip}",
                    format_mac(sender_mac)
                );
            }
            Some(NetworkHeader::Other { ethertype }) => {
                let _ = writeln!(
                    out,
                    "EtherType: 0x{ethertype:04x} ({})",
                    ethertype_name(*ethertype)
                );
            }
            None => {}
        }

        match &self.transport {
            Some(TransportHeader::Tcp {
                source_port,
                destination_port,
                sequence,
                acknowledgement,
                flags,
                window,
            }) => {
                let _ = writeln!(
                    out,
                    "TCP: {source_port} > {destination_port}, flags [{}], seq {sequence}, ack {acknowledgement}, win {window}",
                    tcp_flags(*flags)
                );
            }
            Some(TransportHeader::Udp {
                source_port,
                destination_port,
                length,
            }) => {
                let _ = writeln!(out, "UDP: {source_port} > {destination_port}, length {length}");
            }
            Some(TransportHeader::Icmp {
                version6,
                kind,
                code,
            }) => {
                let _ = writeln!(
                    out,
                    "{}: {} (code {code})",
                    if *version6 { "ICMPv6" } else { "ICMP" },
                    icmp_name(*version6, *kind)
                );
            }
            Some(TransportHeader::Other { protocol }) => {
                let _ = writeln!(out, "Transport: protocol {protocol} not decoded");
            }
            None => {}
        }

        let _ = writeln!(out, "Payload: {} bytes", self.payload_len);
        out
    }
}

/// Decoder for Ethernet, Linux cooked, loopback and raw IP captures.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryDecoder;

impl SummaryDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl PacketDecoder for SummaryDecoder {
    fn parse(&self, data: &[u8], link_type: LinkType) -> String {
        dissect(data, link_type).describe()
    }

    fn summarize(&self, data: &[u8], link_type: LinkType) -> String {
        dissect(data, link_type).summary()
    }
}
