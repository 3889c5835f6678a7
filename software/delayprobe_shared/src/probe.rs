//! Construction and recognition of timestamped probe frames.

use byte_struct::*;

use crate::frame::{internet_checksum, parse_ethernet, parse_ipv4, EthernetHeader, Ipv4Header};
use crate::{IpProtocol, ETHERTYPE_IPV4, IPV4_OPTIONS_LEN, PROBE_TTL};

/// Total length of a probe frame on the wire
pub const PROBE_FRAME_LEN: usize = EthernetHeader::BYTE_LEN + PROBE_IPV4_LEN;

/// IPv4 header length of a probe, options included
pub const PROBE_IPV4_LEN: usize = Ipv4Header::BYTE_LEN + IPV4_OPTIONS_LEN;

/// The two kinds of probe sent on every tick.
///
/// Sentinel addresses only mark the probe kind; switches never forward on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Flooded out of every switch port; its arrival updates the delay store
    Primary,
    /// Sent to the switch and straight back to the controller; only logged
    Echo,
}

impl ProbeKind {
    pub fn protocol(self) -> IpProtocol {
        match self {
            Self::Primary => IpProtocol::Experimentation1,
            Self::Echo => IpProtocol::Experimentation2,
        }
    }

    /// Recognise a probe by its IP protocol number
    pub fn from_protocol(protocol: IpProtocol) -> Option<Self> {
        match protocol {
            IpProtocol::Experimentation1 => Some(Self::Primary),
            IpProtocol::Experimentation2 => Some(Self::Echo),
            _ => None,
        }
    }

    pub fn source_mac(self) -> [u8; 6] {
        match self {
            Self::Primary => [0, 0, 0, 0, 0, 0xee],
            Self::Echo => [0, 0, 0, 0, 0, 0xec],
        }
    }

    pub fn destination_mac(self) -> [u8; 6] {
        match self {
            Self::Primary => [0, 0, 0, 0, 0, 0xef],
            Self::Echo => [0, 0, 0, 0, 0, 0xed],
        }
    }

    pub fn source_ip(self) -> [u8; 4] {
        match self {
            Self::Primary => [0, 0, 0, 1],
            Self::Echo => [0, 0, 0, 3],
        }
    }

    pub fn destination_ip(self) -> [u8; 4] {
        match self {
            Self::Primary => [0, 0, 0, 2],
            Self::Echo => [0, 0, 0, 4],
        }
    }
}

/// Big-endian encoding of a nanosecond timestamp for the IPv4 options field
pub fn encode_timestamp(timestamp_ns: i64) -> [u8; IPV4_OPTIONS_LEN] {
    timestamp_ns.to_be_bytes()
}

/// Read a timestamp back out of IPv4 options.
/// Returns `None` if fewer than 8 option bytes are present.
pub fn decode_timestamp(options: &[u8]) -> Option<i64> {
    let bytes: [u8; IPV4_OPTIONS_LEN] = options.get(..IPV4_OPTIONS_LEN)?.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

/// Write a complete probe frame into the front of `bytes`,
/// which must be at least [`PROBE_FRAME_LEN`] long.
pub fn write_probe(kind: ProbeKind, timestamp_ns: i64, bytes: &mut [u8]) {
    let ethernet = EthernetHeader {
        destination: kind.destination_mac(),
        source: kind.source_mac(),
        ether_type: ETHERTYPE_IPV4,
    };
    ethernet.write_bytes(&mut bytes[..EthernetHeader::BYTE_LEN]);

    let ip = &mut bytes[EthernetHeader::BYTE_LEN..PROBE_FRAME_LEN];
    let header = Ipv4Header {
        version_ihl: (4 << 4) | (PROBE_IPV4_LEN / 4) as u8,
        dscp_ecn: 0,
        total_length: PROBE_IPV4_LEN as u16,
        identification: 0,
        flags_fragment_offset: 0,
        ttl: PROBE_TTL,
        protocol: kind.protocol(),
        header_checksum: 0,
        source: kind.source_ip(),
        destination: kind.destination_ip(),
    };
    header.write_bytes(&mut ip[..Ipv4Header::BYTE_LEN]);
    ip[Ipv4Header::BYTE_LEN..].copy_from_slice(&encode_timestamp(timestamp_ns));

    // Checksum covers the options too
    let checksum = internet_checksum(ip);
    ip[10..12].copy_from_slice(&checksum.to_be_bytes());
}

/// Build a probe frame stamped with `timestamp_ns`.
pub fn build_probe(kind: ProbeKind, timestamp_ns: i64) -> [u8; PROBE_FRAME_LEN] {
    let mut frame = [0_u8; PROBE_FRAME_LEN];
    write_probe(kind, timestamp_ns, &mut frame);
    frame
}

/// Recognise a probe frame, returning its kind and embedded send time.
///
/// Anything that is not an IPv4 frame carrying one of the probe protocol
/// numbers and a full timestamp yields `None`.
pub fn parse_probe(frame: &[u8]) -> Option<(ProbeKind, i64)> {
    let (ethernet, rest) = parse_ethernet(frame)?;
    if ethernet.ether_type != ETHERTYPE_IPV4 {
        return None;
    }
    let (header, options) = parse_ipv4(rest)?;
    let kind = ProbeKind::from_protocol(header.protocol)?;
    Some((kind, decode_timestamp(options)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_probe_layout() {
        let frame = build_probe(ProbeKind::Primary, 0x0102_0304_0506_0708);
        assert_eq!(frame.len(), 42);

        // Ethernet
        assert_eq!(&frame[0..6], &[0, 0, 0, 0, 0, 0xef]);
        assert_eq!(&frame[6..12], &[0, 0, 0, 0, 0, 0xee]);
        assert_eq!(&frame[12..14], &[0x08, 0x00]);

        // IPv4: version 4, IHL 7, ttl 1, protocol 253
        assert_eq!(frame[14], 0x47);
        assert_eq!(&frame[16..18], &[0, 28]);
        assert_eq!(frame[22], 1);
        assert_eq!(frame[23], 253);
        assert_eq!(&frame[26..30], &[0, 0, 0, 1]);
        assert_eq!(&frame[30..34], &[0, 0, 0, 2]);

        // Options are the big-endian timestamp
        assert_eq!(&frame[34..42], &[1, 2, 3, 4, 5, 6, 7, 8]);

        // Header including options checksums to zero
        assert_eq!(internet_checksum(&frame[14..42]), 0);
    }

    #[test]
    fn echo_probe_uses_distinct_markers() {
        let primary = build_probe(ProbeKind::Primary, 7);
        let echo = build_probe(ProbeKind::Echo, 7);
        assert_eq!(echo[23], 254);
        assert_ne!(&primary[0..12], &echo[0..12]);
        assert_eq!(parse_probe(&echo), Some((ProbeKind::Echo, 7)));
    }

    #[test]
    fn timestamp_survives_the_wire() {
        for ts in [0, 1, 1000, 1_700_000_000_123_456_789, i64::MAX] {
            let frame = build_probe(ProbeKind::Primary, ts);
            assert_eq!(parse_probe(&frame), Some((ProbeKind::Primary, ts)));
        }
    }

    #[test]
    fn ignores_ordinary_traffic() {
        let mut frame = build_probe(ProbeKind::Primary, 5);
        frame[23] = 17; // UDP
        assert_eq!(parse_probe(&frame), None);

        let mut arp = build_probe(ProbeKind::Primary, 5);
        arp[12..14].copy_from_slice(&[0x08, 0x06]);
        assert_eq!(parse_probe(&arp), None);

        assert_eq!(parse_probe(&frame[..30]), None);
    }

    #[test]
    fn short_options_have_no_timestamp() {
        assert_eq!(decode_timestamp(&[0, 0, 0, 1]), None);
        assert_eq!(decode_timestamp(&encode_timestamp(42)), Some(42));
    }
}
