//! Ethernet and IPv4 header layouts.
//!
//! Both are network byte order; only the fields needed to build and
//! recognise probes are broken out.
use byte_struct::*;
pub use byte_struct::{ByteStruct, ByteStructLen};

use crate::enum_with_unknown;

/// Ethernet II header without VLAN tags
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_be]
pub struct EthernetHeader {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub ether_type: u16,
}

/// Fixed 20-byte part of an IPv4 header.
/// Options, if any, follow immediately and are `ihl() * 4 - 20` bytes long.
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_be]
pub struct Ipv4Header {
    /// Version in the high nibble, header length in 32-bit words in the low nibble
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags_fragment_offset: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub header_checksum: u16,
    pub source: [u8; 4],
    pub destination: [u8; 4],
}

impl Ipv4Header {
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Header length in 32-bit words, options included
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0x0f
    }

    /// Number of option bytes that follow the fixed header
    pub fn options_len(&self) -> usize {
        (self.ihl() as usize * 4).saturating_sub(Self::BYTE_LEN)
    }
}

enum_with_unknown!(
    /// IANA-assigned IP protocol numbers relevant to probing
    #[derive(Default)]
    #[non_exhaustive]
    pub enum IpProtocol(u8) {
        Icmp = 1,
        Tcp = 6,
        Udp = 17,
        /// RFC 3692 experimentation number, used by primary probes
        Experimentation1 = 253,
        /// RFC 3692 experimentation number, used by echo probes
        Experimentation2 = 254,
        #[default]
        Reserved = 255,
    }
);

impl ByteStructLen for IpProtocol {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for IpProtocol {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// RFC 1071 internet checksum over a header with its checksum field zeroed
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in bytes.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += word as u32;
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Split an Ethernet frame into its header and the remaining bytes.
pub fn parse_ethernet(frame: &[u8]) -> Option<(EthernetHeader, &[u8])> {
    if frame.len() < EthernetHeader::BYTE_LEN {
        return None;
    }
    let header = EthernetHeader::read_bytes(&frame[..EthernetHeader::BYTE_LEN]);
    Some((header, &frame[EthernetHeader::BYTE_LEN..]))
}

/// Parse an IPv4 header, returning it along with its option bytes.
///
/// Returns `None` for anything that is not a complete IPv4 header.
pub fn parse_ipv4(packet: &[u8]) -> Option<(Ipv4Header, &[u8])> {
    if packet.len() < Ipv4Header::BYTE_LEN {
        return None;
    }
    let header = Ipv4Header::read_bytes(&packet[..Ipv4Header::BYTE_LEN]);
    if header.version() != 4 || header.ihl() < 5 {
        return None;
    }
    let end = Ipv4Header::BYTE_LEN + header.options_len();
    let options = packet.get(Ipv4Header::BYTE_LEN..end)?;
    Some((header, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_reference_header() {
        // Worked example from the IPv4 header checksum article on Wikipedia
        let mut header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(internet_checksum(&header), 0xb861);

        // A header carrying its own checksum sums to zero
        header[10..12].copy_from_slice(&0xb861_u16.to_be_bytes());
        assert_eq!(internet_checksum(&header), 0);
    }

    #[test]
    fn protocol_numbers_roundtrip_through_unknown() {
        assert_eq!(IpProtocol::from(253), IpProtocol::Experimentation1);
        assert_eq!(IpProtocol::from(254), IpProtocol::Experimentation2);
        assert_eq!(IpProtocol::from(99), IpProtocol::Unknown(99));
        assert_eq!(u8::from(IpProtocol::Unknown(99)), 99);
    }

    #[test]
    fn rejects_truncated_and_non_ipv4_headers() {
        assert!(parse_ipv4(&[0x45; 10]).is_none());

        let mut v6ish = [0_u8; 20];
        v6ish[0] = 0x65;
        assert!(parse_ipv4(&v6ish).is_none());

        // IHL claims options that are not present
        let mut short = [0_u8; 20];
        short[0] = 0x47;
        assert!(parse_ipv4(&short).is_none());
    }
}
