//! Decoded packet-in: the raw frame plus whatever protocol layers could be parsed from it.

use delayprobe_shared::frame::{parse_ethernet, parse_ipv4};
use delayprobe_shared::{ETHERTYPE_IPV4, IpProtocol};

use crate::topology::SwitchPort;

/// Frame as delivered by the switch, with the port it arrived on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPacket {
    pub ingress: SwitchPort,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthernetPacket {
    pub source: [u8; 6],
    pub destination: [u8; 6],
    pub ether_type: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub source: [u8; 4],
    pub destination: [u8; 4],
    pub options: Vec<u8>,
}

/// Layers decoded from one packet-in, outermost first.
///
/// Layers that could not be decoded are absent, as are all layers
/// inside them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketChain {
    raw: RawPacket,
    ethernet: Option<EthernetPacket>,
    ipv4: Option<Ipv4Packet>,
}

impl PacketChain {
    /// Decode as many layers as the frame holds
    pub fn decode(ingress: SwitchPort, frame: &[u8]) -> Self {
        let mut chain = Self {
            raw: RawPacket {
                ingress,
                payload: frame.to_vec(),
            },
            ethernet: None,
            ipv4: None,
        };

        let Some((eth, rest)) = parse_ethernet(frame) else {
            return chain;
        };
        chain.ethernet = Some(EthernetPacket {
            source: eth.source,
            destination: eth.destination,
            ether_type: eth.ether_type,
        });
        if eth.ether_type != ETHERTYPE_IPV4 {
            return chain;
        }

        if let Some((ip, options)) = parse_ipv4(rest) {
            chain.ipv4 = Some(Ipv4Packet {
                ttl: ip.ttl,
                protocol: ip.protocol,
                source: ip.source,
                destination: ip.destination,
                options: options.to_vec(),
            });
        }
        chain
    }

    /// Assemble a chain from layers decoded elsewhere
    pub fn from_layers(
        raw: RawPacket,
        ethernet: Option<EthernetPacket>,
        ipv4: Option<Ipv4Packet>,
    ) -> Self {
        Self {
            raw,
            ethernet,
            ipv4,
        }
    }

    pub fn raw(&self) -> &RawPacket {
        &self.raw
    }

    pub fn ingress(&self) -> &SwitchPort {
        &self.raw.ingress
    }

    pub fn ethernet(&self) -> Option<&EthernetPacket> {
        self.ethernet.as_ref()
    }

    pub fn ipv4(&self) -> Option<&Ipv4Packet> {
        self.ipv4.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delayprobe_shared::{ProbeKind, build_probe};

    #[test]
    fn decodes_all_layers_of_a_probe() {
        let port = SwitchPort::new("openflow:1", "1");
        let chain = PacketChain::decode(port.clone(), &build_probe(ProbeKind::Primary, 99));

        assert_eq!(chain.ingress(), &port);
        assert_eq!(chain.raw().payload.len(), 42);
        assert_eq!(chain.ethernet().unwrap().source, [0, 0, 0, 0, 0, 0xee]);
        let ip = chain.ipv4().unwrap();
        assert_eq!(ip.protocol, IpProtocol::Experimentation1);
        assert_eq!(ip.ttl, 1);
        assert_eq!(ip.options, 99_i64.to_be_bytes().to_vec());
    }

    #[test]
    fn stops_at_the_first_undecodable_layer() {
        let port = SwitchPort::new("openflow:1", "1");

        let truncated = PacketChain::decode(port.clone(), &[0_u8; 10]);
        assert!(truncated.ethernet().is_none());
        assert!(truncated.ipv4().is_none());

        let mut arp = build_probe(ProbeKind::Primary, 1);
        arp[12..14].copy_from_slice(&[0x08, 0x06]);
        let arp = PacketChain::decode(port, &arp);
        assert!(arp.ethernet().is_some());
        assert!(arp.ipv4().is_none());
    }
}
