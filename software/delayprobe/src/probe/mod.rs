//! Probe injection and classification.

pub mod listener;
pub mod packet;
pub mod sender;
pub mod worker;

pub use listener::{ProbeListener, ProbeObservation};
pub use packet::{EthernetPacket, Ipv4Packet, PacketChain, RawPacket};
pub use sender::{ProbeSender, ProbeSenderHandle, TickReport};
pub use worker::{ListenerWorkerHandle, PacketInEvent, PacketInSender};
