//! Switch and port identities, and the collaborators that own the dataplane:
//! the topology store, the flow table backend, and the packet transport.

pub mod inventory;
pub mod loopback;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flow::CaptureFlow;

pub use inventory::{
    InventoryError, InventorySnapshot, InventoryTracker, RefreshOutcome, TopologyEvent,
};
pub use loopback::LoopbackFabric;

/// Port name of the switch's own connection to the controller
pub const LOCAL_PORT: &str = "LOCAL";

/// Switch identifier, e.g. `openflow:1`
pub type SwitchId = String;

/// One port on one switch; the unit of delay measurement.
///
/// Its string form `{switch_id}:{port_id}` (e.g. `openflow:1:2`) keys the delay store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SwitchPort {
    pub switch_id: SwitchId,
    pub port_id: String,
}

impl SwitchPort {
    /// Build a port from a switch id and either a bare port name (`2`)
    /// or a full connector id (`openflow:1:2`).
    pub fn new(switch_id: &str, port: &str) -> Self {
        let port_id = port
            .strip_prefix(switch_id)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(port);
        Self {
            switch_id: switch_id.to_owned(),
            port_id: port_id.to_owned(),
        }
    }

    /// The controller-facing port of a switch
    pub fn local(switch_id: &str) -> Self {
        Self::new(switch_id, LOCAL_PORT)
    }

    pub fn is_local(&self) -> bool {
        self.port_id == LOCAL_PORT
    }

    /// Node connector id, `{switch_id}:{port_id}`
    pub fn id(&self) -> String {
        format!("{}:{}", self.switch_id, self.port_id)
    }

    /// Split a node connector id at its last `:`.
    pub fn parse(id: &str) -> Option<Self> {
        let (switch_id, port_id) = id.rsplit_once(':')?;
        if switch_id.is_empty() || port_id.is_empty() {
            return None;
        }
        Some(Self::new(switch_id, port_id))
    }
}

impl fmt::Display for SwitchPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.switch_id, self.port_id)
    }
}

/// One switch as reported by the topology store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub switch_id: SwitchId,
    pub ports: Vec<String>,
}

impl NodeRecord {
    pub fn new(switch_id: &str, ports: &[&str]) -> Self {
        Self {
            switch_id: switch_id.to_owned(),
            ports: ports.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

/// Read access to the topology store
pub trait TopologyReader: Send + Sync {
    /// Every switch currently known, with its ports
    fn read_nodes(&self) -> Result<Vec<NodeRecord>, String>;
}

/// Flow table backend
pub trait FlowProgrammer: Send + Sync {
    /// Submit a flow to a switch, returning once the backend acknowledges it
    fn add_flow(&self, switch_id: &str, flow: &CaptureFlow) -> Result<(), String>;
}

/// Packet-out transport to the switches.
///
/// Both operations only hand the frame to the transport;
/// delivery is never confirmed.
pub trait PacketTransport: Send + Sync {
    /// Send a frame out of every port of a switch except `exclude`
    fn flood(&self, switch_id: &str, frame: &[u8], exclude: &SwitchPort) -> Result<(), String>;

    /// Send a frame out of one specific port
    fn send_to(&self, port: &SwitchPort, frame: &[u8]) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_full_port_names() {
        let bare = SwitchPort::new("openflow:1", "2");
        let full = SwitchPort::new("openflow:1", "openflow:1:2");
        assert_eq!(bare, full);
        assert_eq!(bare.id(), "openflow:1:2");
        assert_eq!(bare.to_string(), "openflow:1:2");
    }

    #[test]
    fn local_port_is_recognised() {
        assert!(SwitchPort::local("openflow:7").is_local());
        assert!(SwitchPort::new("openflow:7", "openflow:7:LOCAL").is_local());
        assert!(!SwitchPort::new("openflow:7", "1").is_local());
    }

    #[test]
    fn parses_connector_ids() {
        let port = SwitchPort::parse("openflow:1:LOCAL").unwrap();
        assert_eq!(port.switch_id, "openflow:1");
        assert_eq!(port.port_id, "LOCAL");
        assert!(SwitchPort::parse("nocolon").is_none());
        assert!(SwitchPort::parse("openflow:1:").is_none());
    }
}
