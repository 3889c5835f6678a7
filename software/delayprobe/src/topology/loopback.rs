//! In-process switch fabric.
//!
//! Plays the topology store, the flow backend and the packet transport at once.
//! A switch with a capture flow hands every probe it is given straight back to
//! the controller as a packet-in on the port the probe went out of, which is
//! what a one-hop neighbour running the same capture flow would do.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::flow::CaptureFlow;
use crate::probe::{PacketChain, PacketInSender};

use super::{FlowProgrammer, NodeRecord, PacketTransport, SwitchId, SwitchPort, TopologyReader};

#[derive(Default)]
struct FabricState {
    /// Key: switch, value: port names including `LOCAL`
    switches: BTreeMap<SwitchId, Vec<String>>,
    flows: BTreeMap<SwitchId, Vec<CaptureFlow>>,
    packet_in: Option<PacketInSender>,
    /// Reflected frames waiting for [`LoopbackFabric::release_packet_ins`]
    held: Option<Vec<PacketChain>>,
    fail_reads: bool,
    failing_switches: BTreeSet<SwitchId>,
}

/// Shared handle to a software fabric. Clones drive the same switches.
#[derive(Clone, Default)]
pub struct LoopbackFabric {
    state: Arc<Mutex<FabricState>>,
}

impl LoopbackFabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, FabricState>, String> {
        self.state
            .lock()
            .map_err(|_| "Loopback fabric state lock poisoned".to_string())
    }

    /// Add or replace a switch. `LOCAL` is always added to its ports.
    pub fn add_switch(&self, switch_id: &str, ports: &[&str]) -> Result<(), String> {
        let mut ports: Vec<String> = ports.iter().map(|p| (*p).to_owned()).collect();
        if !ports.iter().any(|p| p == super::LOCAL_PORT) {
            ports.push(super::LOCAL_PORT.to_owned());
        }
        self.state()?.switches.insert(switch_id.to_owned(), ports);
        Ok(())
    }

    /// Remove a switch along with its flow table
    pub fn remove_switch(&self, switch_id: &str) -> Result<(), String> {
        let mut state = self.state()?;
        state.switches.remove(switch_id);
        state.flows.remove(switch_id);
        Ok(())
    }

    /// Deliver reflected probes to this packet-in registration
    pub fn connect_packet_in(&self, sender: PacketInSender) -> Result<(), String> {
        self.state()?.packet_in = Some(sender);
        Ok(())
    }

    /// Hold reflected frames on the fabric instead of delivering them,
    /// standing in for time spent on the wire.
    pub fn hold_packet_ins(&self) -> Result<(), String> {
        let mut state = self.state()?;
        if state.held.is_none() {
            state.held = Some(Vec::new());
        }
        Ok(())
    }

    /// Deliver every held frame and go back to immediate delivery.
    /// Returns the number of frames delivered.
    pub fn release_packet_ins(&self) -> Result<usize, String> {
        let mut state = self.state()?;
        let held = state.held.take().unwrap_or_default();
        let Some(packet_in) = state.packet_in.as_ref() else {
            return Ok(0);
        };
        for chain in &held {
            packet_in.notify(chain.clone())?;
        }
        Ok(held.len())
    }

    /// Make topology reads fail, as during a datastore outage
    pub fn set_fail_reads(&self, fail: bool) -> Result<(), String> {
        self.state()?.fail_reads = fail;
        Ok(())
    }

    /// Make every flow and packet operation on one switch fail
    pub fn set_switch_failing(&self, switch_id: &str, failing: bool) -> Result<(), String> {
        let mut state = self.state()?;
        if failing {
            state.failing_switches.insert(switch_id.to_owned());
        } else {
            state.failing_switches.remove(switch_id);
        }
        Ok(())
    }

    /// Flows installed on a switch, oldest first
    pub fn flows(&self, switch_id: &str) -> Vec<CaptureFlow> {
        self.state()
            .ok()
            .and_then(|s| s.flows.get(switch_id).cloned())
            .unwrap_or_default()
    }

    /// Reflect a frame back to the controller from each port, if the switch captures
    fn reflect(&self, switch_id: &str, ports: &[SwitchPort], frame: &[u8]) -> Result<(), String> {
        let mut state = self.state()?;
        if state.failing_switches.contains(switch_id) {
            return Err(format!("{switch_id} is not responding"));
        }
        if !state.switches.contains_key(switch_id) {
            return Err(format!("{switch_id} is not connected"));
        }
        if state.flows.get(switch_id).is_none_or(Vec::is_empty) {
            trace!("{switch_id} has no capture flow; dropping frame");
            return Ok(());
        }
        let chains = ports.iter().map(|port| PacketChain::decode(port.clone(), frame));
        if let Some(held) = state.held.as_mut() {
            held.extend(chains);
            return Ok(());
        }
        let Some(packet_in) = state.packet_in.as_ref() else {
            return Ok(());
        };
        for chain in chains {
            packet_in.notify(chain)?;
        }
        Ok(())
    }
}

impl TopologyReader for LoopbackFabric {
    fn read_nodes(&self) -> Result<Vec<NodeRecord>, String> {
        let state = self.state()?;
        if state.fail_reads {
            return Err("topology store unavailable".to_string());
        }
        Ok(state
            .switches
            .iter()
            .map(|(switch_id, ports)| NodeRecord {
                switch_id: switch_id.clone(),
                ports: ports.clone(),
            })
            .collect())
    }
}

impl FlowProgrammer for LoopbackFabric {
    fn add_flow(&self, switch_id: &str, flow: &CaptureFlow) -> Result<(), String> {
        let mut state = self.state()?;
        if state.failing_switches.contains(switch_id) {
            return Err(format!("{switch_id} is not responding"));
        }
        if !state.switches.contains_key(switch_id) {
            return Err(format!("{switch_id} is not connected"));
        }
        state
            .flows
            .entry(switch_id.to_owned())
            .or_default()
            .push(flow.clone());
        Ok(())
    }
}

impl PacketTransport for LoopbackFabric {
    fn flood(&self, switch_id: &str, frame: &[u8], exclude: &SwitchPort) -> Result<(), String> {
        let ports: Vec<SwitchPort> = {
            let state = self.state()?;
            state
                .switches
                .get(switch_id)
                .map(|ports| {
                    ports
                        .iter()
                        .map(|p| SwitchPort::new(switch_id, p))
                        .filter(|p| p != exclude && !p.is_local())
                        .collect()
                })
                .unwrap_or_default()
        };
        self.reflect(switch_id, &ports, frame)
    }

    fn send_to(&self, port: &SwitchPort, frame: &[u8]) -> Result<(), String> {
        self.reflect(&port.switch_id, std::slice::from_ref(port), frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use delayprobe_shared::{ProbeKind, build_probe};

    use crate::clock::ManualClock;
    use crate::delay::DelayStore;
    use crate::flow::{FlowInstaller, FlowSettings};
    use crate::probe::{ListenerWorkerHandle, ProbeListener};

    #[test]
    fn reads_switches_with_local_port() {
        let fabric = LoopbackFabric::new();
        fabric.add_switch("openflow:1", &["1", "2"]).unwrap();
        let nodes = fabric.read_nodes().unwrap();
        assert_eq!(nodes, vec![NodeRecord::new("openflow:1", &["1", "2", "LOCAL"])]);

        fabric.set_fail_reads(true).unwrap();
        assert!(fabric.read_nodes().is_err());
    }

    #[test]
    fn flood_reflects_only_after_capture_flow_is_installed() {
        let fabric = LoopbackFabric::new();
        fabric.add_switch("openflow:1", &["1", "2"]).unwrap();

        let store = DelayStore::new();
        let listener = ProbeListener::new(store.clone(), Arc::new(ManualClock::new(1500)));
        let worker = ListenerWorkerHandle::spawn(listener).unwrap();
        fabric.connect_packet_in(worker.sender()).unwrap();

        let frame = build_probe(ProbeKind::Primary, 1000);
        let local = SwitchPort::local("openflow:1");
        fabric.flood("openflow:1", &frame, &local).unwrap();

        let installer = FlowInstaller::new(Arc::new(fabric.clone()), FlowSettings::default());
        installer.add_initial_flow("openflow:1").unwrap();
        assert_eq!(fabric.flows("openflow:1").len(), 1);
        fabric.flood("openflow:1", &frame, &local).unwrap();

        // Only the second flood came back, once per non-local port
        assert_eq!(worker.close().unwrap(), 2);
        assert_eq!(store.get_delay("openflow:1:1"), Some(500));
        assert_eq!(store.get_delay("openflow:1:2"), Some(500));
        assert_eq!(store.get_delay("openflow:1:LOCAL"), None);
    }

    #[test]
    fn failing_switch_rejects_operations() {
        let fabric = LoopbackFabric::new();
        fabric.add_switch("openflow:1", &["1"]).unwrap();
        fabric.set_switch_failing("openflow:1", true).unwrap();

        let installer = FlowInstaller::new(Arc::new(fabric.clone()), FlowSettings::default());
        assert!(installer.add_initial_flow("openflow:1").is_err());
        assert!(
            fabric
                .send_to(&SwitchPort::local("openflow:1"), &[0; 42])
                .is_err()
        );

        fabric.set_switch_failing("openflow:1", false).unwrap();
        installer.add_initial_flow("openflow:1").unwrap();
        assert!(installer.add_initial_flow("openflow:9").is_err());
    }
}
