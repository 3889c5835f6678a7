//! Classifies packet-ins and turns returning probes into delay measurements.

use std::sync::Arc;

use tracing::{debug, info};

use delayprobe_shared::{ProbeKind, decode_timestamp};

use crate::clock::Clock;
use crate::delay::DelayStore;
use crate::topology::SwitchPort;

use super::packet::PacketChain;

/// A probe recognised on arrival
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeObservation {
    pub kind: ProbeKind,
    pub port: SwitchPort,
    pub delay_ns: i64,
}

/// Turns returning probes into delay measurements.
pub struct ProbeListener {
    store: DelayStore,
    clock: Arc<dyn Clock>,
}

impl ProbeListener {
    pub fn new(store: DelayStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Classify one packet-in.
    ///
    /// Primary probes update the delay of their ingress port. Echo probes
    /// are only logged. Everything else is ignored and yields `None`.
    pub fn on_packet_received(&self, chain: &PacketChain) -> Option<ProbeObservation> {
        // Read the clock before any decoding work
        let received_ns = self.clock.now_ns();

        chain.ethernet()?;
        let ip = chain.ipv4()?;
        let kind = ProbeKind::from_protocol(ip.protocol)?;
        let sent_ns = decode_timestamp(&ip.options)?;

        let delay_ns = received_ns.checked_sub(sent_ns)?;
        if delay_ns < 0 {
            // Not stamped by this controller's clock
            debug!("Dropping probe from the future on {}", chain.ingress());
            return None;
        }

        let port = chain.ingress().clone();
        match kind {
            ProbeKind::Primary => {
                self.store.set_delay(&port.id(), delay_ns);
                debug!("Delay on {port}: {delay_ns} ns");
            }
            ProbeKind::Echo => {
                info!("Controller round trip via {port}: {delay_ns} ns");
            }
        }

        Some(ProbeObservation {
            kind,
            port,
            delay_ns,
        })
    }
}
