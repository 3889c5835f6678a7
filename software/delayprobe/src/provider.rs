//! Wires the components together and owns their lifecycles.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::context::{ActiveFlag, ProbeCtx};
use crate::delay::{DelayService, DelayStore};
use crate::flow::FlowInstaller;
use crate::logging::{init_logging, init_stdout_logging};
use crate::probe::{ListenerWorkerHandle, PacketInSender, ProbeListener, ProbeSender, ProbeSenderHandle};
use crate::topology::{
    FlowProgrammer, InventoryTracker, PacketTransport, TopologyEvent, TopologyReader,
};

/// One probing deployment: inventory, flows, sender, listener and queries.
///
/// Nothing runs until [`DelayProbeProvider::init`]. Dropping the provider
/// closes it.
pub struct DelayProbeProvider {
    ctx: ProbeCtx,
    inventory: InventoryTracker,
    installer: Arc<FlowInstaller>,
    transport: Arc<dyn PacketTransport>,
    clock: Arc<dyn Clock>,
    store: DelayStore,
    service: DelayService,
    active: ActiveFlag,
    listener: Option<ListenerWorkerHandle>,
    sender: Option<ProbeSenderHandle>,
    /// Set by [`DelayProbeProvider::close`]; a closed provider cannot be restarted
    closed: bool,
}

impl DelayProbeProvider {
    pub fn new(
        ctx: ProbeCtx,
        reader: Arc<dyn TopologyReader>,
        programmer: Arc<dyn FlowProgrammer>,
        transport: Arc<dyn PacketTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, String> {
        ctx.validate()?;

        let inventory = InventoryTracker::new(reader, ctx.refresh_delay());
        let installer = Arc::new(FlowInstaller::new(programmer, ctx.flow.clone()));
        let store = DelayStore::new();
        let service = DelayService::new(store.clone());
        let active = ActiveFlag::new(ctx.is_active);

        Ok(Self {
            ctx,
            inventory,
            installer,
            transport,
            clock,
            store,
            service,
            active,
            listener: None,
            sender: None,
            closed: false,
        })
    }

    /// Populate the inventory, install capture flows, and start
    /// the listener and, if active, the probe loop.
    pub fn init(&mut self) -> Result<(), String> {
        if self.closed {
            return Err("Delay probe provider is closed".to_string());
        }
        if self.listener.is_some() {
            return Err("Delay probe provider is already initialised".to_string());
        }

        if self.ctx.file_logging {
            let log_path = init_logging(&self.ctx.op_dir, &self.ctx.op_name)?;
            info!("Logging to {log_path:?}");
        } else if let Err(e) = init_stdout_logging() {
            // Usually a host subscriber is already installed and receives our events
            warn!("{e}");
        }
        info!("Starting delay probing run {}", self.ctx.op_name);

        // Every published snapshot installs flows on switches that lack one
        let installer = Arc::clone(&self.installer);
        self.inventory.set_refresh_hook(move |snapshot| {
            let failures = installer.add_initial_flows(snapshot.switches());
            if !failures.is_empty() {
                warn!("Capture flow missing on {} switches", failures.len());
            }
        });

        match self.inventory.refresh(true) {
            Ok(_) => info!(
                "Initial inventory: {} switches",
                self.inventory.snapshot().len()
            ),
            // Probing starts anyway and the next topology change retries the read
            Err(e) => warn!("{e}"),
        }

        let listener = ProbeListener::new(self.store.clone(), Arc::clone(&self.clock));
        self.listener = Some(ListenerWorkerHandle::spawn(listener)?);

        if self.active.get() {
            self.start_sender()?;
        } else {
            info!("Probing is inactive; probe loop not started");
        }
        Ok(())
    }

    fn start_sender(&mut self) -> Result<(), String> {
        let sender = ProbeSender::new(
            self.inventory.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
            self.active.clone(),
            self.ctx.tick_interval(),
        );
        self.sender = Some(sender.spawn()?);
        Ok(())
    }

    /// Registration for the packet-in notifier.
    /// `None` before [`DelayProbeProvider::init`] and after close.
    pub fn packet_in_sender(&self) -> Option<PacketInSender> {
        self.listener.as_ref().map(ListenerWorkerHandle::sender)
    }

    /// Entry point for the topology change notifier
    pub fn on_topology_changed(&self, event: &TopologyEvent) -> bool {
        if let TopologyEvent::NodeRemoved(switch_id) = event {
            self.installer.forget_switch(switch_id);
        }
        self.inventory.on_topology_changed(event)
    }

    pub fn service(&self) -> DelayService {
        self.service.clone()
    }

    pub fn store(&self) -> DelayStore {
        self.store.clone()
    }

    pub fn inventory(&self) -> &InventoryTracker {
        &self.inventory
    }

    pub fn installer(&self) -> &FlowInstaller {
        &self.installer
    }

    pub fn is_probing(&self) -> bool {
        self.sender.as_ref().is_some_and(ProbeSenderHandle::is_running)
    }

    /// Turn probing on or off.
    ///
    /// Switching off lets the loop exit at its next tick boundary;
    /// switching back on starts a fresh loop.
    pub fn set_active(&mut self, active: bool) -> Result<(), String> {
        if self.closed && active {
            return Err("Delay probe provider is closed".to_string());
        }
        self.active.set(active);
        if !active || self.listener.is_none() || self.is_probing() {
            return Ok(());
        }
        if let Some(mut stale) = self.sender.take() {
            stale.shutdown(self.ctx.shutdown_timeout())?;
        }
        self.start_sender()
    }

    /// Stop probing and revoke every registration.
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) {
        self.closed = true;
        self.active.set(false);
        self.service.close();
        self.inventory.clear_refresh_hook();

        if let Some(mut sender) = self.sender.take() {
            match sender.shutdown(self.ctx.shutdown_timeout()) {
                Ok(ticks) => info!("Probe loop ran {ticks} ticks"),
                Err(e) => error!("{e}"),
            }
        }
        if let Some(listener) = self.listener.take() {
            match listener.close() {
                Ok(n) => info!("Listener recognised {n} probes"),
                Err(e) => error!("{e}"),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// How long [`DelayProbeProvider::close`] waits for the probe loop
    pub fn shutdown_timeout(&self) -> Duration {
        self.ctx.shutdown_timeout()
    }
}

impl Drop for DelayProbeProvider {
    fn drop(&mut self) {
        self.close();
    }
}
