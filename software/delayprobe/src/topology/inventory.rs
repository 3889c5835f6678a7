//! Switch/port inventory derived from the topology store.
//!
//! Topology change notifications arrive in bursts while links flap.
//! The tracker folds every burst into a single deferred re-read:
//!
//! ```text
//! events   x  x x x x          x   x
//!          |---delay---|R      |---delay---|R
//! ```
//!
//! A refresh rebuilds the whole view and publishes it with one pointer swap,
//! so readers see either the old snapshot or the new one, never a mix.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{NodeRecord, SwitchId, SwitchPort, TopologyReader};

/// Change notification from the topology store.
/// Any event triggers the same full re-read; the payload is for logging
/// and for callers that track per-switch state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologyEvent {
    NodeUpdated(SwitchId),
    NodeRemoved(SwitchId),
    ConnectorUpdated(SwitchPort),
    ConnectorRemoved(SwitchPort),
}

/// Result of a refresh request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was published
    Refreshed,
    /// Another refresh is already scheduled or running
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InventoryError {
    /// The topology store could not be read; the previous snapshot stays in place
    Read(String),
    /// A panic during an earlier refresh left the tracker's lock poisoned
    Poisoned,
}

impl fmt::Display for InventoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(e) => write!(f, "Failed to read nodes from topology store: {e}"),
            Self::Poisoned => write!(f, "Inventory refresh lock poisoned"),
        }
    }
}

/// Immutable view of the switches and their ports at one instant
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    /// Key: switch, value: the switch's port towards the controller
    controller_switch_connectors: BTreeMap<SwitchId, SwitchPort>,
    /// Key: switch, value: every other port on the switch
    switch_node_connectors: BTreeMap<SwitchId, Vec<SwitchPort>>,
}

impl InventorySnapshot {
    pub fn from_nodes(nodes: &[NodeRecord]) -> Self {
        let mut snapshot = Self::default();
        for node in nodes {
            let ports = node
                .ports
                .iter()
                .map(|p| SwitchPort::new(&node.switch_id, p))
                .filter(|p| !p.is_local())
                .collect();
            snapshot
                .switch_node_connectors
                .insert(node.switch_id.clone(), ports);
            snapshot
                .controller_switch_connectors
                .insert(node.switch_id.clone(), SwitchPort::local(&node.switch_id));
        }
        snapshot
    }

    pub fn controller_switch_connectors(&self) -> &BTreeMap<SwitchId, SwitchPort> {
        &self.controller_switch_connectors
    }

    pub fn switch_node_connectors(&self) -> &BTreeMap<SwitchId, Vec<SwitchPort>> {
        &self.switch_node_connectors
    }

    pub fn switches(&self) -> impl Iterator<Item = &SwitchId> {
        self.controller_switch_connectors.keys()
    }

    /// Ports a probe may be flooded out of; never includes the local port
    pub fn flood_targets(&self, switch_id: &str) -> &[SwitchPort] {
        self.switch_node_connectors
            .get(switch_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.controller_switch_connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controller_switch_connectors.is_empty()
    }
}

/// Callback run with every newly published snapshot
pub type RefreshHook = Box<dyn Fn(&InventorySnapshot) + Send + Sync>;

struct TrackerInner {
    reader: Arc<dyn TopologyReader>,
    refresh_delay: Duration,
    snapshot: RwLock<Arc<InventorySnapshot>>,
    /// A deferred refresh is waiting out its delay
    scheduled: AtomicBool,
    /// Held for the duration of a read-and-swap
    refresh_lock: Mutex<()>,
    refresh_count: AtomicU64,
    hook: RwLock<Option<RefreshHook>>,
}

/// Keeps a fresh switch/port view under bursty topology notifications.
/// Clones share the same state.
#[derive(Clone)]
pub struct InventoryTracker {
    inner: Arc<TrackerInner>,
}

impl InventoryTracker {
    pub fn new(reader: Arc<dyn TopologyReader>, refresh_delay: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                reader,
                refresh_delay,
                snapshot: RwLock::new(Arc::new(InventorySnapshot::default())),
                scheduled: AtomicBool::new(false),
                refresh_lock: Mutex::new(()),
                refresh_count: AtomicU64::new(0),
                hook: RwLock::new(None),
            }),
        }
    }

    /// Register a callback to run after each successful refresh.
    ///
    /// The hook runs on the refreshing thread while the refresh lock is held,
    /// so it must not call [`InventoryTracker::refresh`] itself.
    pub fn set_refresh_hook<F>(&self, hook: F)
    where
        F: Fn(&InventorySnapshot) + Send + Sync + 'static,
    {
        if let Ok(mut w) = self.inner.hook.write() {
            *w = Some(Box::new(hook));
        }
    }

    pub fn clear_refresh_hook(&self) {
        if let Ok(mut w) = self.inner.hook.write() {
            *w = None;
        }
    }

    /// Re-read the topology store and publish a new snapshot.
    ///
    /// Unless `force` is set, this is a no-op while another refresh is
    /// scheduled or in flight.
    pub fn refresh(&self, force: bool) -> Result<RefreshOutcome, InventoryError> {
        if force {
            return self.inner.locked_refresh();
        }

        if self.inner.scheduled.load(Ordering::Acquire) {
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = match self.inner.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(RefreshOutcome::Skipped),
            Err(TryLockError::Poisoned(_)) => return Err(InventoryError::Poisoned),
        };
        self.inner.read_and_swap()
    }

    /// Handle a topology change notification.
    ///
    /// Schedules a refresh after the debounce delay unless one is already
    /// scheduled, in which case the event is folded into it.
    /// Returns whether a new refresh was scheduled.
    pub fn on_topology_changed(&self, event: &TopologyEvent) -> bool {
        if self
            .inner
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Topology change {event:?} folded into pending refresh");
            return false;
        }

        debug!("Topology change {event:?}; refreshing inventory in {:?}", self.inner.refresh_delay);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("inventory-refresh".to_string())
            .spawn(move || {
                thread::sleep(inner.refresh_delay);
                // Clear before reading so changes that land mid-read schedule another pass
                inner.scheduled.store(false, Ordering::Release);
                if let Err(e) = inner.locked_refresh() {
                    warn!("Scheduled inventory refresh failed: {e}");
                }
            });

        if let Err(e) = spawned {
            self.inner.scheduled.store(false, Ordering::Release);
            error!("Failed to spawn inventory refresh thread: {e}");
            return false;
        }
        true
    }

    /// Whether a deferred refresh is waiting to run
    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.scheduled.load(Ordering::Acquire)
    }

    /// Number of snapshots published so far
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::Acquire)
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<InventorySnapshot> {
        match self.inner.snapshot.read() {
            Ok(r) => Arc::clone(&*r),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Key: switch, value: the switch's port towards the controller
    pub fn controller_switch_connectors(&self) -> BTreeMap<SwitchId, SwitchPort> {
        self.snapshot().controller_switch_connectors().clone()
    }

    /// Key: switch, value: the switch's floodable ports
    pub fn switch_node_connectors(&self) -> BTreeMap<SwitchId, Vec<SwitchPort>> {
        self.snapshot().switch_node_connectors().clone()
    }
}

impl TrackerInner {
    fn locked_refresh(&self) -> Result<RefreshOutcome, InventoryError> {
        let _guard = self
            .refresh_lock
            .lock()
            .map_err(|_| InventoryError::Poisoned)?;
        self.read_and_swap()
    }

    /// Caller must hold `refresh_lock`.
    fn read_and_swap(&self) -> Result<RefreshOutcome, InventoryError> {
        let nodes = self.reader.read_nodes().map_err(InventoryError::Read)?;
        let snapshot = Arc::new(InventorySnapshot::from_nodes(&nodes));

        {
            let mut w = self
                .snapshot
                .write()
                .map_err(|_| InventoryError::Poisoned)?;
            *w = Arc::clone(&snapshot);
        }
        let count = self.refresh_count.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Inventory refreshed (#{count}): {} switches, {} floodable ports",
            snapshot.len(),
            snapshot
                .switch_node_connectors()
                .values()
                .map(Vec::len)
                .sum::<usize>()
        );

        if let Ok(hook) = self.hook.read() {
            if let Some(hook) = hook.as_ref() {
                hook(&snapshot);
            }
        }

        Ok(RefreshOutcome::Refreshed)
    }
}
