//! Latest measured delay per switch port.

pub mod service;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub use service::{
    DelayEntry, DelayService, GetDelayInput, GetDelayOutput, GetGlobalDelayOutput, ServiceError,
};

/// Map of node connector id to delay in nanoseconds.
///
/// Clones share the same map. Writes replace the previous value;
/// a port that was never measured has no entry.
#[derive(Clone, Debug, Default)]
pub struct DelayStore {
    inner: Arc<RwLock<BTreeMap<String, i64>>>,
}

impl DelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, port_id: &str, delay_ns: i64) {
        if let Ok(mut w) = self.inner.write() {
            w.insert(port_id.to_owned(), delay_ns);
        }
    }

    pub fn get_delay(&self, port_id: &str) -> Option<i64> {
        self.inner.read().ok()?.get(port_id).copied()
    }

    /// Every measured port and its delay, ordered by port id
    pub fn get_all_delays(&self) -> Vec<(String, i64)> {
        match self.inner.read() {
            Ok(r) => r.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
