//! Query surface over the delay store.
//!
//! Inputs and outputs serialize with the field names used on the RPC wire
//! (`node-connector`, `delay-list`), so a hosting RPC layer can pass them through.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::DelayStore;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GetDelayInput {
    pub node_connector: String,
}

/// `delay` is omitted when the port has never been measured
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GetDelayOutput {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delay: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DelayEntry {
    pub node_connector: String,
    pub delay: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct GetGlobalDelayOutput {
    pub delay_list: Vec<DelayEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceError {
    /// The service registration was revoked
    Closed,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Delay service is closed"),
        }
    }
}

/// Read-only delay queries. Clones share the open/closed state.
#[derive(Clone, Debug)]
pub struct DelayService {
    store: DelayStore,
    open: Arc<AtomicBool>,
}

impl DelayService {
    pub fn new(store: DelayStore) -> Self {
        Self {
            store,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    fn check_open(&self) -> Result<(), ServiceError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ServiceError::Closed)
        }
    }

    /// Latest delay measured on one port
    pub fn get_delay(&self, input: &GetDelayInput) -> Result<GetDelayOutput, ServiceError> {
        self.check_open()?;
        Ok(GetDelayOutput {
            delay: self.store.get_delay(&input.node_connector),
        })
    }

    /// Latest delay on every measured port
    pub fn get_global_delay(&self) -> Result<GetGlobalDelayOutput, ServiceError> {
        self.check_open()?;
        let delay_list = self
            .store
            .get_all_delays()
            .into_iter()
            .map(|(node_connector, delay)| DelayEntry {
                node_connector,
                delay,
            })
            .collect();
        Ok(GetGlobalDelayOutput { delay_list })
    }

    /// Revoke the service; later queries fail with [`ServiceError::Closed`]
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with(entries: &[(&str, i64)]) -> DelayService {
        let store = DelayStore::new();
        for (port, delay) in entries {
            store.set_delay(port, *delay);
        }
        DelayService::new(store)
    }

    #[test]
    fn get_delay_reports_absence() {
        let service = service_with(&[("openflow:1:1", 500)]);
        let hit = service
            .get_delay(&GetDelayInput {
                node_connector: "openflow:1:1".into(),
            })
            .unwrap();
        assert_eq!(hit.delay, Some(500));

        let miss = service
            .get_delay(&GetDelayInput {
                node_connector: "openflow:9:9".into(),
            })
            .unwrap();
        assert_eq!(miss.delay, None);
        assert_eq!(serde_json::to_string(&miss).unwrap(), "{}");
    }

    #[test]
    fn global_delay_uses_wire_field_names() {
        let service = service_with(&[("openflow:1:2", 40), ("openflow:1:1", 500)]);
        let json = serde_json::to_value(service.get_global_delay().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "delay-list": [
                    {"node-connector": "openflow:1:1", "delay": 500},
                    {"node-connector": "openflow:1:2", "delay": 40},
                ]
            })
        );

        let input: GetDelayInput =
            serde_json::from_str(r#"{"node-connector": "openflow:1:1"}"#).unwrap();
        assert_eq!(input.node_connector, "openflow:1:1");
    }

    #[test]
    fn closed_service_rejects_queries() {
        let service = service_with(&[("openflow:1:1", 500)]);
        let other = service.clone();
        service.close();
        assert!(!other.is_open());
        assert_eq!(other.get_global_delay(), Err(ServiceError::Closed));
    }
}
