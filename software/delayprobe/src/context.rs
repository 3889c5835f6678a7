//! Configuration for a probing run
//! and the runtime switch that gates the probe loop.

use std::default::Default;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::flow::FlowSettings;

/// Length of one `query_delay` unit
pub const QUERY_DELAY_UNIT: Duration = Duration::from_millis(100);

/// Probe configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct ProbeCtx {
    /// Master switch for the probe loop
    pub is_active: bool,

    /// Tick period of the probe loop in units of 100ms
    pub query_delay: u32,

    /// Debounce window for topology change notifications, in milliseconds
    pub refresh_delay_ms: u64,

    /// How long to wait for the probe loop to exit on shutdown, in milliseconds
    pub shutdown_timeout_ms: u64,

    /// Capture flow parameters
    pub flow: FlowSettings,

    /// Also write logs to `{op_dir}/logs/{op_name}.log`
    pub file_logging: bool,

    /// A name for this run, used as the log file name
    pub op_name: String,

    /// A directory to place outputs
    pub op_dir: PathBuf,
}

impl Default for ProbeCtx {
    fn default() -> Self {
        // Use current time with seconds as op name and use working directory as op dir,
        // replacing characters in the name that would be invalid on Windows.
        let op_name = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            is_active: true,
            query_delay: 10,
            refresh_delay_ms: 20,
            shutdown_timeout_ms: 2_000,
            flow: FlowSettings::default(),
            file_logging: false,
            op_name,
            op_dir: std::fs::canonicalize("./").unwrap_or_default(),
        }
    }
}

impl ProbeCtx {
    /// Period of the probe loop
    pub fn tick_interval(&self) -> Duration {
        QUERY_DELAY_UNIT * self.query_delay
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reject settings that would spin the probe loop.
    pub fn validate(&self) -> Result<(), String> {
        if self.query_delay == 0 {
            return Err("query_delay must be at least 1 (100ms)".to_string());
        }
        if self.op_name.is_empty() {
            return Err("op_name must not be empty".to_string());
        }
        Ok(())
    }

    /// Parse a JSON configuration. Missing fields take their default values.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let ctx: Self =
            serde_json::from_str(json).map_err(|e| format!("Invalid probe configuration: {e}"))?;
        ctx.validate()?;
        Ok(ctx)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read probe configuration {path:?}: {e}"))?;
        Self::from_json_str(&json)
    }
}

/// Shared on/off switch for the probe loop,
/// read fresh at the top of every tick.
#[derive(Clone, Debug)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_is_query_delay_times_100ms() {
        let mut ctx = ProbeCtx::default();
        assert_eq!(ctx.tick_interval(), Duration::from_secs(1));
        ctx.query_delay = 3;
        assert_eq!(ctx.tick_interval(), Duration::from_millis(300));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let ctx = ProbeCtx::from_json_str(r#"{"is_active": false, "query_delay": 5}"#).unwrap();
        assert!(!ctx.is_active);
        assert_eq!(ctx.query_delay, 5);
        assert_eq!(ctx.refresh_delay_ms, 20);
        assert_eq!(ctx.flow, FlowSettings::default());
    }

    #[test]
    fn zero_query_delay_is_rejected() {
        let result = ProbeCtx::from_json_str(r#"{"query_delay": 0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        let mut ctx = ProbeCtx::default();
        ctx.op_name = "from_file".into();
        ctx.flow.priority = 20;
        std::fs::write(&path, serde_json::to_string_pretty(&ctx).unwrap()).unwrap();

        let loaded = ProbeCtx::from_json_file(&path).unwrap();
        assert_eq!(loaded, ctx);

        assert!(ProbeCtx::from_json_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn active_flag_is_shared_between_clones() {
        let flag = ActiveFlag::new(true);
        let other = flag.clone();
        other.set(false);
        assert!(!flag.get());
    }
}
