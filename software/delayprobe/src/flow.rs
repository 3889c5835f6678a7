//! Capture flows that send probe traffic from each switch back to the controller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use delayprobe_shared::ETHERTYPE_IPV4;

use crate::topology::{FlowProgrammer, SwitchId};

/// Prefix of every capture flow id; the suffix is a per-installer counter
pub const FLOW_ID_PREFIX: &str = "delayprobe-";

/// First cookie handed out; later flows count up from here
pub const INITIAL_COOKIE: u64 = 0x2b00_0000_0000_0000;

/// Buffer id meaning "send the whole packet, do not buffer on the switch"
pub const NO_BUFFER: u32 = 0xffff_ffff;

/// Output max length meaning "send the whole packet to the controller"
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// Placement and lifetime of capture flows
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FlowSettings {
    pub table_id: u8,
    pub priority: u16,
    /// Seconds of inactivity before removal; 0 means never
    pub idle_timeout: u16,
    /// Seconds before unconditional removal; 0 means never
    pub hard_timeout: u16,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            table_id: 0,
            priority: 10,
            idle_timeout: 0,
            hard_timeout: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowAction {
    OutputToController { max_length: u16 },
}

/// One flow rule: match IPv4, output to controller
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CaptureFlow {
    pub flow_id: String,
    pub flow_name: String,
    pub table_id: u8,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub buffer_id: u32,
    /// EtherType match
    pub ether_type: u16,
    pub action: FlowAction,
}

/// Outcome of a successful install request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowInstall {
    /// The flow was submitted and acknowledged
    Installed(CaptureFlow),
    /// The switch already has a capture flow from this installer
    AlreadyPresent,
}

impl fmt::Display for FlowInstall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed(flow) => write!(f, "installed {}", flow.flow_id),
            Self::AlreadyPresent => write!(f, "already present"),
        }
    }
}

/// Per-switch installer record
#[derive(Clone, Debug, PartialEq, Eq)]
enum FlowSlot {
    /// A submission is in flight; holds the cookie of the flow being submitted
    Pending(u64),
    Installed(CaptureFlow),
}

/// Installs one capture flow per switch.
///
/// Ids and cookies are never reused, even across a failed submission.
/// The state lock is never held while the flow backend is called.
pub struct FlowInstaller {
    programmer: Arc<dyn FlowProgrammer>,
    settings: FlowSettings,
    flow_id_inc: AtomicU64,
    cookie_inc: AtomicU64,
    slots: Mutex<BTreeMap<SwitchId, FlowSlot>>,
}

impl FlowInstaller {
    pub fn new(programmer: Arc<dyn FlowProgrammer>, settings: FlowSettings) -> Self {
        Self {
            programmer,
            settings,
            flow_id_inc: AtomicU64::new(0),
            cookie_inc: AtomicU64::new(INITIAL_COOKIE),
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    fn slots(&self) -> Result<MutexGuard<'_, BTreeMap<SwitchId, FlowSlot>>, String> {
        self.slots
            .lock()
            .map_err(|_| "Flow installer state lock poisoned".to_string())
    }

    fn next_flow(&self) -> CaptureFlow {
        let n = self.flow_id_inc.fetch_add(1, Ordering::SeqCst);
        let cookie = self.cookie_inc.fetch_add(1, Ordering::SeqCst);
        CaptureFlow {
            flow_id: format!("{FLOW_ID_PREFIX}{n}"),
            flow_name: "delayprobe-capture".to_string(),
            table_id: self.settings.table_id,
            priority: self.settings.priority,
            idle_timeout: self.settings.idle_timeout,
            hard_timeout: self.settings.hard_timeout,
            cookie,
            buffer_id: NO_BUFFER,
            ether_type: ETHERTYPE_IPV4,
            action: FlowAction::OutputToController {
                max_length: OFPCML_NO_BUFFER,
            },
        }
    }

    /// Install the capture flow on one switch unless it already has one
    /// or another caller is installing it right now.
    ///
    /// Returns once the flow backend acknowledges the submission.
    /// If the switch is forgotten while its submission is in flight,
    /// the result is not recorded.
    pub fn add_initial_flow(&self, switch_id: &str) -> Result<FlowInstall, String> {
        let flow = {
            let mut slots = self.slots()?;
            if slots.contains_key(switch_id) {
                return Ok(FlowInstall::AlreadyPresent);
            }
            let flow = self.next_flow();
            slots.insert(switch_id.to_owned(), FlowSlot::Pending(flow.cookie));
            flow
        };

        let submitted = self.programmer.add_flow(switch_id, &flow);

        let mut slots = self.slots()?;
        let reserved = slots.get(switch_id) == Some(&FlowSlot::Pending(flow.cookie));
        if let Err(e) = submitted {
            if reserved {
                slots.remove(switch_id);
            }
            return Err(format!("Failed to install {} on {switch_id}: {e}", flow.flow_id));
        }

        info!(
            "Installed capture flow {} (cookie {:#x}) on {switch_id}",
            flow.flow_id, flow.cookie
        );
        if reserved {
            slots.insert(switch_id.to_owned(), FlowSlot::Installed(flow.clone()));
        } else {
            debug!("{switch_id} was forgotten while {} was in flight", flow.flow_id);
        }
        Ok(FlowInstall::Installed(flow))
    }

    /// Install on each switch in turn. A failure on one switch is logged
    /// and does not stop the others.
    ///
    /// Returns the switches that failed.
    pub fn add_initial_flows<'a, I>(&self, switches: I) -> Vec<(SwitchId, String)>
    where
        I: IntoIterator<Item = &'a SwitchId>,
    {
        let mut failures = Vec::new();
        for switch_id in switches {
            if let Err(e) = self.add_initial_flow(switch_id) {
                warn!("{e}");
                failures.push((switch_id.clone(), e));
            }
        }
        failures
    }

    /// The flow installed on a switch, if any
    pub fn installed_flow(&self, switch_id: &str) -> Option<CaptureFlow> {
        match self.slots().ok()?.get(switch_id)? {
            FlowSlot::Installed(flow) => Some(flow.clone()),
            FlowSlot::Pending(_) => None,
        }
    }

    /// Forget a switch so that it gets a fresh flow when it reconnects.
    /// Also drops the reservation of a submission still in flight.
    pub fn forget_switch(&self, switch_id: &str) -> Option<CaptureFlow> {
        match self.slots().ok()?.remove(switch_id)? {
            FlowSlot::Installed(flow) => {
                info!("Forgot capture flow {} on {switch_id}", flow.flow_id);
                Some(flow)
            }
            FlowSlot::Pending(_) => None,
        }
    }
}
