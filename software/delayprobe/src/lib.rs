//! Active one-way delay measurement between a network controller and its switches.
//!
//! The controller floods timestamped probes out of every switch port, installs a
//! capture flow on each switch so probes come straight back, and records
//! `receive time - send time` per ingress port.
//!
//! ```text
//!  topology ──> InventoryTracker ──> FlowInstaller ──> switches
//!                     │                                   │
//!                     └──> ProbeSender ──── probes ──────>│
//!                                                         │ packet-in
//!   DelayService <── DelayStore <── ProbeListener <───────┘
//! ```

pub mod clock;
pub mod context;
pub mod delay;
pub mod flow;
pub mod logging;
pub mod probe;
pub mod provider;
pub mod topology;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::{ActiveFlag, ProbeCtx};
pub use delay::{DelayService, DelayStore};
pub use flow::{CaptureFlow, FlowInstaller, FlowSettings};
pub use probe::{PacketChain, ProbeListener, ProbeSender};
pub use provider::DelayProbeProvider;
pub use topology::{InventoryTracker, LoopbackFabric, SwitchPort};

pub use delayprobe_shared;
