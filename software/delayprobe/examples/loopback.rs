//! Measure delays across an in-process switch fabric.
//!
//! Demonstrated here:
//!   * Loading a probe configuration from JSON
//!   * Wiring the provider to the topology store, flow backend and packet transport
//!   * Feeding topology changes while probing runs
//!   * Querying the delay service and printing its JSON output

use std::sync::Arc;
use std::time::Duration;

use delayprobe::topology::TopologyEvent;
use delayprobe::*;

fn main() {
    let mut ctx = ProbeCtx::from_json_str(
        r#"{
            "op_name": "loopback_example",
            "query_delay": 2,
            "file_logging": true
        }"#,
    )
    .unwrap();
    ctx.op_dir = "./software/delayprobe/examples".into();

    // A small fabric: two switches, three data ports
    let fabric = LoopbackFabric::new();
    fabric.add_switch("openflow:1", &["1", "2"]).unwrap();
    fabric.add_switch("openflow:2", &["1"]).unwrap();

    let shared = Arc::new(fabric.clone());
    let mut provider = DelayProbeProvider::new(
        ctx,
        shared.clone(),
        shared.clone(),
        shared,
        Arc::new(MonotonicClock::new()),
    )
    .unwrap();
    provider.init().unwrap();
    fabric
        .connect_packet_in(provider.packet_in_sender().unwrap())
        .unwrap();

    std::thread::sleep(Duration::from_secs(1));

    // A third switch joins mid-run
    fabric.add_switch("openflow:3", &["1", "2"]).unwrap();
    provider.on_topology_changed(&TopologyEvent::NodeUpdated("openflow:3".into()));

    std::thread::sleep(Duration::from_secs(1));

    let service = provider.service();
    let delays = service.get_global_delay().unwrap();
    println!("{}", serde_json::to_string_pretty(&delays).unwrap());

    provider.close();
}
