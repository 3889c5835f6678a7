//! Periodic probe injection.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info, warn};

use delayprobe_shared::{ProbeKind, build_probe};

use crate::clock::Clock;
use crate::context::ActiveFlag;
use crate::topology::{InventoryTracker, PacketTransport, SwitchId, SwitchPort};

/// What one tick did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Switches probes were sent to
    pub switches: usize,
    /// Switches where at least one send failed, with the error
    pub failures: Vec<(SwitchId, String)>,
}

/// Sends a primary and an echo probe to every known switch once per tick.
pub struct ProbeSender {
    inventory: InventoryTracker,
    transport: Arc<dyn PacketTransport>,
    clock: Arc<dyn Clock>,
    active: ActiveFlag,
    interval: Duration,
}

impl ProbeSender {
    pub fn new(
        inventory: InventoryTracker,
        transport: Arc<dyn PacketTransport>,
        clock: Arc<dyn Clock>,
        active: ActiveFlag,
        interval: Duration,
    ) -> Self {
        Self {
            inventory,
            transport,
            clock,
            active,
            interval,
        }
    }

    /// Run one round of probing against the current inventory.
    pub fn tick(&self) -> TickReport {
        let inventory = self.inventory.snapshot();

        let primary = build_probe(ProbeKind::Primary, self.clock.now_ns());
        let echo = build_probe(ProbeKind::Echo, self.clock.now_ns());

        let mut report = TickReport::default();
        for (switch_id, local) in inventory.controller_switch_connectors() {
            report.switches += 1;
            match self.probe_switch(switch_id, local, &primary, &echo) {
                Ok(()) => debug!("Probed {switch_id}"),
                Err(e) => {
                    warn!("Probing {switch_id} failed: {e}");
                    report.failures.push((switch_id.clone(), e));
                }
            }
        }
        report
    }

    fn probe_switch(
        &self,
        switch_id: &str,
        local: &SwitchPort,
        primary: &[u8],
        echo: &[u8],
    ) -> Result<(), String> {
        let flooded = self.transport.flood(switch_id, primary, local);
        let echoed = self.transport.send_to(local, echo);
        match (flooded, echoed) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => Err(format!("flood: {e}")),
            (Ok(()), Err(e)) => Err(format!("echo: {e}")),
            (Err(f), Err(e)) => Err(format!("flood: {f}; echo: {e}")),
        }
    }

    /// Tick on a fixed schedule until stopped or deactivated.
    /// Returns the number of ticks run.
    fn run_loop(&self, stop_rx: &Receiver<()>) -> u64 {
        info!("Probe sender started with a {:?} tick", self.interval);
        let mut ticks = 0_u64;
        let mut next_tick = Instant::now();

        loop {
            if !self.active.get() {
                info!("Probing deactivated");
                break;
            }

            let report = self.tick();
            ticks += 1;
            if report.failures.is_empty() {
                debug!("Tick {ticks}: probed {} switches", report.switches);
            } else {
                warn!(
                    "Tick {ticks}: {} of {} switches failed",
                    report.failures.len(),
                    report.switches
                );
            }

            // Hold the schedule; if a tick overran, restart from now instead of bursting
            next_tick += self.interval;
            let now = Instant::now();
            if next_tick < now {
                next_tick = now;
            }

            match stop_rx.recv_deadline(next_tick) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("Probe sender stop requested");
                    break;
                }
            }
        }

        info!("Probe sender stopped after {ticks} ticks");
        ticks
    }

    /// Start the loop on its own thread.
    pub fn spawn(self) -> Result<ProbeSenderHandle, String> {
        let (stop_tx, stop_rx) = bounded(1);
        let join = std::thread::Builder::new()
            .name("probe-sender".to_string())
            .spawn(move || self.run_loop(&stop_rx))
            .map_err(|e| format!("Failed to spawn probe sender thread: {e}"))?;

        Ok(ProbeSenderHandle {
            stop_tx,
            join: Some(join),
        })
    }
}

/// Owns the probe loop thread
pub struct ProbeSenderHandle {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<u64>>,
}

impl ProbeSenderHandle {
    /// Ask the loop to exit at its next tick boundary
    pub fn stop(&self) {
        // Full means a stop is already pending
        let _ = self.stop_tx.try_send(());
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stop the loop and wait up to `timeout` for it to exit.
    ///
    /// On success returns the number of ticks run. On timeout the thread is
    /// left to finish its current tick on its own.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<u64, String> {
        self.stop();
        let Some(join) = self.join.take() else {
            return Ok(0);
        };

        let deadline = Instant::now() + timeout;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                error!("Probe sender did not stop within {timeout:?}");
                return Err(format!("Probe sender did not stop within {timeout:?}"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        join.join()
            .map_err(|_| "Probe sender thread panicked".to_string())
    }
}

impl Drop for ProbeSenderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use delayprobe_shared::parse_probe;

    use crate::clock::ManualClock;
    use crate::topology::{NodeRecord, TopologyReader};

    struct StaticReader(Vec<NodeRecord>);

    impl TopologyReader for StaticReader {
        fn read_nodes(&self) -> Result<Vec<NodeRecord>, String> {
            Ok(self.0.clone())
        }
    }

    #[derive(Debug, PartialEq)]
    enum Sent {
        Flood {
            switch_id: String,
            exclude: SwitchPort,
            frame: Vec<u8>,
        },
        To {
            port: SwitchPort,
            frame: Vec<u8>,
        },
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        broken: Option<String>,
    }

    impl PacketTransport for RecordingTransport {
        fn flood(&self, switch_id: &str, frame: &[u8], exclude: &SwitchPort) -> Result<(), String> {
            if self.broken.as_deref() == Some(switch_id) {
                return Err("connection reset".to_string());
            }
            self.sent.lock().unwrap().push(Sent::Flood {
                switch_id: switch_id.to_owned(),
                exclude: exclude.clone(),
                frame: frame.to_vec(),
            });
            Ok(())
        }

        fn send_to(&self, port: &SwitchPort, frame: &[u8]) -> Result<(), String> {
            self.sent.lock().unwrap().push(Sent::To {
                port: port.clone(),
                frame: frame.to_vec(),
            });
            Ok(())
        }
    }

    fn two_switches() -> InventoryTracker {
        let reader = StaticReader(vec![
            NodeRecord::new("openflow:1", &["1", "2", "LOCAL"]),
            NodeRecord::new("openflow:2", &["1", "LOCAL"]),
        ]);
        let tracker = InventoryTracker::new(Arc::new(reader), Duration::from_millis(5));
        tracker.refresh(true).unwrap();
        tracker
    }

    fn sender_with(
        transport: Arc<RecordingTransport>,
        active: ActiveFlag,
        interval: Duration,
    ) -> ProbeSender {
        ProbeSender::new(
            two_switches(),
            transport,
            Arc::new(ManualClock::new(1000)),
            active,
            interval,
        )
    }

    #[test]
    fn tick_floods_primary_and_echoes_to_local_port() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender_with(transport.clone(), ActiveFlag::new(true), Duration::from_secs(1));

        let report = sender.tick();
        assert_eq!(report.switches, 2);
        assert!(report.failures.is_empty());

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        let Sent::Flood {
            switch_id,
            exclude,
            frame,
        } = &sent[0]
        else {
            panic!("expected a flood first, got {:?}", sent[0]);
        };
        assert_eq!(switch_id, "openflow:1");
        assert!(exclude.is_local());
        assert_eq!(parse_probe(frame), Some((ProbeKind::Primary, 1000)));

        let Sent::To { port, frame } = &sent[1] else {
            panic!("expected an echo second, got {:?}", sent[1]);
        };
        assert_eq!(port.id(), "openflow:1:LOCAL");
        assert_eq!(parse_probe(frame), Some((ProbeKind::Echo, 1000)));
    }

    #[test]
    fn one_failing_switch_does_not_abort_the_tick() {
        let transport = Arc::new(RecordingTransport {
            broken: Some("openflow:1".into()),
            ..Default::default()
        });
        let sender = sender_with(transport.clone(), ActiveFlag::new(true), Duration::from_secs(1));

        let report = sender.tick();
        assert_eq!(report.switches, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "openflow:1");

        // openflow:1 still got its echo; openflow:2 got both probes
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn inactive_loop_exits_without_probing() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender_with(transport.clone(), ActiveFlag::new(false), Duration::from_millis(10));
        let mut handle = sender.spawn().unwrap();

        assert_eq!(handle.shutdown(Duration::from_secs(2)).unwrap(), 0);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_wakes_a_sleeping_loop() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender_with(transport.clone(), ActiveFlag::new(true), Duration::from_secs(3600));
        let mut handle = sender.spawn().unwrap();

        // First tick runs immediately, then the loop sleeps for an hour
        let start = Instant::now();
        while transport.sent.lock().unwrap().len() < 4 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.is_running());

        assert_eq!(handle.shutdown(Duration::from_secs(2)).unwrap(), 1);
        assert!(!handle.is_running());
    }

    #[test]
    fn deactivating_stops_the_loop_at_a_tick_boundary() {
        let transport = Arc::new(RecordingTransport::default());
        let active = ActiveFlag::new(true);
        let sender = sender_with(transport.clone(), active.clone(), Duration::from_millis(5));
        let mut handle = sender.spawn().unwrap();

        std::thread::sleep(Duration::from_millis(30));
        active.set(false);

        let start = Instant::now();
        while handle.is_running() && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!handle.is_running());
        let ticks = handle.shutdown(Duration::from_secs(1)).unwrap();
        assert!(ticks >= 1);
        assert_eq!(transport.sent.lock().unwrap().len() as u64, ticks * 4);
    }
}
