//! Runs the probe listener on its own thread, fed through a channel.

use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{info, warn};

use super::listener::ProbeListener;
use super::packet::PacketChain;

/// Message to the listener thread
#[derive(Debug)]
pub enum PacketInEvent {
    Packet(PacketChain),
    /// Drain nothing further and exit
    Close,
}

/// Registration handed to the packet-in notifier.
/// Cheap to clone; usable from any thread.
#[derive(Clone, Debug)]
pub struct PacketInSender {
    tx: Sender<PacketInEvent>,
}

impl PacketInSender {
    /// Queue a packet-in for classification.
    /// Fails once the listener has been closed.
    pub fn notify(&self, chain: PacketChain) -> Result<(), String> {
        self.tx
            .send(PacketInEvent::Packet(chain))
            .map_err(|_| "Probe listener is closed".to_string())
    }
}

/// Owns the listener thread
pub struct ListenerWorkerHandle {
    tx: Sender<PacketInEvent>,
    join: Option<JoinHandle<u64>>,
}

impl ListenerWorkerHandle {
    pub fn spawn(listener: ProbeListener) -> Result<Self, String> {
        let (tx, rx) = unbounded();
        let join = std::thread::Builder::new()
            .name("probe-listener".to_string())
            .spawn(move || run_listener(listener, rx))
            .map_err(|e| format!("Failed to spawn probe listener thread: {e}"))?;

        Ok(Self {
            tx,
            join: Some(join),
        })
    }

    pub fn sender(&self) -> PacketInSender {
        PacketInSender {
            tx: self.tx.clone(),
        }
    }

    /// Stop the listener and wait for it to exit,
    /// returning the number of probes it recognised.
    ///
    /// Packets queued before the close are still processed.
    pub fn close(mut self) -> Result<u64, String> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<u64, String> {
        let Some(join) = self.join.take() else {
            return Ok(0);
        };
        // The thread may already be gone if every sender was dropped
        let _ = self.tx.send(PacketInEvent::Close);
        join.join()
            .map_err(|_| "Probe listener thread panicked".to_string())
    }
}

impl Drop for ListenerWorkerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!("{e}");
        }
    }
}

fn run_listener(listener: ProbeListener, rx: Receiver<PacketInEvent>) -> u64 {
    info!("Probe listener started");
    let mut recognised = 0_u64;
    while let Ok(event) = rx.recv() {
        match event {
            PacketInEvent::Packet(chain) => {
                if listener.on_packet_received(&chain).is_some() {
                    recognised += 1;
                }
            }
            PacketInEvent::Close => break,
        }
    }
    info!("Probe listener stopped after {recognised} probes");
    recognised
}
