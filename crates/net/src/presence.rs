//! Terminal discovery
//!
//! Periodically announces this server on `server/broadcast` and collects the
//! terminals that answer before the next round. The presence picture is
//! ephemeral, rebuilt every interval, and independent of the attendance path.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{publish_logged, Bus};
use crate::payload::{BroadcastPayload, SERVER_BROADCAST};

/// Default seconds between presence broadcasts
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(60);

/// Poll tick of the broadcast loop; only affects stop latency, the broadcast
/// cadence is governed by the interval
const POLL_TICK: Duration = Duration::from_millis(250);

/// What the tracker currently knows about reachable terminals
#[derive(Debug, Clone, Default)]
pub struct PresenceSnapshot {
    /// Terminals that answered the current round, deduplicated
    pub seen: BTreeSet<String>,
    /// Wall-clock time of the most recent broadcast
    pub last_broadcast_at: Option<DateTime<Utc>>,
}

struct Shared {
    server_id: String,
    snapshot: Mutex<PresenceSnapshot>,
}

/// Cloneable view handed to the router for recording responses and to the
/// operator surface for queries
#[derive(Clone)]
pub struct PresenceHandle {
    shared: Arc<Shared>,
}

impl PresenceHandle {
    /// Record a discovery response. Responses declaring another server's
    /// identity are ignored.
    pub fn record_response(&self, terminal_id: &str, server_id: &str) {
        if server_id != self.shared.server_id {
            debug!(terminal_id, server_id, "discovery response for another server");
            return;
        }

        let mut snapshot = self.shared.snapshot.lock().unwrap();
        if snapshot.seen.insert(terminal_id.to_string()) {
            info!(terminal_id, "terminal answered presence broadcast");
        }
    }

    /// Terminals that answered the current round so far
    pub fn seen_terminals(&self) -> Vec<String> {
        let snapshot = self.shared.snapshot.lock().unwrap();
        snapshot.seen.iter().cloned().collect()
    }

    /// Wall-clock time of the most recent broadcast, if any was sent yet
    pub fn last_broadcast_at(&self) -> Option<DateTime<Utc>> {
        self.shared.snapshot.lock().unwrap().last_broadcast_at
    }
}

/// Periodic announce-and-collect loop
pub struct PresenceTracker {
    shared: Arc<Shared>,
    interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    pub fn new(server_id: impl Into<String>, interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                server_id: server_id.into(),
                snapshot: Mutex::new(PresenceSnapshot::default()),
            }),
            interval,
            shutdown_tx,
            task: None,
        }
    }

    /// View for feeding responses and querying state
    pub fn handle(&self) -> PresenceHandle {
        PresenceHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the broadcast loop. The first broadcast goes out immediately.
    /// Starting an already-running tracker is a no-op.
    pub fn start(&mut self, bus: Arc<dyn Bus>) {
        if self.task.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let interval = self.interval;
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.task = Some(tokio::spawn(broadcast_loop(shared, bus, interval, shutdown_rx)));
        info!(interval_secs = self.interval.as_secs(), "presence tracker started");
    }

    /// Signal the loop and wait until it has fully exited; no broadcast is
    /// published after this returns. Safe to call more than once.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(());
        let _ = task.await;
        info!("presence tracker stopped");
    }
}

async fn broadcast_loop(
    shared: Arc<Shared>,
    bus: Arc<dyn Bus>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // None forces an immediate first round
    let mut last_broadcast: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_TICK) => {
                if last_broadcast.is_some_and(|at| at.elapsed() <= interval) {
                    continue;
                }

                let previous_round = {
                    let mut snapshot = shared.snapshot.lock().unwrap();
                    snapshot.last_broadcast_at = Some(Utc::now());
                    std::mem::take(&mut snapshot.seen)
                };
                info!(responders = previous_round.len(), "presence round closed, broadcasting");

                let call = BroadcastPayload::Call {
                    server_id: shared.server_id.clone(),
                };
                publish_logged(bus.as_ref(), SERVER_BROADCAST, &call.encode());
                last_broadcast = Some(Instant::now());
            }
            _ = shutdown_rx.recv() => {
                debug!("broadcast loop shutting down");
                break;
            }
        }
    }
}
