//! Server-side message dispatch
//!
//! The router is the only component that talks to the bus. It subscribes to
//! the four inbound channels, dispatches every message by topic, and exposes
//! the operator surface for admission control. One malformed message never
//! takes the dispatch loop down: every outcome is logged and the loop moves
//! on to the next message.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tally_core::{AdmissionList, AttendanceStore, Error as StoreError};

use crate::bus::{Bus, BusMessage};
use crate::error::{Error, Result};
use crate::payload::{
    BroadcastPayload, DebugPayload, PingPayload, PingStatus, RecordPayload, RFID_RECORD,
    SERVER_BROADCAST, SERVER_PING, SERVER_SUBSCRIPTIONS, TERMINAL_DEBUG, TERMINAL_PING,
};
use crate::presence::PresenceHandle;

/// Outcome of dispatching one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Processed, state possibly updated
    Handled,
    /// Well-formed but not addressed to this server
    Ignored,
    /// Rejected by admission control
    Dropped,
    /// Malformed payload or store failure; logged, never propagated
    Failed,
}

struct Shared {
    server_id: String,
    bus: Arc<dyn Bus>,
    store: Arc<Mutex<AttendanceStore>>,
    admissions: Arc<RwLock<AdmissionList>>,
    presence: PresenceHandle,
}

/// Server-side protocol router
pub struct Router {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl Router {
    pub fn new(
        server_id: impl Into<String>,
        bus: Arc<dyn Bus>,
        store: Arc<Mutex<AttendanceStore>>,
        admissions: Arc<RwLock<AdmissionList>>,
        presence: PresenceHandle,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                server_id: server_id.into(),
                bus,
                store,
                admissions,
                presence,
            }),
            shutdown_tx,
            task: None,
        }
    }

    /// Subscribe to the inbound channels and start dispatching. Every
    /// terminal already admitted is pinged once.
    pub async fn connect(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let feed = self.shared.bus.subscribe(SERVER_SUBSCRIPTIONS)?;

        let admitted: Vec<String> = self.shared.admissions.read().await.terminals().to_vec();
        for terminal_id in &admitted {
            self.ping_terminal(terminal_id)?;
        }

        let shared = self.shared.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.task = Some(tokio::spawn(dispatch_loop(shared, feed, shutdown_rx)));

        info!(server_id = %self.shared.server_id, "router connected");
        Ok(())
    }

    /// Stop dispatching and wait until the loop has fully exited.
    /// Safe to call more than once.
    pub async fn disconnect(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(());
        let _ = task.await;
        info!(server_id = %self.shared.server_id, "router disconnected");
    }

    /// Send a ping CALL addressed to `terminal_id`
    pub fn ping_terminal(&self, terminal_id: &str) -> Result<()> {
        let call = PingPayload::new(terminal_id, &self.shared.server_id, PingStatus::Call);
        self.shared.bus.publish(SERVER_PING, &call.encode())?;
        info!(terminal_id, "ping published");
        Ok(())
    }

    /// Admit a terminal and ping it. Returns false when already admitted.
    pub async fn add_terminal(&self, terminal_id: &str) -> Result<bool> {
        let added = self.shared.admissions.write().await.add(terminal_id)?;
        if added {
            self.ping_terminal(terminal_id)?;
        }
        Ok(added)
    }

    /// Revoke a terminal's admission. Returns false when it was not admitted.
    pub async fn remove_terminal(&self, terminal_id: &str) -> Result<bool> {
        Ok(self.shared.admissions.write().await.remove(terminal_id)?)
    }

    /// Terminals that answered the current discovery round
    pub fn available_terminals(&self) -> Vec<String> {
        self.shared.presence.seen_terminals()
    }

    /// Wall-clock time of the most recent presence broadcast
    pub fn last_broadcast_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.shared.presence.last_broadcast_at()
    }

    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut feed: mpsc::Receiver<BusMessage>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = feed.recv() => {
                match message {
                    Some(message) => {
                        let outcome = dispatch(&shared, &message).await;
                        debug!(channel = %message.channel, ?outcome, "message dispatched");
                    }
                    None => {
                        info!("bus feed closed, dispatch loop exiting");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("dispatch loop shutting down");
                break;
            }
        }
    }
}

/// Dispatch one inbound message by topic
async fn dispatch(shared: &Shared, message: &BusMessage) -> Dispatch {
    match message.channel.as_str() {
        TERMINAL_DEBUG => handle_debug(&message.payload),
        TERMINAL_PING => handle_ping(shared, &message.payload),
        RFID_RECORD => handle_record(shared, &message.payload).await,
        SERVER_BROADCAST => handle_broadcast(shared, &message.payload),
        other => {
            debug!(channel = other, "message on unexpected channel");
            Dispatch::Ignored
        }
    }
}

fn handle_debug(payload: &str) -> Dispatch {
    match DebugPayload::parse(payload) {
        Ok(debug_message) => {
            info!(terminal_id = %debug_message.terminal_id, "{}", debug_message.message);
            Dispatch::Handled
        }
        Err(error) => {
            warn!(%error, "malformed debug payload");
            Dispatch::Failed
        }
    }
}

fn handle_ping(shared: &Shared, payload: &str) -> Dispatch {
    let ping = match PingPayload::parse(payload, TERMINAL_PING) {
        Ok(ping) => ping,
        Err(error) => {
            warn!(%error, "malformed ping payload");
            return Dispatch::Failed;
        }
    };

    if ping.server_id != shared.server_id {
        return Dispatch::Ignored;
    }

    match ping.status {
        PingStatus::Call => {
            let response =
                PingPayload::new(&ping.terminal_id, &shared.server_id, PingStatus::Response);
            if let Err(error) = shared.bus.publish(SERVER_PING, &response.encode()) {
                warn!(%error, "ping response publish failed");
                return Dispatch::Failed;
            }
            info!(terminal_id = %ping.terminal_id, "answered ping call");
            Dispatch::Handled
        }
        PingStatus::Response => {
            info!(terminal_id = %ping.terminal_id, "terminal is alive");
            Dispatch::Handled
        }
    }
}

async fn handle_record(shared: &Shared, payload: &str) -> Dispatch {
    let record = match RecordPayload::parse(payload) {
        Ok(record) => record,
        Err(error) => {
            warn!(%error, "malformed attendance payload");
            return Dispatch::Failed;
        }
    };

    // The sole admission-control checkpoint: unknown terminals are dropped
    // without any side effect.
    if !shared.admissions.read().await.contains(&record.terminal_id) {
        debug!(terminal_id = %record.terminal_id, badge_id = record.badge_id,
               "record from unadmitted terminal dropped");
        return Dispatch::Dropped;
    }

    let Some(at) = record.timestamp() else {
        warn!(badge_id = record.badge_id, "attendance record with invalid timestamp");
        return Dispatch::Failed;
    };

    info!(terminal_id = %record.terminal_id, badge_id = record.badge_id, "badge scanned");

    let mut store = shared.store.lock().await;
    match store.add_entry(record.badge_id, &record.terminal_id, at) {
        Ok(()) => {
            log_entry_added(&store, record.badge_id);
            Dispatch::Handled
        }
        Err(StoreError::NoSuchEmployee(badge_id)) => {
            // First-seen badges self-heal: register anonymously, retry once
            warn!(badge_id, "no employee for badge, registering anonymously");
            match store.add_employee(badge_id, Some(&badge_id.to_string()), None) {
                Ok(employee_id) => {
                    info!(employee_id = %employee_id, badge_id, "anonymous employee registered");
                }
                Err(error) => {
                    error!(%error, badge_id, "auto-registration failed");
                    return Dispatch::Failed;
                }
            }
            match store.add_entry(record.badge_id, &record.terminal_id, at) {
                Ok(()) => {
                    log_entry_added(&store, record.badge_id);
                    Dispatch::Handled
                }
                Err(error) => {
                    error!(%error, badge_id, "entry retry failed after auto-registration");
                    Dispatch::Failed
                }
            }
        }
        Err(error) => {
            error!(%error, badge_id = record.badge_id, "failed to append attendance entry");
            Dispatch::Failed
        }
    }
}

fn log_entry_added(store: &AttendanceStore, badge_id: u64) {
    if let Ok(name) = store.employee_name(badge_id) {
        info!(name = %name, badge_id, "attendance entry added");
    }
}

fn handle_broadcast(shared: &Shared, payload: &str) -> Dispatch {
    match BroadcastPayload::parse(payload) {
        Ok(BroadcastPayload::Call { server_id }) => {
            // Our own announcement echoed back, or another server's round
            if server_id != shared.server_id {
                debug!(server_id = %server_id, "discovery call from another server");
            }
            Dispatch::Ignored
        }
        Ok(BroadcastPayload::Response {
            terminal_id,
            server_id,
        }) => {
            if server_id != shared.server_id {
                return Dispatch::Ignored;
            }
            shared.presence.record_response(&terminal_id, &server_id);
            Dispatch::Handled
        }
        Err(error) => {
            warn!(%error, "malformed broadcast payload");
            Dispatch::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use crate::presence::PresenceTracker;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Fixture {
        _dir: TempDir,
        bus: Arc<dyn Bus>,
        shared: Arc<Shared>,
        tracker: PresenceTracker,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());
        let store = AttendanceStore::open(dir.path().join("data"), dir.path().join("reports"))
            .unwrap();
        let admissions = AdmissionList::open(dir.path().join("whitelist.txt")).unwrap();
        let tracker = PresenceTracker::new("server", Duration::from_secs(60));

        let shared = Arc::new(Shared {
            server_id: "server".to_string(),
            bus: bus.clone(),
            store: Arc::new(Mutex::new(store)),
            admissions: Arc::new(RwLock::new(admissions)),
            presence: tracker.handle(),
        });

        Fixture {
            _dir: dir,
            bus,
            shared,
            tracker,
        }
    }

    fn record(channel: &str, payload: &str) -> BusMessage {
        BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unadmitted_terminal_dropped() {
        let fx = fixture();

        let outcome = dispatch(&fx.shared, &record(RFID_RECORD, "42.1.1.2024.9.0.gate-1")).await;
        assert_eq!(outcome, Dispatch::Dropped);
        assert!(fx.shared.store.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_badge_auto_registers_once() {
        let fx = fixture();
        fx.shared.admissions.write().await.add("gate-1").unwrap();

        let outcome = dispatch(&fx.shared, &record(RFID_RECORD, "42.1.1.2024.9.0.gate-1")).await;
        assert_eq!(outcome, Dispatch::Handled);

        let store = fx.shared.store.lock().await;
        let rows = store.summarize(true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].badge_id, 42);
        assert_eq!(rows[0].name, "42");
        assert_eq!(rows[0].history.len(), 1);
    }

    #[tokio::test]
    async fn test_known_badge_appends_to_existing_employee() {
        let fx = fixture();
        fx.shared.admissions.write().await.add("gate-1").unwrap();
        fx.shared
            .store
            .lock()
            .await
            .add_employee(42, Some("Ada"), Some("aaaa"))
            .unwrap();

        dispatch(&fx.shared, &record(RFID_RECORD, "42.1.1.2024.9.0.gate-1")).await;
        dispatch(&fx.shared, &record(RFID_RECORD, "42.1.1.2024.17.0.gate-1")).await;

        let store = fx.shared.store.lock().await;
        let rows = store.summarize(true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ada");
        assert_eq!(rows[0].history.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_record_fails_without_state_change() {
        let fx = fixture();
        fx.shared.admissions.write().await.add("gate-1").unwrap();

        let outcome = dispatch(&fx.shared, &record(RFID_RECORD, "not-a-record")).await;
        assert_eq!(outcome, Dispatch::Failed);
        assert!(fx.shared.store.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_ping_for_other_server_ignored() {
        let fx = fixture();
        let outcome = dispatch(&fx.shared, &record(TERMINAL_PING, "gate-1.other.0")).await;
        assert_eq!(outcome, Dispatch::Ignored);
    }

    #[tokio::test]
    async fn test_ping_call_answered_response_not() {
        let fx = fixture();
        let mut pings = fx.bus.subscribe(&[SERVER_PING]).unwrap();

        let outcome = dispatch(&fx.shared, &record(TERMINAL_PING, "gate-1.server.0")).await;
        assert_eq!(outcome, Dispatch::Handled);

        let reply = timeout(Duration::from_secs(1), pings.recv())
            .await
            .unwrap()
            .unwrap();
        let reply = PingPayload::parse(&reply.payload, SERVER_PING).unwrap();
        assert_eq!(reply.terminal_id, "gate-1");
        assert_eq!(reply.status, PingStatus::Response);

        // A response is only logged, never answered: no ping loops
        let outcome = dispatch(&fx.shared, &record(TERMINAL_PING, "gate-1.server.1")).await;
        assert_eq!(outcome, Dispatch::Handled);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pings.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_response_feeds_presence() {
        let fx = fixture();

        let outcome = dispatch(&fx.shared, &record(SERVER_BROADCAST, "gate-1.server")).await;
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(fx.tracker.handle().seen_terminals(), ["gate-1"]);

        // Responses for another server and our own echoed call are ignored
        let outcome = dispatch(&fx.shared, &record(SERVER_BROADCAST, "gate-2.other")).await;
        assert_eq!(outcome, Dispatch::Ignored);
        let outcome = dispatch(&fx.shared, &record(SERVER_BROADCAST, "server")).await;
        assert_eq!(outcome, Dispatch::Ignored);
        assert_eq!(fx.tracker.handle().seen_terminals(), ["gate-1"]);
    }

    #[tokio::test]
    async fn test_debug_handled() {
        let fx = fixture();
        let outcome = dispatch(&fx.shared, &record(TERMINAL_DEBUG, "Terminal connected.gate-1")).await;
        assert_eq!(outcome, Dispatch::Handled);
    }

    #[tokio::test]
    async fn test_router_lifecycle_and_dispatch() {
        let fx = fixture();
        let mut router = Router::new(
            "server",
            fx.bus.clone(),
            fx.shared.store.clone(),
            fx.shared.admissions.clone(),
            fx.tracker.handle(),
        );

        router.connect().await.unwrap();
        assert!(matches!(router.connect().await, Err(Error::AlreadyConnected)));

        assert!(router.add_terminal("gate-1").await.unwrap());
        assert!(!router.add_terminal("gate-1").await.unwrap());

        // A bad message first, then a good one: the loop survives
        fx.bus.publish(RFID_RECORD, "garbage").unwrap();
        fx.bus.publish(RFID_RECORD, "42.1.1.2024.9.0.gate-1").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if !fx.shared.store.lock().await.is_empty() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "record never ingested");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(router.remove_terminal("gate-1").await.unwrap());
        router.disconnect().await;
        router.disconnect().await;
    }
}
