//! Terminal agent
//!
//! Runs on a badge terminal: polls the reader, reports badge presence
//! transitions, and answers the server's pings and discovery broadcasts.
//! De-duplication is edge-triggered on badge presence: the same badge is
//! reported again as soon as the reader has seen "no card" in between.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{publish_logged, Bus, BusMessage};
use crate::error::{Error, Result};
use crate::payload::{
    BroadcastPayload, DebugPayload, PingPayload, PingStatus, RecordPayload, RFID_RECORD,
    SERVER_BROADCAST, SERVER_PING, TERMINAL_DEBUG, TERMINAL_PING, TERMINAL_SUBSCRIPTIONS,
};

/// Default reader poll interval
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// The physical reader, polled once per scan tick
pub trait BadgeReader: Send + 'static {
    /// Current card on the reader; `None` when no card is present
    fn read_badge(&mut self) -> Option<u64>;
}

/// Peer-side agent mirroring the server router
pub struct TerminalAgent {
    terminal_id: String,
    bus: Arc<dyn Bus>,
    scan_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    scan_task: Option<JoinHandle<()>>,
    control_task: Option<JoinHandle<()>>,
}

impl TerminalAgent {
    pub fn new(terminal_id: impl Into<String>, bus: Arc<dyn Bus>, scan_interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            terminal_id: terminal_id.into(),
            bus,
            scan_interval,
            shutdown_tx,
            scan_task: None,
            control_task: None,
        }
    }

    /// Announce on the debug channel, subscribe the control channels, and
    /// start the scan loop against `reader`.
    pub fn connect(&mut self, reader: Box<dyn BadgeReader>) -> Result<()> {
        if self.scan_task.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let feed = self.bus.subscribe(TERMINAL_SUBSCRIPTIONS)?;
        self.announce("Terminal connected")?;

        self.control_task = Some(tokio::spawn(control_loop(
            self.terminal_id.clone(),
            self.bus.clone(),
            feed,
            self.shutdown_tx.subscribe(),
        )));
        self.scan_task = Some(tokio::spawn(scan_loop(
            self.terminal_id.clone(),
            self.bus.clone(),
            reader,
            self.scan_interval,
            self.shutdown_tx.subscribe(),
        )));

        info!(terminal_id = %self.terminal_id, "terminal agent connected");
        Ok(())
    }

    /// Announce the disconnect, stop both loops and wait for them to exit.
    /// Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if self.scan_task.is_none() && self.control_task.is_none() {
            return;
        }

        if let Err(error) = self.announce("Terminal disconnected") {
            warn!(%error, "disconnect announcement failed");
        }

        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.scan_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.control_task.take() {
            let _ = task.await;
        }
        info!(terminal_id = %self.terminal_id, "terminal agent disconnected");
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    fn announce(&self, message: &str) -> Result<()> {
        let payload = DebugPayload::new(message, &self.terminal_id);
        self.bus.publish(TERMINAL_DEBUG, &payload.encode())
    }
}

/// Poll the reader and report presence transitions
async fn scan_loop(
    terminal_id: String,
    bus: Arc<dyn Bus>,
    mut reader: Box<dyn BadgeReader>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut previous_badge: Option<u64> = None;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match reader.read_badge() {
                    Some(badge_id) if previous_badge != Some(badge_id) => {
                        previous_badge = Some(badge_id);
                        let record = RecordPayload::from_scan(
                            badge_id,
                            Local::now().naive_local(),
                            &terminal_id,
                        );
                        publish_logged(bus.as_ref(), RFID_RECORD, &record.encode());
                        info!(badge_id, "badge reported");
                    }
                    // Same card still on the reader
                    Some(_) => {}
                    None => previous_badge = None,
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("scan loop shutting down");
                break;
            }
        }
    }
}

/// Answer pings and discovery broadcasts
async fn control_loop(
    terminal_id: String,
    bus: Arc<dyn Bus>,
    mut feed: mpsc::Receiver<BusMessage>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = feed.recv() => {
                match message {
                    Some(message) => handle_control(&terminal_id, bus.as_ref(), &message),
                    None => {
                        debug!("bus feed closed, control loop exiting");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("control loop shutting down");
                break;
            }
        }
    }
}

fn handle_control(terminal_id: &str, bus: &dyn Bus, message: &BusMessage) {
    match message.channel.as_str() {
        SERVER_PING => match PingPayload::parse(&message.payload, SERVER_PING) {
            Ok(ping) if ping.terminal_id == terminal_id && ping.status == PingStatus::Call => {
                let response = PingPayload::new(terminal_id, &ping.server_id, PingStatus::Response);
                publish_logged(bus, TERMINAL_PING, &response.encode());
                info!(server_id = %ping.server_id, "answered server ping");
            }
            // A response, or a call addressed to another terminal
            Ok(_) => {}
            Err(error) => warn!(%error, "malformed ping payload"),
        },
        SERVER_BROADCAST => match BroadcastPayload::parse(&message.payload) {
            Ok(BroadcastPayload::Call { server_id }) => {
                let response = BroadcastPayload::Response {
                    terminal_id: terminal_id.to_string(),
                    server_id: server_id.clone(),
                };
                publish_logged(bus, SERVER_BROADCAST, &response.encode());
                debug!(server_id = %server_id, "answered presence broadcast");
            }
            // Other terminals answering the same round
            Ok(BroadcastPayload::Response { .. }) => {}
            Err(error) => warn!(%error, "malformed broadcast payload"),
        },
        other => debug!(channel = other, "message on unexpected channel"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use std::collections::VecDeque;
    use tokio::time::timeout;

    /// Reader that replays a scripted sequence, then stays empty
    struct ScriptedReader {
        script: VecDeque<Option<u64>>,
    }

    impl ScriptedReader {
        fn new(script: impl IntoIterator<Item = Option<u64>>) -> Box<Self> {
            Box::new(Self {
                script: script.into_iter().collect(),
            })
        }
    }

    impl BadgeReader for ScriptedReader {
        fn read_badge(&mut self) -> Option<u64> {
            self.script.pop_front().flatten()
        }
    }

    fn agent(bus: &Arc<dyn Bus>) -> TerminalAgent {
        TerminalAgent::new("gate-1", bus.clone(), Duration::from_millis(10))
    }

    async fn recv(
        rx: &mut mpsc::Receiver<BusMessage>,
    ) -> BusMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no message before timeout")
            .expect("bus closed")
    }

    #[tokio::test]
    async fn test_dedup_is_edge_triggered() {
        let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());
        let mut records = bus.subscribe(&[RFID_RECORD]).unwrap();

        // Badge 5 held for three ticks, lifted, then presented again
        let mut agent = agent(&bus);
        agent
            .connect(ScriptedReader::new([
                Some(5),
                Some(5),
                Some(5),
                None,
                Some(5),
            ]))
            .unwrap();

        let first = RecordPayload::parse(&recv(&mut records).await.payload).unwrap();
        assert_eq!(first.badge_id, 5);
        assert_eq!(first.terminal_id, "gate-1");

        let second = RecordPayload::parse(&recv(&mut records).await.payload).unwrap();
        assert_eq!(second.badge_id, 5);

        // No third report
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(records.try_recv().is_err());

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn test_card_swap_without_gap_is_reported() {
        let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());
        let mut records = bus.subscribe(&[RFID_RECORD]).unwrap();

        let mut agent = agent(&bus);
        agent
            .connect(ScriptedReader::new([Some(5), Some(7)]))
            .unwrap();

        let first = RecordPayload::parse(&recv(&mut records).await.payload).unwrap();
        let second = RecordPayload::parse(&recv(&mut records).await.payload).unwrap();
        assert_eq!((first.badge_id, second.badge_id), (5, 7));

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn test_answers_ping_addressed_to_self_only() {
        let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());
        let mut pings = bus.subscribe(&[TERMINAL_PING]).unwrap();

        let mut agent = agent(&bus);
        agent.connect(ScriptedReader::new([])).unwrap();

        let call = PingPayload::new("gate-1", "server", PingStatus::Call);
        bus.publish(SERVER_PING, &call.encode()).unwrap();

        let reply = PingPayload::parse(&recv(&mut pings).await.payload, TERMINAL_PING).unwrap();
        assert_eq!(reply.terminal_id, "gate-1");
        assert_eq!(reply.server_id, "server");
        assert_eq!(reply.status, PingStatus::Response);

        // Addressed elsewhere: silence. A response: silence (no ping loops).
        let other = PingPayload::new("gate-2", "server", PingStatus::Call);
        bus.publish(SERVER_PING, &other.encode()).unwrap();
        let response = PingPayload::new("gate-1", "server", PingStatus::Response);
        bus.publish(SERVER_PING, &response.encode()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pings.try_recv().is_err());

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn test_answers_discovery_broadcast() {
        let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());
        let mut broadcasts = bus.subscribe(&[SERVER_BROADCAST]).unwrap();

        let mut agent = agent(&bus);
        agent.connect(ScriptedReader::new([])).unwrap();

        bus.publish(SERVER_BROADCAST, "server").unwrap();

        // Skip our own call as it echoes back
        let response = loop {
            let message = recv(&mut broadcasts).await;
            if let Ok(BroadcastPayload::Response { terminal_id, server_id }) =
                BroadcastPayload::parse(&message.payload)
            {
                break (terminal_id, server_id);
            }
        };
        assert_eq!(response, ("gate-1".to_string(), "server".to_string()));

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_announce() {
        let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());
        let mut debugs = bus.subscribe(&[TERMINAL_DEBUG]).unwrap();

        let mut agent = agent(&bus);
        agent.connect(ScriptedReader::new([])).unwrap();
        assert!(matches!(
            agent.connect(ScriptedReader::new([])),
            Err(Error::AlreadyConnected)
        ));

        let hello = DebugPayload::parse(&recv(&mut debugs).await.payload).unwrap();
        assert_eq!(hello.message, "Terminal connected");
        assert_eq!(hello.terminal_id, "gate-1");

        agent.disconnect().await;
        let goodbye = DebugPayload::parse(&recv(&mut debugs).await.payload).unwrap();
        assert_eq!(goodbye.message, "Terminal disconnected");

        // Idempotent
        agent.disconnect().await;
    }
}
