//! Pub/sub bus seam
//!
//! The engine only ever sees this narrow surface; the broker itself is an
//! external collaborator. [`LoopbackBus`] is the in-process implementation
//! used by tests and single-host deployments: a broadcast fan-out with one
//! forwarder task per subscription.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::Result;

/// Fan-out buffer shared by all subscribers
const FANOUT_CAPACITY: usize = 256;

/// Per-subscriber delivery buffer
const SUBSCRIBER_CAPACITY: usize = 64;

/// A single message delivered to a subscriber
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Narrow pub/sub surface the engine talks through
pub trait Bus: Send + Sync + 'static {
    /// Publish a payload on a channel. Fire-and-forget; delivery to any
    /// particular subscriber is not guaranteed.
    fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a set of channels. Matching messages arrive on the
    /// returned receiver in per-channel publish order.
    fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BusMessage>>;
}

/// In-process bus: every subscriber sees every publish on its channels
pub struct LoopbackBus {
    fanout: broadcast::Sender<BusMessage>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self { fanout }
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LoopbackBus {
    fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let message = BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        // A send with no subscribers is fine, the message just vanishes
        let _ = self.fanout.send(message);
        Ok(())
    }

    fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<BusMessage>> {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let mut fanout_rx = self.fanout.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        tokio::spawn(async move {
            loop {
                match fanout_rx.recv().await {
                    Ok(message) => {
                        if channels.iter().any(|c| *c == message.channel)
                            && tx.send(message).await.is_err()
                        {
                            // Subscriber dropped its receiver
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "slow subscriber, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("bus closed, forwarder exiting");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

impl std::fmt::Debug for LoopbackBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBus")
            .field("subscribers", &self.fanout.receiver_count())
            .finish()
    }
}

/// Publish-or-log, for the paths where a lost message is tolerated
pub(crate) fn publish_logged(bus: &dyn Bus, channel: &str, payload: &str) {
    if let Err(error) = bus.publish(channel, payload) {
        warn!(channel, %error, "publish failed");
    }
}
