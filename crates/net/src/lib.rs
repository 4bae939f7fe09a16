//! Tally Network Engine
//!
//! Pub/sub protocol plumbing between badge terminals and the attendance
//! server.
//!
//! # Architecture
//!
//! - **Router**: server side, dispatches inbound bus messages by topic and
//!   enforces terminal admission
//! - **PresenceTracker**: periodic announce-and-collect terminal discovery
//! - **TerminalAgent**: peer side, reports badge scans and answers the server
//! - **Bus**: the narrow pub/sub seam; [`LoopbackBus`] is the in-process
//!   implementation used by tests and single-host deployments
//!
//! All payloads are `.`-joined plain text, typed and validated in
//! [`payload`].

pub mod bus;
pub mod error;
pub mod payload;
pub mod presence;
pub mod router;
pub mod terminal;

pub use bus::{Bus, BusMessage, LoopbackBus};
pub use error::{Error, Result};
pub use presence::{PresenceHandle, PresenceSnapshot, PresenceTracker, DEFAULT_BROADCAST_INTERVAL};
pub use router::{Dispatch, Router};
pub use terminal::{BadgeReader, TerminalAgent, DEFAULT_SCAN_INTERVAL};
