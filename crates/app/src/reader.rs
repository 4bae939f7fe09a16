//! Stdin badge reader
//!
//! Development stand-in for the hardware reader: each line typed on stdin is
//! one badge presentation. The card "appears" for a single scan tick and is
//! gone on the next, so repeating a badge id reports it again.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use tally_net::BadgeReader;
use tracing::warn;

pub struct StdinReader {
    feed: Receiver<u64>,
}

impl StdinReader {
    /// Spawn the blocking stdin thread and return the reader
    pub fn spawn() -> Self {
        let (tx, feed) = mpsc::channel();

        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                match input.parse::<u64>() {
                    Ok(badge_id) => {
                        if tx.send(badge_id).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!(input, "not a badge id"),
                }
            }
        });

        Self { feed }
    }
}

impl BadgeReader for StdinReader {
    fn read_badge(&mut self) -> Option<u64> {
        match self.feed.try_recv() {
            Ok(badge_id) => Some(badge_id),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
