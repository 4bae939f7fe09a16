//! Channel payload types
//!
//! All payloads are `.`-joined plain-text fields. Each channel gets a typed
//! payload with `parse`/`encode`, validated once here at the boundary so the
//! dispatch handlers never unpack positional fields themselves.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

/// Terminal free-text announcements, terminal → server
pub const TERMINAL_DEBUG: &str = "terminal/debug";
/// Badge scans, terminal → server
pub const RFID_RECORD: &str = "rfid/record";
/// Pings addressed to terminals, server → terminal
pub const SERVER_PING: &str = "server/ping";
/// Pings addressed to the server, terminal → server
pub const TERMINAL_PING: &str = "terminal/ping";
/// Presence discovery, both directions
pub const SERVER_BROADCAST: &str = "server/broadcast";

/// Channels the server side subscribes to
pub const SERVER_SUBSCRIPTIONS: &[&str] =
    &[TERMINAL_DEBUG, TERMINAL_PING, RFID_RECORD, SERVER_BROADCAST];

/// Channels a terminal subscribes to
pub const TERMINAL_SUBSCRIPTIONS: &[&str] = &[SERVER_PING, SERVER_BROADCAST];

const SEPARATOR: char = '.';

fn malformed(channel: &'static str, detail: impl Into<String>) -> Error {
    Error::Payload {
        channel,
        detail: detail.into(),
    }
}

/// Ping direction marker, `0` on the wire for a call, `1` for a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    Call,
    Response,
}

impl PingStatus {
    fn code(self) -> u8 {
        match self {
            PingStatus::Call => 0,
            PingStatus::Response => 1,
        }
    }

    fn from_code(field: &str, channel: &'static str) -> Result<Self> {
        match field {
            "0" => Ok(PingStatus::Call),
            "1" => Ok(PingStatus::Response),
            other => Err(malformed(channel, format!("unknown ping status '{other}'"))),
        }
    }
}

/// `terminal/debug`: `message.terminalId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugPayload {
    pub message: String,
    pub terminal_id: String,
}

impl DebugPayload {
    pub fn new(message: impl Into<String>, terminal_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            terminal_id: terminal_id.into(),
        }
    }

    /// Everything before the last separator is the message, so free text
    /// containing dots survives.
    pub fn parse(payload: &str) -> Result<Self> {
        let (message, terminal_id) = payload
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| malformed(TERMINAL_DEBUG, "expected 'message.terminalId'"))?;
        if terminal_id.is_empty() {
            return Err(malformed(TERMINAL_DEBUG, "empty terminal id"));
        }
        Ok(Self::new(message, terminal_id))
    }

    pub fn encode(&self) -> String {
        format!("{}{SEPARATOR}{}", self.message, self.terminal_id)
    }
}

/// `rfid/record`: `badgeId.day.month.year.hour.minute.terminalId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPayload {
    pub badge_id: u64,
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub hour: u32,
    pub minute: u32,
    pub terminal_id: String,
}

impl RecordPayload {
    /// Build a record for a scan happening at `at`
    pub fn from_scan(badge_id: u64, at: NaiveDateTime, terminal_id: impl Into<String>) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            badge_id,
            day: at.day(),
            month: at.month(),
            year: at.year(),
            hour: at.hour(),
            minute: at.minute(),
            terminal_id: terminal_id.into(),
        }
    }

    pub fn parse(payload: &str) -> Result<Self> {
        let fields: Vec<&str> = payload.split(SEPARATOR).collect();
        if fields.len() != 7 {
            return Err(malformed(
                RFID_RECORD,
                format!("expected 7 fields, got {}", fields.len()),
            ));
        }

        fn num<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
            field
                .parse()
                .map_err(|_| malformed(RFID_RECORD, format!("{what} is not a number: '{field}'")))
        }

        let record = Self {
            badge_id: num(fields[0], "badge id")?,
            day: num(fields[1], "day")?,
            month: num(fields[2], "month")?,
            year: num(fields[3], "year")?,
            hour: num(fields[4], "hour")?,
            minute: num(fields[5], "minute")?,
            terminal_id: fields[6].to_string(),
        };

        if record.terminal_id.is_empty() {
            return Err(malformed(RFID_RECORD, "empty terminal id"));
        }
        if record.timestamp().is_none() {
            return Err(malformed(
                RFID_RECORD,
                format!(
                    "{:02}/{:02}/{} {:02}:{:02} is not a valid calendar time",
                    record.day, record.month, record.year, record.hour, record.minute
                ),
            ));
        }
        Ok(record)
    }

    pub fn encode(&self) -> String {
        format!(
            "{1}{0}{2}{0}{3}{0}{4}{0}{5}{0}{6}{0}{7}",
            SEPARATOR,
            self.badge_id,
            self.day,
            self.month,
            self.year,
            self.hour,
            self.minute,
            self.terminal_id
        )
    }

    /// Scan timestamp; always present for parsed payloads
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_opt(self.hour, self.minute, 0))
    }
}

/// `server/ping` and `terminal/ping`: `terminalId.serverId.status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPayload {
    pub terminal_id: String,
    pub server_id: String,
    pub status: PingStatus,
}

impl PingPayload {
    pub fn new(
        terminal_id: impl Into<String>,
        server_id: impl Into<String>,
        status: PingStatus,
    ) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            server_id: server_id.into(),
            status,
        }
    }

    pub fn parse(payload: &str, channel: &'static str) -> Result<Self> {
        let fields: Vec<&str> = payload.split(SEPARATOR).collect();
        if fields.len() != 3 {
            return Err(malformed(
                channel,
                format!("expected 3 fields, got {}", fields.len()),
            ));
        }
        if fields[0].is_empty() || fields[1].is_empty() {
            return Err(malformed(channel, "empty terminal or server id"));
        }
        Ok(Self::new(
            fields[0],
            fields[1],
            PingStatus::from_code(fields[2], channel)?,
        ))
    }

    pub fn encode(&self) -> String {
        format!(
            "{1}{0}{2}{0}{3}",
            SEPARATOR,
            self.terminal_id,
            self.server_id,
            self.status.code()
        )
    }
}

/// `server/broadcast`: `serverId` announces a discovery round,
/// `terminalId.serverId` answers it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastPayload {
    Call { server_id: String },
    Response { terminal_id: String, server_id: String },
}

impl BroadcastPayload {
    pub fn parse(payload: &str) -> Result<Self> {
        let fields: Vec<&str> = payload.split(SEPARATOR).collect();
        if fields.iter().any(|field| field.is_empty()) {
            return Err(malformed(SERVER_BROADCAST, "empty field"));
        }
        match fields.as_slice() {
            [server_id] => Ok(BroadcastPayload::Call {
                server_id: server_id.to_string(),
            }),
            [terminal_id, server_id] => Ok(BroadcastPayload::Response {
                terminal_id: terminal_id.to_string(),
                server_id: server_id.to_string(),
            }),
            other => Err(malformed(
                SERVER_BROADCAST,
                format!("expected 1 or 2 fields, got {}", other.len()),
            )),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            BroadcastPayload::Call { server_id } => server_id.clone(),
            BroadcastPayload::Response {
                terminal_id,
                server_id,
            } => format!("{terminal_id}{SEPARATOR}{server_id}"),
        }
    }
}
