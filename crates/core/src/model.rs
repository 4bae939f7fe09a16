//! Ledger models and flat-file record codecs
//!
//! Registry rows are `employeeId;name;badgeId`, history rows are
//! `day;month;year;hour;minute;terminalId`. The separator is forbidden in
//! employee ids and names.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Field separator used by every persisted record
pub const FIELD_SEPARATOR: char = ';';

/// Badge value meaning "no badge assigned"
pub const NO_BADGE: u64 = 0;

/// A single badge scan as received from a terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub hour: u32,
    pub minute: u32,
    /// Reporting terminal, or a placeholder for non-networked entries
    pub terminal_id: String,
}

impl AttendanceEvent {
    /// Build an event from a calendar timestamp (minute resolution)
    pub fn at(stamp: NaiveDateTime, terminal_id: impl Into<String>) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            day: stamp.day(),
            month: stamp.month(),
            year: stamp.year(),
            hour: stamp.hour(),
            minute: stamp.minute(),
            terminal_id: terminal_id.into(),
        }
    }

    /// Calendar timestamp of the scan. `None` for nonsense dates (e.g. 31/02).
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_opt(self.hour, self.minute, 0))
    }

    /// Encode as a history file row
    pub(crate) fn to_line(&self) -> String {
        format!(
            "{1}{0}{2}{0}{3}{0}{4}{0}{5}{0}{6}",
            FIELD_SEPARATOR, self.day, self.month, self.year, self.hour, self.minute, self.terminal_id
        )
    }

    /// Parse a history file row
    pub(crate) fn from_line(line: &str, file: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != 6 {
            return Err(Error::Corrupt {
                file: file.to_string(),
                detail: format!("expected 6 fields, got {}", fields.len()),
            });
        }

        fn num<T: std::str::FromStr>(field: &str, file: &str, what: &str) -> Result<T> {
            field.parse().map_err(|_| Error::Corrupt {
                file: file.to_string(),
                detail: format!("{what} is not a number: '{field}'"),
            })
        }

        Ok(Self {
            day: num(fields[0], file, "day")?,
            month: num(fields[1], file, "month")?,
            year: num(fields[2], file, "year")?,
            hour: num(fields[3], file, "hour")?,
            minute: num(fields[4], file, "minute")?,
            terminal_id: fields[5].to_string(),
        })
    }
}

/// One registry row plus (optionally) its history, as returned by summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub employee_id: String,
    pub name: String,
    pub badge_id: u64,
    /// Empty when the summary was requested without history
    pub history: Vec<AttendanceEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_line_roundtrip() {
        let event = AttendanceEvent {
            day: 3,
            month: 11,
            year: 2024,
            hour: 8,
            minute: 45,
            terminal_id: "gate-2".to_string(),
        };

        let line = event.to_line();
        assert_eq!(line, "3;11;2024;8;45;gate-2");
        assert_eq!(AttendanceEvent::from_line(&line, "test").unwrap(), event);
    }

    #[test]
    fn test_event_timestamp() {
        let event = AttendanceEvent {
            day: 1,
            month: 1,
            year: 2024,
            hour: 9,
            minute: 0,
            terminal_id: "t".to_string(),
        };
        let stamp = event.timestamp().unwrap();
        assert_eq!(AttendanceEvent::at(stamp, "t"), event);
    }

    #[test]
    fn test_nonsense_date_has_no_timestamp() {
        let event = AttendanceEvent {
            day: 31,
            month: 2,
            year: 2024,
            hour: 9,
            minute: 0,
            terminal_id: "t".to_string(),
        };
        assert!(event.timestamp().is_none());
    }

    #[test]
    fn test_bad_lines_rejected() {
        assert!(AttendanceEvent::from_line("1;2;3;4;5", "test").is_err());
        assert!(AttendanceEvent::from_line("1;2;3;4;5;t;extra", "test").is_err());
        assert!(AttendanceEvent::from_line("one;2;2024;9;0;t", "test").is_err());
    }
}
