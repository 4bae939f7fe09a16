//! Session derivation
//!
//! Events alternate entrance/exit purely by position: `history[0]` is an
//! entrance, every odd index is an exit. A trailing unmatched entrance yields
//! no session. A missed scan therefore shifts the parity of everything after
//! it; reports reflect that.

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::model::AttendanceEvent;

/// A derived entry/exit pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub entry: NaiveDateTime,
    pub exit: NaiveDateTime,
}

impl Session {
    /// Worked time, `exit - entry`
    pub fn duration_seconds(&self) -> i64 {
        (self.exit - self.entry).num_seconds()
    }
}

/// Pair alternating events into sessions
pub fn derive_sessions(history: &[AttendanceEvent]) -> Result<Vec<Session>> {
    let mut sessions = Vec::with_capacity(history.len() / 2);
    for pair in history.chunks_exact(2) {
        sessions.push(Session {
            entry: stamp(&pair[0])?,
            exit: stamp(&pair[1])?,
        });
    }
    Ok(sessions)
}

fn stamp(event: &AttendanceEvent) -> Result<NaiveDateTime> {
    event.timestamp().ok_or_else(|| {
        Error::InvalidInput(format!(
            "{:02}/{:02}/{} {:02}:{:02} is not a valid calendar time",
            event.day, event.month, event.year, event.hour, event.minute
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(day: u32, hour: u32, minute: u32) -> AttendanceEvent {
        AttendanceEvent {
            day,
            month: 1,
            year: 2024,
            hour,
            minute,
            terminal_id: "t1".to_string(),
        }
    }

    #[test]
    fn test_single_pair() {
        let history = [event(1, 9, 0), event(1, 17, 0)];
        let sessions = derive_sessions(&history).unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].entry.to_string(), "2024-01-01 09:00:00");
        assert_eq!(sessions[0].exit.to_string(), "2024-01-01 17:00:00");
        assert_eq!(sessions[0].duration_seconds(), 28800);
    }

    #[test]
    fn test_trailing_entrance_unmatched() {
        assert!(derive_sessions(&[event(1, 9, 0)]).unwrap().is_empty());

        let sessions = derive_sessions(&[event(1, 9, 0), event(1, 17, 0), event(2, 8, 30)]).unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_empty_history() {
        assert!(derive_sessions(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_pairing_is_positional_not_chronological() {
        // An exit recorded before its entrance still pairs by position
        let sessions = derive_sessions(&[event(2, 17, 0), event(1, 9, 0)]).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].duration_seconds() < 0);
    }

    #[test]
    fn test_overnight_session() {
        let sessions = derive_sessions(&[event(1, 22, 0), event(2, 6, 0)]).unwrap();
        assert_eq!(sessions[0].duration_seconds(), 8 * 3600);
    }

    #[test]
    fn test_invalid_calendar_date_rejected() {
        let mut bad = event(1, 9, 0);
        bad.month = 13;
        assert!(derive_sessions(&[bad, event(1, 17, 0)]).is_err());
    }
}
