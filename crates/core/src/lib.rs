//! Tally Core Library
//!
//! Employee registry, attendance ledger, session derivation, and terminal
//! admission control for the Tally presence system. Pure data and disk,
//! no networking.

pub mod admission;
pub mod error;
pub mod keygen;
pub mod model;
pub mod session;
pub mod store;

pub use admission::AdmissionList;
pub use error::{Error, Result};
pub use model::{AttendanceEvent, EmployeeSummary, FIELD_SEPARATOR, NO_BADGE};
pub use session::{derive_sessions, Session};
pub use store::AttendanceStore;
