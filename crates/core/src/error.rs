//! Error types for Tally Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No employee holds badge {0}")]
    NoSuchEmployee(u64),

    #[error("Badge {0} is already assigned")]
    BadgeAlreadyUsed(u64),

    #[error("Employee id '{0}' is already taken")]
    EmployeeAlreadyExists(String),

    #[error("No attendance recorded for employee '{0}'")]
    NoData(String),

    #[error("Corrupt record in {file}: {detail}")]
    Corrupt { file: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
