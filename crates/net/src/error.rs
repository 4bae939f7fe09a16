//! Network error types

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed payload on {channel}: {detail}")]
    Payload {
        channel: &'static str,
        detail: String,
    },

    #[error("Bus unavailable: {0}")]
    Bus(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Store(#[from] tally_core::Error),
}
