//! Error taxonomy shared across the daemon.
//!
//! One variant per §7 category so call sites can match on *kind* rather
//! than string-sniff a message. The `Display` text is what ends up in a
//! `response` envelope's `message` field when a handler downgrades an
//! error instead of panicking.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("framing error: {0}")]
    Framing(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("sandbox violation: {0}")]
    Sandbox(String),

    #[error("filesystem error: {0}")]
    Vfs(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("peer error: {0}")]
    Peer(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

impl From<rusqlite::Error> for DaemonError {
    fn from(e: rusqlite::Error) -> Self {
        DaemonError::Journal(e.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Framing(e.to_string())
    }
}
