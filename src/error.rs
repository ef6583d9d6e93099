//! Error types for nt3-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all NT3 client operations.
#[derive(Debug, Error)]
pub enum Nt3Error {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TCP connect did not complete within the configured timeout.
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Connection closed by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A varint length does not fit in an addressable length.
    #[error("Varint length overflow")]
    LengthOverflow,

    /// A string field was not valid UTF-8.
    #[error("Invalid UTF-8 in string field: {0}")]
    InvalidEncoding(#[from] std::string::FromUtf8Error),

    /// Message type byte that is not part of NT3.
    #[error("Unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Message type that a server never sends to a client, or a message
    /// that arrived in the wrong session phase.
    #[error("Unexpected message type 0x{0:02x}")]
    UnexpectedMessage(u8),

    /// Entry type tag that is not part of NT3.
    #[error("Unknown entry type 0x{0:02x}")]
    UnknownEntryType(u8),

    /// A one-shot decode ran out of input.
    #[error("Input truncated")]
    Truncated,

    /// The id and name dictionaries of the entry table diverged.
    #[error("Entry table inconsistent: {ids} ids, {names} names")]
    Inconsistent {
        /// Entries indexed by id.
        ids: usize,
        /// Entries indexed by name.
        names: usize,
    },

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON error while loading a configuration document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Coarse classification of errors.
///
/// Every class except [`ErrorClass::Config`] ends the current session and
/// hands control back to the reconnect supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or unexpected data from the peer.
    Protocol,
    /// Connect, read or write failure.
    Transport,
    /// Entry table corruption; requires a full resync.
    Consistency,
    /// Bad configuration supplied by the caller.
    Config,
    /// A bug in the client itself, such as a panicked task.
    Internal,
}

impl Nt3Error {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Nt3Error::Io(_) | Nt3Error::ConnectTimeout(_) | Nt3Error::ConnectionClosed => {
                ErrorClass::Transport
            }
            Nt3Error::LengthOverflow
            | Nt3Error::InvalidEncoding(_)
            | Nt3Error::UnknownMessageType(_)
            | Nt3Error::UnexpectedMessage(_)
            | Nt3Error::UnknownEntryType(_)
            | Nt3Error::Truncated => ErrorClass::Protocol,
            Nt3Error::Inconsistent { .. } => ErrorClass::Consistency,
            Nt3Error::InvalidConfig(_) | Nt3Error::Json(_) => ErrorClass::Config,
            Nt3Error::Task(_) => ErrorClass::Internal,
        }
    }
}

/// Result type alias using Nt3Error.
pub type Result<T> = std::result::Result<T, Nt3Error>;
