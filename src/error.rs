//! Error types
//!
//! Connection-level failures are never returned from here: they surface as a
//! `Disconnected(ErrorCode)` event on the connection. What remains are
//! command rejections, local parameter validation and a few state errors.

use thiserror::Error;

use crate::amf::AmfValue;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// A failed outbound RTMP command
///
/// Carries the command name and the raw rejection payload sent by the peer
/// (or synthesized by the engine).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("RTMP command {command} failed: {value:?}")]
pub struct CommandError {
    /// Command name (`createStream`, `deleteStream`, ...)
    pub command: String,
    /// Raw rejection payload
    pub value: Vec<AmfValue>,
}

impl CommandError {
    pub fn new(command: impl Into<String>, value: Vec<AmfValue>) -> Self {
        Self {
            command: command.into(),
            value,
        }
    }
}

/// Parameter constraint violations, raised before anything is allocated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{name} can't be negative")]
    Negative { name: &'static str },

    #[error("{name} can't be higher than {max}")]
    TooHigh { name: &'static str, max: i64 },
}

/// Crate error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter supplied by the caller
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The peer (or the engine) rejected a command
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The entity was stopped before the operation could complete
    #[error("{0} is stopped")]
    Stopped(&'static str),

    /// The connection is not (or no longer) connected to its peer
    #[error("not connected")]
    NotConnected,

    /// The engine dropped a pending request without answering it
    #[error("RTMP command {0} was abandoned by the engine")]
    Abandoned(String),

    /// A command succeeded but its response could not be interpreted
    #[error("invalid response to {command}: {reason}")]
    InvalidResponse {
        command: &'static str,
        reason: String,
    },

    /// The RTMP url could not be parsed
    #[error("invalid RTMP url: {0}")]
    InvalidUrl(String),

    /// Transport-level error reported synchronously by the engine
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
