//! Error types for the event sink

use crate::transport::TransportError;
use std::fmt;

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug)]
pub enum SinkError {
    /// Missing or malformed configuration, raised at construction
    Config(String),

    /// A flush failed and the active error policy reports it
    Transport(TransportError),

    /// `accept` was called after `close`
    SinkClosed,

    /// A producer value cannot be turned into a record
    InvalidRecord(String),

    /// IO operation failed
    Io(std::io::Error),

    /// JSON deserialization failed
    Json(serde_json::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SinkError::Transport(err) => write!(f, "Transport error: {}", err),
            SinkError::SinkClosed => write!(f, "Sink is closed"),
            SinkError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            SinkError::Io(err) => write!(f, "IO error: {}", err),
            SinkError::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Transport(err) => Some(err),
            SinkError::Io(err) => Some(err),
            SinkError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for SinkError {
    fn from(err: TransportError) -> Self {
        SinkError::Transport(err)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Json(err)
    }
}
