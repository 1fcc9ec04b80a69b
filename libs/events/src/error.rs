//! Error types for signal delivery.

use thiserror::Error;

/// Errors that can occur when sending a signal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// The target isolate is not connected to the bus.
    #[error("unknown signal target: {0}")]
    UnknownTarget(String),

    /// The target did not handle the signal in time.
    #[error("signal {name} to {target} timed out")]
    Timeout { name: String, target: String },

    /// The signal name is empty or malformed.
    #[error("invalid signal name: {0}")]
    InvalidName(String),

    /// The payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Serialization(err.to_string())
    }
}
