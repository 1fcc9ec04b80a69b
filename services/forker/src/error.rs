//! Launch errors.
//!
//! These stay inside the forker; callers only ever see a [`StartResult`](crate::StartResult).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForkerError {
    /// No runner is registered for the isolate kind.
    #[error("no runner for isolate kind {0}")]
    UnknownKind(String),

    /// The platform is stopping; launches are refused.
    #[error("platform is stopping")]
    PlatformStopping,

    /// The descriptor cannot be turned into a command.
    #[error("invalid launch request: {0}")]
    InvalidRequest(String),

    /// The OS refused to spawn the process.
    #[error("failed to spawn isolate process: {0}")]
    Spawn(#[from] std::io::Error),
}
