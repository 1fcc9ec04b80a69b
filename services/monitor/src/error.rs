//! Monitor errors.

use orbit_placement::PlacementFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// A platform stop sequence is already running.
    #[error("platform stop already in progress")]
    StopInProgress,

    /// The resolver placed components on an isolate nobody described.
    #[error("no isolate template for {0}")]
    MissingTemplate(String),

    #[error(transparent)]
    Placement(#[from] PlacementFailure),
}
