//! orbit forker
//!
//! One forker runs per node. It launches isolate processes on request,
//! terminates them, and answers liveness probes independently of the
//! signal channel the isolates themselves use.
//!
//! ## Modules
//!
//! - `codes`: numeric result tables crossing the monitor ↔ forker boundary
//! - `forker`: the [`Forker`] contract
//! - `runner`: per-kind command builders
//! - `process`: [`ProcessForker`], the OS process implementation
//! - `handler`: serves forker requests arriving as signals
//! - `remote`: [`RemoteForker`], a [`Forker`] reached over the signal bus

pub mod codes;
pub mod forker;
pub mod handler;
pub mod process;
pub mod remote;
pub mod runner;

mod error;

pub use codes::{PingStatus, StartResult};
pub use error::ForkerError;
pub use forker::Forker;
pub use handler::ForkerSignalHandler;
pub use process::{IsolateExit, ProcessForker, ProcessForkerConfig};
pub use remote::RemoteForker;
pub use runner::{ExecRunner, IsolateRunner, LaunchContext};
