//! Result code tables.
//!
//! Only these numeric codes cross the monitor ↔ forker boundary; detailed
//! causes stay in the forker's logs.

use serde::{Deserialize, Serialize};

/// Outcome of a launch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum StartResult {
    /// The process was launched.
    Success,
    /// A process for this isolate is already running.
    AlreadyRunning,
    /// The runner failed to spawn the process.
    RunnerException,
    /// No runner handles the isolate kind.
    UnknownKind,
    /// The request could not be delivered, or the forker refused it.
    RequestError,
    /// The forker did not answer in time.
    RequestTimeout,
    /// The forker answered without a result.
    RequestNoResult,
}

impl StartResult {
    pub const fn code(self) -> i64 {
        match self {
            StartResult::Success => 0,
            StartResult::AlreadyRunning => 1,
            StartResult::RunnerException => 4,
            StartResult::UnknownKind => 5,
            StartResult::RequestError => -1,
            StartResult::RequestTimeout => -2,
            StartResult::RequestNoResult => -3,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => StartResult::Success,
            1 => StartResult::AlreadyRunning,
            4 => StartResult::RunnerException,
            5 => StartResult::UnknownKind,
            -1 => StartResult::RequestError,
            -2 => StartResult::RequestTimeout,
            -3 => StartResult::RequestNoResult,
            _ => return None,
        })
    }

    /// The isolate is running after the request.
    pub const fn is_success(self) -> bool {
        matches!(self, StartResult::Success | StartResult::AlreadyRunning)
    }
}

impl From<StartResult> for i64 {
    fn from(result: StartResult) -> Self {
        result.code()
    }
}

impl TryFrom<i64> for StartResult {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        StartResult::from_code(code).ok_or_else(|| format!("unknown start result code {code}"))
    }
}

impl std::fmt::Display for StartResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StartResult::Success => "success",
            StartResult::AlreadyRunning => "already_running",
            StartResult::RunnerException => "runner_exception",
            StartResult::UnknownKind => "unknown_kind",
            StartResult::RequestError => "request_error",
            StartResult::RequestTimeout => "request_timeout",
            StartResult::RequestNoResult => "request_no_result",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum PingStatus {
    /// The process is running.
    Alive,
    /// The process has exited.
    Dead,
    /// A stop was requested and the process is still running past the
    /// stuck threshold.
    Stuck,
    /// The forker never launched this isolate.
    NoProcessRef,
    /// Nothing is watching the process any more.
    NoWatcher,
}

impl PingStatus {
    pub const fn code(self) -> i64 {
        match self {
            PingStatus::Alive => 0,
            PingStatus::Dead => 1,
            PingStatus::Stuck => 2,
            PingStatus::NoProcessRef => 3,
            PingStatus::NoWatcher => 4,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => PingStatus::Alive,
            1 => PingStatus::Dead,
            2 => PingStatus::Stuck,
            3 => PingStatus::NoProcessRef,
            4 => PingStatus::NoWatcher,
            _ => return None,
        })
    }

    /// Whether the forker still holds a live process for the isolate.
    pub const fn is_running(self) -> bool {
        matches!(self, PingStatus::Alive | PingStatus::Stuck)
    }
}

impl From<PingStatus> for i64 {
    fn from(status: PingStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i64> for PingStatus {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        PingStatus::from_code(code).ok_or_else(|| format!("unknown ping status code {code}"))
    }
}

impl std::fmt::Display for PingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PingStatus::Alive => "alive",
            PingStatus::Dead => "dead",
            PingStatus::Stuck => "stuck",
            PingStatus::NoProcessRef => "no_process_ref",
            PingStatus::NoWatcher => "no_watcher",
        };
        write!(f, "{}", s)
    }
}
