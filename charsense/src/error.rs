// charsense/src/error.rs
//
// Error taxonomy. Every failure a caller can observe is one of these values,
// delivered through the normal result channel (sync return value or async
// completion payload). Nothing here is ever retried automatically.

use serde::Serialize;
use thiserror::Error;

// ── Oracle error codes ────────────────────────────────────────────────────────

pub const ERR_INVALID_CONFIG:   i32 = 1;
pub const ERR_UNKNOWN_LABEL:    i32 = 2;
pub const ERR_INVALID_TLD:      i32 = 3;
pub const ERR_TARGET_TOO_LARGE: i32 = 10;

// ── Oracle-side errors ────────────────────────────────────────────────────────

/// The signature oracle could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("oracle init failed (code {code}): {message}")]
pub struct OracleInitError {
    pub code:    i32,
    pub message: String,
}

impl OracleInitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// The oracle rejected an analysis target or failed while scoring it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("oracle error {code}: {message}")]
pub struct OracleError {
    pub code:    i32,
    pub message: String,
}

impl OracleError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

// ── Detection errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OracleInit,
    InvalidTask,
    Oracle,
    Resource,
    DetectorClosed,
    WorkerFault,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectError {
    #[error("signature oracle failed to initialize (code {code})")]
    OracleInit { code: i32 },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("oracle error {code}: {message}")]
    Oracle { code: i32, message: String },

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("detector is closed")]
    DetectorClosed,

    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("task cancelled before a worker claimed it")]
    Cancelled,
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OracleInit { .. } => ErrorKind::OracleInit,
            Self::InvalidTask(_)    => ErrorKind::InvalidTask,
            Self::Oracle { .. }     => ErrorKind::Oracle,
            Self::Resource(_)       => ErrorKind::Resource,
            Self::DetectorClosed    => ErrorKind::DetectorClosed,
            Self::WorkerFault(_)    => ErrorKind::WorkerFault,
            Self::Cancelled         => ErrorKind::Cancelled,
        }
    }
}

impl From<OracleError> for DetectError {
    fn from(e: OracleError) -> Self {
        Self::Oracle { code: e.code, message: e.message }
    }
}

impl From<OracleInitError> for DetectError {
    fn from(e: OracleInitError) -> Self {
        Self::OracleInit { code: e.code }
    }
}

// ── Pool construction ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no tokio runtime is running on this thread")]
    NoRuntime,

    #[error("a worker pool needs at least one worker")]
    ZeroWorkers,
}
