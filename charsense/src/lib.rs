// charsense/src/lib.rs
//
// charsense — probable character encoding detection for unlabeled bytes.
//
//   Detector    owns one signature oracle; detect() is serialized per detector
//   Dispatcher  runs tasks inline (sync) or on a bounded WorkerPool (async),
//               delivering async outcomes back on the caller's home context
//
// Identification only: bytes are never transcoded.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod oracle;
pub mod task;
pub mod workers;

pub use config::Config;
pub use engine::detector::{Detector, DetectorId};
pub use engine::dispatcher::{Dispatched, Dispatcher};
pub use error::{DetectError, ErrorKind, OracleError, OracleInitError, PoolError};
pub use events::{Detection, DetectionOutcome, Match, Mode, ResultShape};
pub use oracle::{Oracle, OracleConfig, SignatureOracle};
pub use task::{OnComplete, Task, TaskBuilder, TaskId};
pub use workers::{PoolConfig, PoolStats, WorkerPool};
