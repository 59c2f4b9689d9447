// charsense/src/oracle/mod.rs
//
// Signature oracle contract consumed by the Detector.
//
// Two-step protocol, in order, on every detection:
//   1. set_analysis_target(bytes)  — feed the buffer; may fail with OracleError
//   2. best_match() [+ all_matches() for ranked output]
//
// A none / empty answer is not an error: the input carried no detectable
// encoding signal. Oracles are stateful (they hold the last target), so a
// single instance must never be driven from two threads at once.

pub mod markup;
pub mod signature;

use serde::{Deserialize, Serialize};

use crate::events::Match;
use crate::error::OracleError;

pub use signature::SignatureOracle;

pub trait Oracle: Send {
    fn set_analysis_target(&mut self, bytes: &[u8]) -> Result<(), OracleError>;

    fn best_match(&self) -> Option<Match>;

    /// Highest confidence first. May be empty even when `best_match` is not.
    fn all_matches(&self) -> Vec<Match>;
}

pub type BoxedOracle = Box<dyn Oracle>;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub max_input_len:     usize,          // setAnalysisTarget rejects longer buffers
    pub strip_markup:      bool,           // HTML/XML tag filter before scoring
    pub tld_hint:          Option<String>, // e.g. "jp", steers legacy guessing
    pub declared_encoding: Option<String>, // charset label from the transport, if any
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_input_len:     16 * 1024 * 1024,
            strip_markup:      false,
            tld_hint:          None,
            declared_encoding: None,
        }
    }
}
