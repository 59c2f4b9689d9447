// charsense/src/events.rs
//
// Shared value types flowing through charsense: the candidate match, the
// requested result shape and execution mode, and the per-task outcome.

use clap::ValueEnum;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, ErrorKind};

pub const MAX_CONFIDENCE: u8 = 100;

// ── Candidate match ───────────────────────────────────────────────────────────

/// One candidate encoding with the oracle's confidence (0..=100, not a probability).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
    pub encoding:   String,
    pub confidence: u8,
}

impl Match {
    pub fn new(encoding: impl Into<String>, confidence: u8) -> Self {
        Self { encoding: encoding.into(), confidence: confidence.min(MAX_CONFIDENCE) }
    }

    /// Resolve the name as a WHATWG label. UTF-32 names don't resolve.
    pub fn encoding(&self) -> Option<&'static Encoding> {
        Encoding::for_label(self.encoding.as_bytes())
    }

    pub fn is_ascii_compatible(&self) -> bool {
        self.encoding().map(|e| e.is_ascii_compatible()).unwrap_or(false)
    }
}

impl std::fmt::Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.encoding, self.confidence)
    }
}

// ── Request shape / mode ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    #[default]
    NameOnly,
    RankedCandidates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Sync,
    Async,
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    Best(Match),
    /// Highest confidence first, in the oracle's order.
    Ranked(Vec<Match>),
}

impl Detection {
    pub fn best(&self) -> Option<&Match> {
        match self {
            Self::Best(m)   => Some(m),
            Self::Ranked(v) => v.first(),
        }
    }

    pub fn matches(&self) -> &[Match] {
        match self {
            Self::Best(m)   => std::slice::from_ref(m),
            Self::Ranked(v) => v,
        }
    }
}

/// Exactly one of these holds per completed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    Success(Detection),
    /// Valid input that carries no detectable encoding signal. Not an error.
    Empty,
    Failure(DetectError),
}

impl DetectionOutcome {
    pub fn is_success(&self) -> bool { matches!(self, Self::Success(_)) }
    pub fn is_empty(&self)   -> bool { matches!(self, Self::Empty) }
    pub fn is_failure(&self) -> bool { matches!(self, Self::Failure(_)) }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::Success(d) => Some(d),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DetectError> {
        match self {
            Self::Failure(e) => Some(e),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(DetectError::kind)
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Empty      => "empty",
            Self::Failure(_) => "failure",
        }
    }

    /// `Empty` maps to `Ok(None)`; a handler sees either a value or an error, never both.
    pub fn into_result(self) -> Result<Option<Detection>, DetectError> {
        match self {
            Self::Success(d) => Ok(Some(d)),
            Self::Empty      => Ok(None),
            Self::Failure(e) => Err(e),
        }
    }
}

impl From<DetectError> for DetectionOutcome {
    fn from(e: DetectError) -> Self {
        Self::Failure(e)
    }
}
