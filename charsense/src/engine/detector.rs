// charsense/src/engine/detector.rs
//
// Detector — owns exactly one signature oracle for its whole life.
//
// The oracle is stateful (it holds the last analysis target), so every
// setAnalysisTarget → bestMatch [→ allMatches] sequence runs under the
// detector's mutex. Clones of a Detector share the same oracle and the same
// lock, which is what serializes sync calls and pool workers against each other.
//
// Lifetime: the oracle is created in the constructor (construction fails if it
// can't be), released exactly once by close() or by the last handle dropping.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DetectError, OracleInitError};
use crate::events::{Detection, DetectionOutcome, ResultShape};
use crate::oracle::{BoxedOracle, Oracle, OracleConfig, SignatureOracle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectorId(u64);

impl DetectorId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for DetectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Inner {
    id:     DetectorId,
    closed: AtomicBool,
    oracle: Mutex<Option<BoxedOracle>>,
}

#[derive(Clone)]
pub struct Detector {
    inner: Arc<Inner>,
}

impl Detector {
    /// Detector backed by the default signature oracle.
    pub fn new() -> Result<Self, DetectError> {
        Self::with_config(&OracleConfig::default())
    }

    pub fn with_config(config: &OracleConfig) -> Result<Self, DetectError> {
        Self::with_oracle(|| SignatureOracle::new(config))
    }

    /// Build around any oracle. A failing factory means no detector exists.
    pub fn with_oracle<F, O>(make: F) -> Result<Self, DetectError>
    where
        F: FnOnce() -> Result<O, OracleInitError>,
        O: Oracle + 'static,
    {
        let oracle = make().map_err(|e| {
            debug!(code = e.code, "oracle init failed: {}", e.message);
            DetectError::from(e)
        })?;

        let id = DetectorId::next();
        debug!(detector = %id, "detector created");
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                closed: AtomicBool::new(false),
                oracle: Mutex::new(Some(Box::new(oracle))),
            }),
        })
    }

    pub fn id(&self) -> DetectorId {
        self.inner.id
    }

    /// Release the oracle. Idempotent; waits for an in-flight detection to finish.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.oracle.lock().take().is_some() {
            debug!(detector = %self.inner.id, "oracle released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn detect(&self, bytes: &[u8], shape: ResultShape) -> DetectionOutcome {
        if self.is_closed() {
            return DetectionOutcome::Failure(DetectError::DetectorClosed);
        }
        if bytes.is_empty() {
            return DetectionOutcome::Empty;
        }

        let mut guard = self.inner.oracle.lock();
        match guard.as_deref_mut() {
            Some(oracle) => run_detection(oracle, bytes, shape),
            // closed between the flag check and the lock
            None => DetectionOutcome::Failure(DetectError::DetectorClosed),
        }
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The one detection algorithm, shared by the sync and async paths.
pub fn run_detection(oracle: &mut dyn Oracle, bytes: &[u8], shape: ResultShape) -> DetectionOutcome {
    if let Err(e) = oracle.set_analysis_target(bytes) {
        return DetectionOutcome::Failure(e.into());
    }

    let Some(best) = oracle.best_match() else {
        return DetectionOutcome::Empty;
    };

    match shape {
        ResultShape::NameOnly => DetectionOutcome::Success(Detection::Best(best)),
        ResultShape::RankedCandidates => {
            let all = oracle.all_matches();
            let ranked = if all.is_empty() { vec![best] } else { all };
            DetectionOutcome::Success(Detection::Ranked(ranked))
        }
    }
}
