// charsense/src/engine/dispatcher.rs
//
// Schedules detection tasks.
//
//   Sync   — runs inline on the caller's context; returns the outcome.
//   Async  — copies the input, hands the copy to one pool worker and returns
//            immediately. The worker sends the outcome back over the
//            completion channel; the home context (whoever owns this
//            Dispatcher) delivers it to the task's handler via
//            next_completion / drain / try_deliver.
//
// Completions arrive in completion order, not submission order. Handlers stay
// on the home side (keyed by TaskId) and never cross threads; only the staged
// bytes travel to the worker, and they are released when the job finishes on
// every path.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::detector::{Detector, DetectorId};
use crate::error::DetectError;
use crate::events::{DetectionOutcome, ResultShape};
use crate::task::{Execution, OnComplete, Task, TaskId};
use crate::workers::{panic_reason, Ticket, WorkerPool};

#[derive(Debug)]
pub enum Dispatched {
    Completed(DetectionOutcome),
    Queued(TaskId),
}

struct Completion {
    id:      TaskId,
    outcome: DetectionOutcome,
}

struct Pending {
    on_complete: OnComplete,
    ticket:      Ticket,
    detector:    DetectorId,
}

// ── Staged input ──────────────────────────────────────────────────────────────

/// Owned copy of an async task's input. Dropping it releases the buffer.
struct StagedInput {
    task:  TaskId,
    bytes: Vec<u8>,
}

impl StagedInput {
    /// Copies `input`, refusing more than `limit` bytes.
    fn copy_from(task: TaskId, input: &[u8], limit: usize) -> Result<Self, DetectError> {
        if input.len() > limit {
            return Err(DetectError::Resource(format!(
                "staging {} input bytes exceeds limit of {}",
                input.len(),
                limit
            )));
        }
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(input.len()).map_err(|e| {
            DetectError::Resource(format!("staging {} input bytes: {}", input.len(), e))
        })?;
        bytes.extend_from_slice(input);
        Ok(Self { task, bytes })
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        trace!(task = %self.task, len = self.bytes.len(), "staged input released");
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct Dispatcher {
    pool:          WorkerPool,
    tx:            mpsc::UnboundedSender<Completion>,
    rx:            mpsc::UnboundedReceiver<Completion>,
    pending:       HashMap<TaskId, Pending>,
    staging_limit: usize,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { pool, tx, rx, pending: HashMap::new(), staging_limit: usize::MAX }
    }

    #[cfg(test)]
    pub(crate) fn with_staging_limit(mut self, limit: usize) -> Self {
        self.staging_limit = limit;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Async tasks whose completion has not been delivered yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn dispatch(&mut self, detector: &Detector, task: Task<'_>) -> Dispatched {
        let Task { id, input, shape, exec } = task;
        match exec {
            Execution::Sync => {
                debug!(task = %id, detector = %detector.id(), len = input.len(), "sync task");
                Dispatched::Completed(run_inline(detector, input, shape))
            }
            Execution::Async(on_complete) => {
                self.enqueue(detector, id, input, shape, on_complete);
                Dispatched::Queued(id)
            }
        }
    }

    /// Blocks the calling context until detection finishes.
    pub fn detect_sync(&self, detector: &Detector, bytes: &[u8], shape: ResultShape) -> DetectionOutcome {
        run_inline(detector, bytes, shape)
    }

    /// Returns right after enqueueing; `on_complete` runs later on the home context.
    pub fn detect_async<F>(&mut self, detector: &Detector, bytes: &[u8], shape: ResultShape, on_complete: F) -> TaskId
    where
        F: FnOnce(TaskId, DetectionOutcome) + 'static,
    {
        let id = TaskId::next();
        self.enqueue(detector, id, bytes, shape, Box::new(on_complete));
        id
    }

    fn enqueue(&mut self, detector: &Detector, id: TaskId, input: &[u8], shape: ResultShape, on_complete: OnComplete) {
        let ticket  = Ticket::new();
        let pending = Pending { on_complete, ticket: ticket.clone(), detector: detector.id() };
        self.pending.insert(id, pending);

        let staged = match StagedInput::copy_from(id, input, self.staging_limit) {
            Ok(staged) => staged,
            Err(e) => {
                // never reaches a worker, so nothing may cancel it either
                ticket.claim();
                warn!(task = %id, "could not stage input: {}", e);
                let _ = self.tx.send(Completion { id, outcome: DetectionOutcome::Failure(e) });
                return;
            }
        };

        debug!(task = %id, detector = %detector.id(), len = input.len(), "async task queued");

        let detector = detector.clone();
        let tx = self.tx.clone();
        self.pool.execute(
            ticket,
            move || {
                let outcome = detector.detect(&staged.bytes, shape);
                drop(staged);
                outcome
            },
            move |result| {
                let outcome = result.unwrap_or_else(DetectionOutcome::Failure);
                let _ = tx.send(Completion { id, outcome });
            },
        );
    }

    /// Best-effort removal of a task no worker has claimed yet. On success the
    /// handler runs immediately with `Failure(Cancelled)`.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let claimed = match self.pending.get(&id) {
            Some(p) => !self.pool.cancel(&p.ticket),
            None    => return false,
        };
        if claimed {
            return false;
        }
        if let Some(p) = self.pending.remove(&id) {
            debug!(task = %id, detector = %p.detector, "task cancelled while queued");
            (p.on_complete)(id, DetectionOutcome::Failure(DetectError::Cancelled));
        }
        true
    }

    /// Wait for the next completion and run its handler here. `None` when
    /// nothing is pending.
    pub async fn next_completion(&mut self) -> Option<TaskId> {
        while !self.pending.is_empty() {
            // self.tx keeps the channel open, so recv only returns None if that changes
            let completion = self.rx.recv().await?;
            if let Some(id) = self.complete(completion) {
                return Some(id);
            }
        }
        None
    }

    /// Deliver completions until nothing is pending. Returns how many ran.
    pub async fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while self.next_completion().await.is_some() {
            delivered += 1;
        }
        delivered
    }

    /// Deliver whatever has already completed, without waiting.
    pub fn try_deliver(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.rx.try_recv() {
            if self.complete(completion).is_some() {
                delivered += 1;
            }
        }
        delivered
    }

    fn complete(&mut self, completion: Completion) -> Option<TaskId> {
        let Completion { id, outcome } = completion;
        let Some(p) = self.pending.remove(&id) else {
            // settled earlier by cancel()
            debug!(task = %id, "dropping completion for settled task");
            return None;
        };
        debug!(task = %id, detector = %p.detector, status = outcome.status(), "task completed");
        (p.on_complete)(id, outcome);
        Some(id)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pool", &self.pool)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Sync execution. A panicking oracle is reported, not propagated.
fn run_inline(detector: &Detector, bytes: &[u8], shape: ResultShape) -> DetectionOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(bytes, shape))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = panic_reason(payload);
            warn!(detector = %detector.id(), "detection panicked: {}", reason);
            DetectionOutcome::Failure(DetectError::WorkerFault(reason))
        }
    }
}
