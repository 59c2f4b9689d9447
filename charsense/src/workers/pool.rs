// charsense/src/workers/pool.rs
//
// Bounded worker pool for async detections.
//
// Shape:
//   - `workers` semaphore permits cap how many jobs score at once; each job
//     runs on tokio's blocking thread pool (detection is CPU work).
//   - `max_queued` caps how many jobs may wait for a permit. Past that bound
//     a job is rejected and reported as a ResourceError instead of queueing
//     without limit.
//   - Every job carries a Ticket. Exactly one of "worker claims it" or
//     "caller cancels it" wins. A job holds its queue slot exactly while its
//     ticket is Queued, so cancelling frees the slot at once; the cancelled
//     job is skipped when its turn comes.
//
// Exactly-once: a submitted job either runs and reports, reports a fault or
// shutdown, or is skipped because the caller already settled it by cancelling.
// If the runtime drops a job's future before it reports, its Delivery guard
// reports the shutdown instead.
//
// Handles are cheap clones; all clones share the same permits and counters.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::error::{DetectError, PoolError};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers:    usize,
    pub max_queued: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers:    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_queued: 4_096,
        }
    }
}

// ── Ticket ────────────────────────────────────────────────────────────────────

const QUEUED:    u8 = 0;
const RUNNING:   u8 = 1;
const DONE:      u8 = 2;
const CANCELLED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState { Queued, Running, Done, Cancelled }

#[derive(Debug, Clone, Default)]
pub struct Ticket(Arc<AtomicU8>);

impl Ticket {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(QUEUED)))
    }

    /// Succeeds only while no worker has claimed the job. Submitted jobs are
    /// cancelled through `WorkerPool::cancel` so their queue slot is released.
    pub(crate) fn cancel(&self) -> bool {
        self.0.compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn claim(&self) -> bool {
        self.0.compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn finish(&self) {
        self.0.store(DONE, Ordering::Release);
    }

    pub fn state(&self) -> TicketState {
        match self.0.load(Ordering::Acquire) {
            QUEUED    => TicketState::Queued,
            RUNNING   => TicketState::Running,
            CANCELLED => TicketState::Cancelled,
            _         => TicketState::Done,
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected:  AtomicU64,
    completed: AtomicU64,
    faulted:   AtomicU64,
    cancelled: AtomicU64,
    queued:    AtomicUsize,
    running:   AtomicUsize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub rejected:  u64,
    pub completed: u64,
    pub faulted:   u64,
    pub cancelled: u64,
    pub queued:    usize,
    pub running:   usize,
}

impl PoolStats {
    /// Jobs that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.rejected + self.completed + self.faulted + self.cancelled
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

struct PoolInner {
    handle:     Handle,
    permits:    Arc<Semaphore>,
    workers:    usize,
    max_queued: usize,
    counters:   Counters,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Pool bound to the tokio runtime running on this thread.
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let handle = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        Self::with_handle(handle, config)
    }

    pub fn with_handle(handle: Handle, config: &PoolConfig) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        debug!(workers = config.workers, max_queued = config.max_queued, "worker pool started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                handle,
                permits:    Arc::new(Semaphore::new(config.workers)),
                workers:    config.workers,
                max_queued: config.max_queued,
                counters:   Counters::default(),
            }),
        })
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Stop accepting work. Running jobs finish; queued ones report shutdown.
    pub fn shutdown(&self) {
        if !self.inner.permits.is_closed() {
            self.inner.permits.close();
            debug!("worker pool shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.permits.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected:  c.rejected.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            faulted:   c.faulted.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            queued:    c.queued.load(Ordering::Relaxed),
            running:   c.running.load(Ordering::Relaxed),
        }
    }

    /// Best-effort removal of a job no worker has claimed yet. Its queue slot
    /// is released immediately and `deliver` will never be called for it.
    pub fn cancel(&self, ticket: &Ticket) -> bool {
        if !ticket.cancel() {
            return false;
        }
        let c = &self.inner.counters;
        c.queued.fetch_sub(1, Ordering::AcqRel);
        c.cancelled.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Queue `job` for one worker. `deliver` is called exactly once unless
    /// the ticket was cancelled first.
    pub fn execute<F, T, D>(&self, ticket: Ticket, job: F, deliver: D)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
        D: FnOnce(Result<T, DetectError>) + Send + 'static,
    {
        let c = &self.inner.counters;
        c.submitted.fetch_add(1, Ordering::Relaxed);

        if self.is_shut_down() {
            c.rejected.fetch_add(1, Ordering::Relaxed);
            deliver(Err(DetectError::Resource("worker pool shut down".into())));
            return;
        }

        if c.queued.fetch_add(1, Ordering::AcqRel) >= self.inner.max_queued {
            c.queued.fetch_sub(1, Ordering::AcqRel);
            c.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(max_queued = self.inner.max_queued, "worker queue full, rejecting job");
            deliver(Err(DetectError::Resource("worker queue full".into())));
            return;
        }

        let delivery = Delivery {
            deliver: Some(deliver),
            ticket:  ticket.clone(),
            inner:   Arc::clone(&self.inner),
            _result: PhantomData,
        };
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            let permit = Arc::clone(&inner.permits).acquire_owned().await;
            let c = &inner.counters;

            // lost to cancel(), which already released the slot
            if !ticket.claim() {
                return;
            }
            c.queued.fetch_sub(1, Ordering::AcqRel);

            let _permit = match permit {
                Ok(p) => p,
                Err(_) => {
                    ticket.finish();
                    c.rejected.fetch_add(1, Ordering::Relaxed);
                    delivery.send(Err(DetectError::Resource("worker pool shut down".into())));
                    return;
                }
            };

            c.running.fetch_add(1, Ordering::AcqRel);
            let result = tokio::task::spawn_blocking(job).await;
            c.running.fetch_sub(1, Ordering::AcqRel);
            ticket.finish();

            match result {
                Ok(value) => {
                    c.completed.fetch_add(1, Ordering::Relaxed);
                    delivery.send(Ok(value));
                }
                Err(e) => {
                    c.faulted.fetch_add(1, Ordering::Relaxed);
                    let reason = fault_reason(e);
                    warn!("worker fault: {}", reason);
                    delivery.send(Err(DetectError::WorkerFault(reason)));
                }
            }
        });
    }
}

// ── Delivery guard ────────────────────────────────────────────────────────────

/// Owns a job's `deliver` callback inside the spawned future. Dropped without
/// having sent (the runtime went away), it reports on the job's behalf.
struct Delivery<T, D>
where
    D: FnOnce(Result<T, DetectError>),
{
    deliver: Option<D>,
    ticket:  Ticket,
    inner:   Arc<PoolInner>,
    _result: PhantomData<fn(T)>,
}

impl<T, D> Delivery<T, D>
where
    D: FnOnce(Result<T, DetectError>),
{
    fn send(mut self, result: Result<T, DetectError>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(result);
        }
    }
}

impl<T, D> Drop for Delivery<T, D>
where
    D: FnOnce(Result<T, DetectError>),
{
    fn drop(&mut self) {
        let Some(deliver) = self.deliver.take() else { return };
        let c = &self.inner.counters;

        let err = if self.ticket.claim() {
            c.queued.fetch_sub(1, Ordering::AcqRel);
            c.rejected.fetch_add(1, Ordering::Relaxed);
            DetectError::Resource("worker pool shut down".into())
        } else if self.ticket.state() == TicketState::Running {
            c.running.fetch_sub(1, Ordering::AcqRel);
            c.faulted.fetch_add(1, Ordering::Relaxed);
            DetectError::WorkerFault("runtime shut down while the job was running".into())
        } else {
            // cancelled; the canceller settled it
            return;
        };

        self.ticket.finish();
        warn!("job abandoned by its runtime: {}", err);
        deliver(Err(err));
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.inner.workers)
            .field("max_queued", &self.inner.max_queued)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn fault_reason(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    super::panic_reason(e.into_panic())
}
