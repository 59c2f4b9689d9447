// charsense/src/task.rs
//
// One detection request. The shape and mode are fixed when the task is built;
// nothing is decided ad hoc at completion time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DetectError;
use crate::events::{DetectionOutcome, Mode, ResultShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion handler. Runs on the home context, so it doesn't need `Send`.
pub type OnComplete = Box<dyn FnOnce(TaskId, DetectionOutcome)>;

/// How a built task executes. Async always carries its handler.
pub(crate) enum Execution {
    Sync,
    Async(OnComplete),
}

pub struct Task<'a> {
    pub(crate) id:    TaskId,
    pub(crate) input: &'a [u8],
    pub(crate) shape: ResultShape,
    pub(crate) exec:  Execution,
}

impl<'a> Task<'a> {
    pub fn builder(input: &'a [u8]) -> TaskBuilder<'a> {
        TaskBuilder { input, shape: ResultShape::default(), mode: Mode::default(), on_complete: None }
    }

    pub fn id(&self)    -> TaskId      { self.id }
    pub fn input(&self) -> &[u8]       { self.input }
    pub fn shape(&self) -> ResultShape { self.shape }
    pub fn mode(&self) -> Mode {
        match self.exec {
            Execution::Sync     => Mode::Sync,
            Execution::Async(_) => Mode::Async,
        }
    }
}

impl fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("len", &self.input.len())
            .field("shape", &self.shape)
            .field("mode", &self.mode())
            .finish()
    }
}

pub struct TaskBuilder<'a> {
    input:       &'a [u8],
    shape:       ResultShape,
    mode:        Mode,
    on_complete: Option<OnComplete>,
}

impl<'a> TaskBuilder<'a> {
    pub fn shape(mut self, shape: ResultShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TaskId, DetectionOutcome) + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// A handler is required for async tasks and refused for sync ones.
    pub fn build(self) -> Result<Task<'a>, DetectError> {
        let exec = match (self.mode, self.on_complete) {
            (Mode::Sync, None)     => Execution::Sync,
            (Mode::Async, Some(f)) => Execution::Async(f),
            (Mode::Async, None) => {
                return Err(DetectError::InvalidTask("async task requires a completion handler".into()))
            }
            (Mode::Sync, Some(_)) => {
                return Err(DetectError::InvalidTask("sync task cannot take a completion handler".into()))
            }
        };

        Ok(Task { id: TaskId::next(), input: self.input, shape: self.shape, exec })
    }
}
