// Background task module
// Two-phase task contract (run, then finished) and its submission to a pool

use crate::dispatcher::{Dispatcher, Signal, TaskId};
use crate::error::TaskError;
use crate::pool::WorkerPool;
use crate::result::TaskResult;
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A unit of blocking work executed once on a pool worker.
///
/// `run` does the work; `finished` runs right after it on the same worker and
/// decides which owner callback fires. Errors returned from `run` and panics
/// raised inside it are both turned into a failed [`TaskResult`].
pub trait BackgroundTask: Send + 'static {
    /// Payload produced on success
    type Output: Send + 'static;

    /// Short name used in log messages
    fn name(&self) -> &str {
        "task"
    }

    /// The blocking operation
    fn run(&mut self) -> Result<Self::Output, TaskError>;

    /// Whether `result` counts as a failure. Tasks may widen this.
    fn had_error(&self, result: &TaskResult<Self::Output>) -> bool {
        result.failed()
    }

    /// Report `result` through `signal`
    fn finished(&self, mut result: TaskResult<Self::Output>, signal: Signal<Self::Output>) {
        if self.had_error(&result) {
            result.reject(TaskError::Rejected(format!(
                "{} rejected its result",
                self.name()
            )));
            signal.failure(result);
        } else {
            signal.success(result);
        }
    }
}

/// Cooperative cancellation flag shared between a handle and its task
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owner's handle on a submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    token: CancelToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Ask the task not to start.
    ///
    /// A task still waiting in the queue is skipped when a worker reaches it.
    /// A task already running is left to finish. To have the owner's failure
    /// callback run now rather than when a worker gets to it, also call
    /// [`Dispatcher::cancel`] with this handle's id.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Bind `task` to the owner's callbacks and queue it on `pool`.
///
/// Returns immediately. Exactly one of the callbacks runs later, on the
/// thread that owns `dispatcher`, the next time it is drained.
pub fn spawn<T, S, F>(
    pool: &WorkerPool,
    dispatcher: &Dispatcher,
    task: T,
    on_success: S,
    on_failure: F,
) -> TaskHandle
where
    T: BackgroundTask,
    S: FnOnce(TaskResult<T::Output>) + 'static,
    F: FnOnce(TaskResult<T::Output>) + 'static,
{
    let signal = dispatcher.bind(on_success, on_failure);
    let handle = TaskHandle {
        id: signal.id(),
        token: CancelToken::new(),
    };

    if pool.is_closed() {
        warn!("{}: pool is shut down, not running {}", handle.id, task.name());
        signal.failure(TaskResult::failure(TaskError::Cancelled));
        return handle;
    }

    debug!("{}: submitting {}", handle.id, task.name());
    let token = handle.token.clone();
    // A job refused by a pool closing concurrently drops its signal, which
    // still reports a failure to the owner
    pool.execute(move || execute(task, signal, token));
    handle
}

/// Worker-side body of one task: run, contain failures, then finish
fn execute<T: BackgroundTask>(mut task: T, signal: Signal<T::Output>, token: CancelToken) {
    let id = signal.id();
    let name = task.name().to_string();

    if token.is_cancelled() {
        debug!("{}: {} cancelled before start", id, name);
        signal.failure(TaskResult::failure(TaskError::Cancelled));
        return;
    }

    debug!("{}: running {}", id, name);
    let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(outcome) => TaskResult::from(outcome),
        Err(payload) => {
            let err = TaskError::from_panic(payload);
            error!("{}: {} {}", id, name, err);
            TaskResult::failure(err)
        }
    };
    if let Some(err) = result.error() {
        warn!("{}: {} failed: {}", id, name, err);
    }

    // If finished panics before firing, the signal is dropped during unwind
    // and reports Abandoned
    let finish = panic::catch_unwind(AssertUnwindSafe(move || task.finished(result, signal)));
    if let Err(payload) = finish {
        error!("{}: {} finish step: {}", id, name, TaskError::from_panic(payload));
    }
}

/// Payload check used by [`FnTask`]
type Check<T> = Box<dyn Fn(&T) -> Result<(), TaskError> + Send>;

/// Task built from closures: one for the work, one optional payload check
pub struct FnTask<T> {
    name: String,
    work: Option<Box<dyn FnOnce() -> Result<T, TaskError> + Send>>,
    check: Option<Check<T>>,
}

impl<T: Send + 'static> FnTask<T> {
    pub fn new<W>(name: impl Into<String>, work: W) -> Self
    where
        W: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Some(Box::new(work)),
            check: None,
        }
    }

    /// Treat a payload that fails `check` as a failure
    pub fn with_check<C>(mut self, check: C) -> Self
    where
        C: Fn(&T) -> Result<(), TaskError> + Send + 'static,
    {
        self.check = Some(Box::new(check));
        self
    }

    fn check_payload(&self, result: &TaskResult<T>) -> Result<(), TaskError> {
        match (&self.check, result.raw_payload()) {
            (Some(check), Some(payload)) => check(payload),
            _ => Ok(()),
        }
    }
}

impl<T: Send + 'static> BackgroundTask for FnTask<T> {
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<T, TaskError> {
        match self.work.take() {
            Some(work) => work(),
            None => Err(TaskError::Rejected(format!("{} already ran", self.name))),
        }
    }

    fn had_error(&self, result: &TaskResult<T>) -> bool {
        result.failed() || self.check_payload(result).is_err()
    }

    fn finished(&self, mut result: TaskResult<T>, signal: Signal<T>) {
        if let Err(err) = self.check_payload(&result) {
            result.reject(err);
        }
        if self.had_error(&result) {
            signal.failure(result);
        } else {
            signal.success(result);
        }
    }
}
