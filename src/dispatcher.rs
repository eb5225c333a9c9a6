// Completion dispatcher module
// Hands finished task results from worker threads back to the owner thread

use crate::error::TaskError;
use crate::result::TaskResult;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Identifies one bound task within a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Which callback a completion is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// Message sent from a worker to the owner
struct Completion {
    id: TaskId,
    outcome: Outcome,
    result: Box<dyn Any + Send>,
}

/// What the owner hands to a task's callbacks
enum Delivery {
    /// A result sent by the task's worker
    Completed(Outcome, Box<dyn Any + Send>),
    /// A failure decided on the owner side, without the worker
    Failed(TaskError),
}

/// Owner-side callback pair, type-erased over the payload
type Callbacks = Box<dyn FnOnce(Delivery)>;

/// Owner side of the hand-off.
///
/// Lives on the owner thread and cannot be sent elsewhere, so callbacks
/// registered here (which need not be `Send`) only ever run on that thread.
/// The owner drains it from its own loop with [`Dispatcher::dispatch_pending`]
/// or [`Dispatcher::run_until_idle`].
pub struct Dispatcher {
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    callbacks: RefCell<HashMap<TaskId, Callbacks>>,
    next_id: Cell<u64>,
    owner: ThreadId,
    // Rc makes the dispatcher !Send and !Sync
    _not_send: PhantomData<Rc<()>>,
}

impl Dispatcher {
    /// Create a dispatcher owned by the calling thread
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            callbacks: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
            owner: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    /// Thread the callbacks run on
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Number of bound tasks that have not had a callback run yet
    pub fn pending(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// Register a success and a failure callback and get the worker-side
    /// signal that will trigger exactly one of them.
    pub fn bind<T, S, F>(&self, on_success: S, on_failure: F) -> Signal<T>
    where
        T: Send + 'static,
        S: FnOnce(TaskResult<T>) + 'static,
        F: FnOnce(TaskResult<T>) + 'static,
    {
        let id = TaskId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);

        let callbacks: Callbacks = Box::new(move |delivery| match delivery {
            Delivery::Completed(outcome, result) => match result.downcast::<TaskResult<T>>() {
                Ok(result) => match outcome {
                    Outcome::Success => on_success(*result),
                    Outcome::Failure => on_failure(*result),
                },
                Err(_) => {
                    error!("{}: completion carried an unexpected result type", id);
                    on_failure(TaskResult::failure(TaskError::Rejected(
                        "mismatched result type".to_string(),
                    )));
                }
            },
            Delivery::Failed(err) => on_failure(TaskResult::failure(err)),
        });
        self.callbacks.borrow_mut().insert(id, callbacks);

        Signal {
            id,
            tx: Some(self.tx.clone()),
            _payload: PhantomData,
        }
    }

    /// Fail the task `id` right away with [`TaskError::Cancelled`].
    ///
    /// Runs its failure callback now, on the owner thread, whether or not a
    /// worker has picked the task up. Whatever the worker reports later is
    /// discarded. Returns `false` if the task had already reported.
    pub fn cancel(&self, id: TaskId) -> bool {
        let callbacks = self.callbacks.borrow_mut().remove(&id);
        match callbacks {
            Some(callbacks) => {
                debug!("{}: cancelled by owner", id);
                callbacks(Delivery::Failed(TaskError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Run callbacks for every completion already received, without blocking.
    ///
    /// Returns the number of callbacks run. Meant to be called once per tick
    /// of the owner's event loop.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.rx.try_recv() {
            if self.deliver(completion) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Block until every bound task has reported, running callbacks as
    /// completions arrive.
    ///
    /// With a deadline, stops waiting once it passes. Returns `true` if
    /// nothing is left pending.
    pub fn run_until_idle(&self, deadline: Option<Instant>) -> bool {
        while self.pending() > 0 {
            let completion = match deadline {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(completion) => completion,
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                // We hold a sender, so this only errors if that invariant breaks
                None => match self.rx.recv() {
                    Ok(completion) => completion,
                    Err(_) => break,
                },
            };
            self.deliver(completion);
        }
        self.pending() == 0
    }

    fn deliver(&self, completion: Completion) -> bool {
        debug_assert_eq!(thread::current().id(), self.owner);

        // Release the borrow before the callback runs: it may bind new tasks
        let callbacks = self.callbacks.borrow_mut().remove(&completion.id);
        match callbacks {
            Some(callbacks) => {
                debug!("{}: delivering {:?}", completion.id, completion.outcome);
                callbacks(Delivery::Completed(completion.outcome, completion.result));
                true
            }
            None => {
                // Normal after Dispatcher::cancel
                debug!("{}: completion for unknown or finished task", completion.id);
                false
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker side of the hand-off for one task.
///
/// Firing consumes the signal, so a task can report at most once. A signal
/// dropped without firing reports [`TaskError::Abandoned`], so a task can
/// never end without its owner hearing about it.
pub struct Signal<T: Send + 'static> {
    id: TaskId,
    tx: Option<Sender<Completion>>,
    _payload: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Signal<T> {
    /// Id of the task this signal belongs to
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Deliver `result` to the owner's success callback
    pub fn success(mut self, result: TaskResult<T>) {
        self.send(Outcome::Success, result);
    }

    /// Deliver `result` to the owner's failure callback
    pub fn failure(mut self, result: TaskResult<T>) {
        self.send(Outcome::Failure, result);
    }

    fn send(&mut self, outcome: Outcome, result: TaskResult<T>) {
        if let Some(tx) = self.tx.take() {
            let completion = Completion {
                id: self.id,
                outcome,
                result: Box::new(result),
            };
            // The owner may already be gone; nobody is left to tell
            if tx.send(completion).is_err() {
                debug!("{}: owner dropped before completion", self.id);
            }
        }
    }
}

impl<T: Send + 'static> Drop for Signal<T> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.send(Outcome::Failure, TaskResult::failure(TaskError::Abandoned));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("fired", &self.tx.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records which callback ran and with what
    fn spies<T: 'static>() -> (
        Rc<RefCell<Vec<(&'static str, TaskResult<T>)>>>,
        impl FnOnce(TaskResult<T>),
        impl FnOnce(TaskResult<T>),
    ) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let ok = Rc::clone(&calls);
        let fail = Rc::clone(&calls);
        (
            calls,
            move |r| ok.borrow_mut().push(("success", r)),
            move |r| fail.borrow_mut().push(("failure", r)),
        )
    }

    #[test]
    fn test_success_runs_on_owner_thread() {
        let dispatcher = Dispatcher::new();
        let owner = thread::current().id();
        let seen = Rc::new(Cell::new(None));
        let seen_cb = Rc::clone(&seen);

        let signal = dispatcher.bind(
            move |r: TaskResult<u32>| seen_cb.set(Some((thread::current().id(), r.into_payload()))),
            |_| panic!("failure callback must not run"),
        );

        let worker = thread::spawn(move || {
            signal.success(TaskResult::success(5));
            thread::current().id()
        })
        .join()
        .unwrap();

        assert!(dispatcher.run_until_idle(None));
        let (thread_id, payload) = seen.take().unwrap();
        assert_eq!(thread_id, owner);
        assert_ne!(thread_id, worker);
        assert_eq!(payload, Some(5));
    }

    #[test]
    fn test_nothing_delivered_until_owner_drains() {
        let dispatcher = Dispatcher::new();
        let (calls, ok, fail) = spies::<u32>();
        let signal = dispatcher.bind(ok, fail);

        signal.failure(TaskResult::failure(TaskError::Cancelled));
        assert!(calls.borrow().is_empty());
        assert_eq!(dispatcher.pending(), 1);

        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].0, "failure");
    }

    #[test]
    fn test_dropped_signal_reports_failure() {
        let dispatcher = Dispatcher::new();
        let (calls, ok, fail) = spies::<String>();
        let signal = dispatcher.bind(ok, fail);

        thread::spawn(move || drop(signal)).join().unwrap();

        assert!(dispatcher.run_until_idle(None));
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "failure");
        assert!(matches!(calls[0].1.error(), Some(TaskError::Abandoned)));
    }

    #[test]
    fn test_deadline_stops_waiting() {
        let dispatcher = Dispatcher::new();
        let (calls, ok, fail) = spies::<()>();
        let signal = dispatcher.bind(ok, fail);

        let idle = dispatcher.run_until_idle(Some(Instant::now() + Duration::from_millis(20)));
        assert!(!idle);
        assert!(calls.borrow().is_empty());

        signal.success(TaskResult::success(()));
        assert!(dispatcher.run_until_idle(None));
        assert_eq!(calls.borrow()[0].0, "success");
    }

    #[test]
    fn test_callback_can_bind_more_work() {
        let dispatcher = Rc::new(Dispatcher::new());
        let follow_up = Rc::new(RefCell::new(None));

        let inner_dispatcher = Rc::clone(&dispatcher);
        let inner_slot = Rc::clone(&follow_up);
        let signal = dispatcher.bind(
            move |_: TaskResult<()>| {
                let next = inner_dispatcher.bind(|_: TaskResult<()>| {}, |_| {});
                *inner_slot.borrow_mut() = Some(next);
            },
            |_| {},
        );

        signal.success(TaskResult::success(()));
        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(dispatcher.pending(), 1);

        let next = follow_up.borrow_mut().take().unwrap();
        next.success(TaskResult::success(()));
        assert!(dispatcher.run_until_idle(None));
    }

    #[test]
    fn test_cancel_fails_immediately_and_drops_late_result() {
        let dispatcher = Dispatcher::new();
        let (calls, ok, fail) = spies::<u32>();
        let signal = dispatcher.bind(ok, fail);

        assert!(dispatcher.cancel(signal.id()));
        assert_eq!(dispatcher.pending(), 0);
        {
            let calls = calls.borrow();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, "failure");
            assert!(matches!(calls[0].1.error(), Some(TaskError::Cancelled)));
        }

        let id = signal.id();
        signal.success(TaskResult::success(9));
        assert_eq!(dispatcher.dispatch_pending(), 0);
        assert_eq!(calls.borrow().len(), 1);
        assert!(!dispatcher.cancel(id));
    }

    #[test]
    fn test_ids_are_distinct() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.bind(|_: TaskResult<()>| {}, |_| {});
        let b = dispatcher.bind(|_: TaskResult<()>| {}, |_| {});
        assert_ne!(a.id(), b.id());
        a.success(TaskResult::success(()));
        b.success(TaskResult::success(()));
        assert_eq!(dispatcher.dispatch_pending(), 2);
    }
}
