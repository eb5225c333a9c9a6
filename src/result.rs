// Task result module
// Value handed from a finished background task back to its owner

use crate::error::TaskError;

/// Outcome of one background task: a payload, or the reason it failed.
///
/// Written once on the worker, then moved to the owner and only read there.
/// A failed result never exposes its payload, even when the task stored one
/// before its result was rejected.
#[derive(Debug)]
pub struct TaskResult<T> {
    payload: Option<T>,
    error: Option<TaskError>,
}

impl<T> TaskResult<T> {
    /// A successful result holding `payload`
    pub fn success(payload: T) -> Self {
        Self {
            payload: Some(payload),
            error: None,
        }
    }

    /// A failed result with no payload
    pub fn failure(error: TaskError) -> Self {
        Self {
            payload: None,
            error: Some(error),
        }
    }

    /// Did this task fail
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// The payload, or `None` if the task failed or produced nothing
    pub fn payload(&self) -> Option<&T> {
        if self.failed() {
            None
        } else {
            self.payload.as_ref()
        }
    }

    /// Take the payload out, with the same rules as [`TaskResult::payload`]
    pub fn into_payload(self) -> Option<T> {
        if self.failed() {
            None
        } else {
            self.payload
        }
    }

    /// The payload, or the type's empty value
    pub fn payload_or_default(&self) -> T
    where
        T: Clone + Default,
    {
        self.payload().cloned().unwrap_or_default()
    }

    /// Why the task failed
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Stored payload regardless of failure state, for task-side validation
    pub(crate) fn raw_payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Mark the result failed. The first recorded error wins.
    pub(crate) fn reject(&mut self, error: TaskError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl<T> From<Result<T, TaskError>> for TaskResult<T> {
    fn from(outcome: Result<T, TaskError>) -> Self {
        match outcome {
            Ok(payload) => TaskResult::success(payload),
            Err(error) => TaskResult::failure(error),
        }
    }
}
