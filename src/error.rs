// Task error module
// Structured failure reasons carried inside a failed TaskResult

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Non-success status, request failure or local read failure
    Transport,
    /// Anything that went wrong inside the task body itself
    Runtime,
    /// Bytes were obtained but are not a usable image
    Decode,
    /// The task never ran
    Cancelled,
}

/// Reason a background task failed
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("task produced no payload")]
    MissingPayload,

    #[error("decoded image is empty")]
    EmptyImage,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task result rejected: {0}")]
    Rejected(String),

    #[error("task cancelled before it ran")]
    Cancelled,

    #[error("task was dropped without reporting a result")]
    Abandoned,
}

impl TaskError {
    /// Map this error onto the transport / runtime / decode taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Status { .. } | TaskError::Request { .. } | TaskError::Io { .. } => {
                ErrorKind::Transport
            }
            TaskError::Decode(_) | TaskError::MissingPayload | TaskError::EmptyImage => {
                ErrorKind::Decode
            }
            TaskError::Panicked(_) | TaskError::Rejected(_) | TaskError::Abandoned => {
                ErrorKind::Runtime
            }
            TaskError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Build a `Panicked` error from a payload caught by `catch_unwind`
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}
