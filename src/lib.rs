//! Background image loading core of the rspin viewer.
//!
//! Blocking work runs on a bounded [`WorkerPool`]; results come back to the
//! owning thread through a [`Dispatcher`], which runs exactly one of the two
//! callbacks registered for each task.
//!
//! ```ignore
//! use rspin_loader::{Dispatcher, ImageFetchTask, ReqwestClient, SourceFetcher, WorkerPool};
//! use std::sync::Arc;
//!
//! let fetcher = Arc::new(SourceFetcher::new(ReqwestClient::new(None)?));
//! let dispatcher = Dispatcher::new();
//! ImageFetchTask::start(
//!     "image/level1.jpg",
//!     fetcher,
//!     WorkerPool::shared(),
//!     &dispatcher,
//!     |result| println!("loaded {:?}", result.payload().map(|i| (i.width, i.height))),
//!     |result| eprintln!("failed: {:?}", result.error()),
//! );
//! dispatcher.run_until_idle(None);
//! ```

pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod image_loader;
pub mod pool;
pub mod result;
pub mod task;

pub use dispatcher::{Dispatcher, Signal, TaskId};
pub use error::{ErrorKind, TaskError};
pub use fetch::{Fetcher, HttpClient, HttpResponse, ReqwestClient, SourceFetcher};
pub use image_loader::{ImageData, ImageFetchTask};
pub use pool::{WorkerPool, DEFAULT_MAX_WORKERS};
pub use result::TaskResult;
pub use task::{spawn, BackgroundTask, CancelToken, FnTask, TaskHandle};
