// Worker pool module
// Bounded set of worker threads that run task bodies off the owner thread

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use threadpool::ThreadPool;

/// Worker count used by the process-wide pool
pub const DEFAULT_MAX_WORKERS: usize = 30;

/// Name given to worker threads
const WORKER_THREAD_NAME: &str = "rspin-worker";

/// Process-wide pool, created on first use
static SHARED_POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Bounded worker pool.
///
/// At most `max_workers` jobs run at once; the rest wait in a FIFO queue.
/// The pool itself never fails: a panicking job loses its worker thread,
/// which the underlying pool replaces.
pub struct WorkerPool {
    inner: Mutex<ThreadPool>,
    max_workers: usize,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with the given ceiling (at least one worker)
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        debug!("Creating worker pool with {} workers", max_workers);
        Self {
            inner: Mutex::new(ThreadPool::with_name(
                WORKER_THREAD_NAME.to_string(),
                max_workers,
            )),
            max_workers,
            closed: AtomicBool::new(false),
        }
    }

    /// The process-wide pool, created with [`DEFAULT_MAX_WORKERS`] on first call.
    ///
    /// Concurrent first calls are safe: exactly one pool is ever built.
    pub fn shared() -> &'static WorkerPool {
        SHARED_POOL.get_or_init(|| WorkerPool::new(DEFAULT_MAX_WORKERS))
    }

    /// Install the process-wide pool with a custom ceiling.
    ///
    /// Returns `false` if the shared pool already exists, in which case the
    /// existing one is kept.
    pub fn init_shared(max_workers: usize) -> bool {
        let mut installed = false;
        SHARED_POOL.get_or_init(|| {
            installed = true;
            WorkerPool::new(max_workers)
        });
        installed
    }

    /// Queue `job` for execution and return immediately.
    ///
    /// Returns `false` (dropping the job) once the pool has been shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return false;
        }
        self.inner.lock().execute(job);
        true
    }

    /// Maximum number of jobs that run at once
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of jobs currently running
    pub fn active_count(&self) -> usize {
        self.inner.lock().active_count()
    }

    /// Number of jobs waiting for a worker
    pub fn queued_count(&self) -> usize {
        self.inner.lock().queued_count()
    }

    /// Whether [`WorkerPool::shutdown`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Block until every queued and running job has finished
    pub fn join(&self) {
        // Clone the handle so submissions are not blocked while we wait
        let pool = self.inner.lock().clone();
        pool.join();
    }

    /// Refuse new work, then wait for what is already queued
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                "Shutting down worker pool ({} running, {} queued)",
                self.active_count(),
                self.queued_count()
            );
        }
        self.join();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_workers_clamped() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.max_workers(), 1);
    }

    #[test]
    fn test_concurrency_ceiling_respected() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            assert!(pool.execute(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            pool.execute(move || {
                tx.send(i).ok();
            });
        }
        drop(tx);
        pool.join();
        let order: Vec<i32> = rx.iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_panicking_job_does_not_kill_pool() {
        let pool = WorkerPool::new(1);
        pool.execute(|| panic!("job failure"));
        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            tx.send(1).ok();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        assert!(pool.is_closed());
        assert!(!pool.execute(|| {}));
    }

    #[test]
    fn test_shared_pool_created_once() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| WorkerPool::shared() as *const WorkerPool as usize))
            .collect();
        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert!(!WorkerPool::init_shared(4));
    }
}
