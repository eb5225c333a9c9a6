// rspin-loader - Background image loading core of the rspin viewer
// Loads images on a bounded worker pool and hands them back to the main thread

mod app;
mod cli;

use anyhow::{Context, Result};
use app::AppState;
use log::{info, warn};
use rspin_loader::{
    task, Dispatcher, Fetcher, ImageData, ImageFetchTask, ReqwestClient, SourceFetcher,
    TaskResult, WorkerPool,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = cli::parse_args()?;

    info!(
        "Starting rspin-loader with {} locator(s), {} workers",
        args.locators.len(),
        args.workers
    );

    if !WorkerPool::init_shared(args.workers) {
        warn!("Worker pool already initialized, keeping its worker count");
    }
    let pool = WorkerPool::shared();

    let http = ReqwestClient::new(args.http_timeout).context("Failed to create HTTP client")?;
    let fetcher = match args.root {
        Some(ref root) => SourceFetcher::new(http).with_root(root),
        None => SourceFetcher::new(http),
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);

    // This thread is the owner: every callback below runs here
    let dispatcher = Dispatcher::new();
    let state = Rc::new(RefCell::new(AppState::new()));

    let handles: Vec<_> = args
        .locators
        .iter()
        .map(|locator| {
            let on_success = {
                let state = Rc::clone(&state);
                let locator = locator.clone();
                move |result: TaskResult<ImageData>| state.borrow_mut().image_loaded(&locator, result)
            };
            let on_failure = {
                let state = Rc::clone(&state);
                let locator = locator.clone();
                move |result: TaskResult<ImageData>| state.borrow_mut().load_failed(&locator, result)
            };
            let load = ImageFetchTask::new(locator.clone(), Arc::clone(&fetcher))
                .with_scale(args.scale);
            task::spawn(pool, &dispatcher, load, on_success, on_failure)
        })
        .collect();

    let deadline = args.deadline.map(|d| Instant::now() + d);
    if dispatcher.run_until_idle(deadline) {
        pool.shutdown();
    } else {
        warn!(
            "Deadline reached with {} load(s) outstanding, cancelling",
            dispatcher.pending()
        );
        dispatcher.dispatch_pending();
        // Fails every load still outstanding on this thread; loads still
        // running are abandoned with the process
        for handle in &handles {
            handle.cancel();
            dispatcher.cancel(handle.id());
        }
    }

    let state = state.borrow();
    state.report(args.locators.len())
}
