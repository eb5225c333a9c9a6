// Application state module
// Owner-side state, only ever touched from task callbacks on the owner thread

use anyhow::{bail, Result};
use log::{info, warn};
use rspin_loader::{ErrorKind, ImageData, TaskResult};

/// A locator that could not be loaded
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub locator: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Main application state
#[derive(Debug, Default)]
pub struct AppState {
    /// Most recently loaded image, the one a viewer would show
    pub image: Option<ImageData>,
    /// Locator of `image`
    pub current: Option<String>,
    /// Locators loaded successfully, with their dimensions
    pub loaded: Vec<(String, u32, u32)>,
    /// Locators that failed
    pub failures: Vec<LoadFailure>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Success callback target: show the new image
    pub fn image_loaded(&mut self, locator: &str, result: TaskResult<ImageData>) {
        match result.into_payload() {
            Some(image) => {
                info!("Loaded {}: {}x{} pixels", locator, image.width, image.height);
                self.loaded
                    .push((locator.to_string(), image.width, image.height));
                self.current = Some(locator.to_string());
                self.image = Some(image);
            }
            // Success is only signalled with a payload
            None => self.failures.push(LoadFailure {
                locator: locator.to_string(),
                kind: ErrorKind::Decode,
                message: "success reported without an image".to_string(),
            }),
        }
    }

    /// Failure callback target: keep the current image, remember why
    pub fn load_failed(&mut self, locator: &str, result: TaskResult<ImageData>) {
        let (kind, message) = match result.error() {
            Some(err) => (err.kind(), err.to_string()),
            None => (ErrorKind::Runtime, "unknown failure".to_string()),
        };
        warn!("Failed to load {}: {}", locator, message);
        self.failures.push(LoadFailure {
            locator: locator.to_string(),
            kind,
            message,
        });
    }

    /// Number of loads that have reported
    pub fn completed(&self) -> usize {
        self.loaded.len() + self.failures.len()
    }

    /// True when something was attempted and nothing loaded
    pub fn all_failed(&self) -> bool {
        self.loaded.is_empty() && !self.failures.is_empty()
    }

    /// Log the outcome of `attempted` loads.
    ///
    /// Errors when at least one load was attempted and none succeeded,
    /// including loads that never reported at all.
    pub fn report(&self, attempted: usize) -> Result<()> {
        info!(
            "Finished: {} loaded, {} failed, {} outstanding",
            self.loaded.len(),
            self.failures.len(),
            attempted.saturating_sub(self.completed())
        );
        for failure in &self.failures {
            warn!(
                "  {} ({:?}): {}",
                failure.locator, failure.kind, failure.message
            );
        }
        if let (Some(current), Some(image)) = (&self.current, &self.image) {
            info!(
                "Current image: {} ({}x{})",
                current, image.width, image.height
            );
        }

        if attempted > 0 && self.loaded.is_empty() {
            bail!("No image could be loaded");
        }
        Ok(())
    }
}
