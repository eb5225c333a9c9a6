// Image loading module
// Background task that retrieves image bytes and decodes them

use crate::dispatcher::{Dispatcher, Signal};
use crate::error::TaskError;
use crate::fetch::Fetcher;
use crate::pool::WorkerPool;
use crate::result::TaskResult;
use crate::task::{self, BackgroundTask, TaskHandle};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

/// Decoded image ready for display
#[derive(Debug, Clone, Default)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Raw RGBA pixel data (4 bytes per pixel)
    pub rgba_data: Vec<u8>,
    /// Format detected from the source bytes
    pub format: Option<ImageFormat>,
}

impl ImageData {
    fn from_dynamic(img: DynamicImage, format: ImageFormat) -> Self {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            rgba_data: rgba.into_raw(),
            format: Some(format),
        }
    }

    /// True for an image with no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.rgba_data.is_empty()
    }
}

/// Decode raw bytes, auto-detecting the format
pub fn decode_image(data: &[u8]) -> Result<(DynamicImage, ImageFormat), TaskError> {
    let format = image::guess_format(data)
        .map_err(|e| TaskError::Decode(format!("failed to detect image format: {}", e)))?;

    let img = image::load(Cursor::new(data), format)
        .map_err(|e| TaskError::Decode(e.to_string()))?;

    Ok((img, format))
}

/// Fetches the image named by a locator and decodes it on a worker.
///
/// Fails when retrieval fails, when decoding fails, when no image was
/// produced, or when the decoded image has no pixels.
pub struct ImageFetchTask {
    locator: String,
    fetcher: Arc<dyn Fetcher>,
    scale: f32,
}

impl ImageFetchTask {
    pub fn new(locator: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            locator: locator.into(),
            fetcher,
            scale: 1.0,
        }
    }

    /// Resize the decoded image by `scale` (e.g. 0.5 for half size)
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Build a task for `locator` and submit it right away.
    ///
    /// Exactly one of the callbacks later runs on the dispatcher's thread.
    pub fn start<S, F>(
        locator: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        pool: &WorkerPool,
        dispatcher: &Dispatcher,
        on_success: S,
        on_failure: F,
    ) -> TaskHandle
    where
        S: FnOnce(TaskResult<ImageData>) + 'static,
        F: FnOnce(TaskResult<ImageData>) + 'static,
    {
        task::spawn(
            pool,
            dispatcher,
            Self::new(locator, fetcher),
            on_success,
            on_failure,
        )
    }

    /// Why a result that did not record an error is still unusable
    fn invalid_payload(&self, result: &TaskResult<ImageData>) -> Option<TaskError> {
        if result.failed() {
            return None;
        }
        match result.raw_payload() {
            None => Some(TaskError::MissingPayload),
            Some(image) if image.is_empty() => Some(TaskError::EmptyImage),
            Some(_) => None,
        }
    }

    fn scaled(&self, img: DynamicImage) -> DynamicImage {
        if (self.scale - 1.0).abs() > f32::EPSILON && self.scale > 0.0 {
            let new_width = (img.width() as f32 * self.scale) as u32;
            let new_height = (img.height() as f32 * self.scale) as u32;
            img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
        } else {
            img
        }
    }
}

impl BackgroundTask for ImageFetchTask {
    type Output = ImageData;

    fn name(&self) -> &str {
        &self.locator
    }

    fn run(&mut self) -> Result<ImageData, TaskError> {
        let bytes = self.fetcher.fetch(&self.locator)?;
        let (img, format) = decode_image(&bytes)?;
        Ok(ImageData::from_dynamic(self.scaled(img), format))
    }

    fn had_error(&self, result: &TaskResult<ImageData>) -> bool {
        result.failed()
            || result.raw_payload().is_none()
            || result.raw_payload().is_some_and(ImageData::is_empty)
    }

    fn finished(&self, mut result: TaskResult<ImageData>, signal: Signal<ImageData>) {
        if let Some(err) = self.invalid_payload(&result) {
            result.reject(err);
        }
        if self.had_error(&result) {
            signal.failure(result);
        } else {
            signal.success(result);
        }
    }
}
