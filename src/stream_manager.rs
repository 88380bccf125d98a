// stream_manager.rs - Orchestrates capture → AI → output pipeline.
//
// Each trigger runs processing notice, analysis and delivery to completion.
// Frames meant to be analyzed together wait in the batch queue until sent.

use std::sync::{Mutex, MutexGuard};

use crate::ai::{AnalysisResult, AnalysisService};
use crate::capture::{CapturedFrame, ScreenshotQueue};
use crate::output::OutputHandler;

/// Shared state for the analysis pipeline.
pub struct StreamManager {
    service: AnalysisService,
    output: OutputHandler,
    queue: Mutex<ScreenshotQueue>,
}

impl StreamManager {
    pub fn new(service: AnalysisService, output: OutputHandler) -> Self {
        Self {
            service,
            output,
            queue: Mutex::new(ScreenshotQueue::new()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, ScreenshotQueue> {
        // The queue holds no invariant a panic could break mid-update.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Analyze one frame and deliver the result.
    pub async fn handle_screenshot(&self, frame: CapturedFrame) -> AnalysisResult {
        log::info!("Processing screenshot...");
        self.output.send_processing().await;

        let result = self
            .service
            .analyze_single(&frame.image, self.output.fragment_sink())
            .await;
        self.deliver(&result, frame.saved_path.as_deref()).await;
        result
    }

    /// Add a frame to the batch queue, returning the queue length.
    pub fn enqueue(&self, frame: CapturedFrame) -> usize {
        let size = self.queue().add(frame);
        log::info!("Screenshot queued ({} in queue)", size);
        size
    }

    pub fn clear_queue(&self) -> usize {
        let count = self.queue().clear();
        log::info!("Cleared {} queued screenshot(s)", count);
        count
    }

    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// Analyze every queued frame as one question. An empty queue is a
    /// no-op and returns `None`.
    pub async fn send_queue(&self) -> Option<AnalysisResult> {
        let frames = self.queue().drain();
        if frames.is_empty() {
            log::warn!("Queue is empty - nothing to send");
            return None;
        }

        log::info!("Sending {} queued screenshot(s) for analysis", frames.len());
        self.output.send_processing().await;

        let images: Vec<_> = frames.iter().map(|f| f.image.clone()).collect();
        let result = self
            .service
            .analyze_multi(&images, self.output.fragment_sink())
            .await;
        let first_path = frames.iter().find_map(|f| f.saved_path.as_deref());
        self.deliver(&result, first_path).await;
        Some(result)
    }

    pub async fn test_connection(&self) -> bool {
        self.service.test_connection().await
    }

    async fn deliver(&self, result: &AnalysisResult, screenshot_path: Option<&std::path::Path>) {
        if result.success {
            log::info!(
                "Analysis succeeded (model={}, elapsed={:?}, tokens={:?})",
                result.model,
                result.elapsed_seconds,
                result.tokens_used
            );
        } else {
            log::error!(
                "Analysis failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.output.handle_result(result, screenshot_path).await;
    }
}
