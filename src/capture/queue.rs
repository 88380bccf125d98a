use super::CapturedFrame;

/// Queue length at which every further add logs a warning.
pub const WARNING_SIZE: usize = 5;

/// Frames collected for one multi-image analysis, in capture order.
#[derive(Debug, Default)]
pub struct ScreenshotQueue {
    frames: Vec<CapturedFrame>,
}

impl ScreenshotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame and return the new length.
    pub fn add(&mut self, frame: CapturedFrame) -> usize {
        self.frames.push(frame);
        let size = self.frames.len();
        if size >= WARNING_SIZE {
            log::warn!("Queue size: {} - ensure these are for the same question", size);
        }
        size
    }

    /// Remove everything, returning how many frames were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.frames.len();
        self.frames.clear();
        count
    }

    /// Take all frames in order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<CapturedFrame> {
        std::mem::take(&mut self.frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
