// screen.rs - Captures the primary monitor and optionally saves the frame
// as exam_<timestamp>.<ext> in the screenshot directory.

use chrono::{DateTime, Local};
use image::{DynamicImage, GenericImageView};
use std::fs;
use std::path::{Path, PathBuf};

use super::{CaptureError, CapturedFrame};
use crate::codec::encode_as;
use crate::settings::{ImageFormat, ScreenshotSettings};

/// JPEG quality used for saved screenshots.
const SAVE_QUALITY: u8 = 95;

// ── ScreenCapture ───────────────────────────────────────────────────────
/// Holds capture configuration. Cheap to clone, so a copy can move onto a
/// blocking thread for each grab.
#[derive(Debug, Clone)]
pub struct ScreenCapture {
    /// Directory saved screenshots go to; `None` disables saving.
    save_dir: Option<PathBuf>,
    format: ImageFormat,
}

impl ScreenCapture {
    pub fn new(save_dir: Option<PathBuf>, format: ImageFormat) -> Self {
        Self { save_dir, format }
    }

    pub fn from_settings(settings: &ScreenshotSettings) -> Self {
        let save_dir = settings
            .save_screenshots
            .then(|| settings.directory.clone());
        Self::new(save_dir, settings.format)
    }

    /// Grab the primary monitor. Blocking; call from a blocking context.
    pub fn capture(&self) -> Result<CapturedFrame, CaptureError> {
        let monitor = primary_monitor()?;
        let raw = monitor
            .capture_image()
            .map_err(|e| CaptureError::Capture(format!("capture_image: {e}")))?;

        // `xcap` returns an `image::RgbaImage`.
        let image = DynamicImage::ImageRgba8(raw);
        let (w, h) = image.dimensions();
        log::info!("Screenshot captured: {}x{}", w, h);

        self.finish(image)
    }

    /// Save `image` if enabled and wrap it as a frame.
    pub fn finish(&self, image: DynamicImage) -> Result<CapturedFrame, CaptureError> {
        let saved_path = match &self.save_dir {
            Some(dir) => Some(save_screenshot(&image, dir, self.format, Local::now())?),
            None => None,
        };
        Ok(CapturedFrame::new(image, saved_path))
    }
}

// ── Internal helpers ────────────────────────────────────────────────────

fn primary_monitor() -> Result<xcap::Monitor, CaptureError> {
    let monitors =
        xcap::Monitor::all().map_err(|e| CaptureError::Capture(format!("enumerate monitors: {e}")))?;
    let mut fallback = None;
    for monitor in monitors {
        if monitor.is_primary() {
            return Ok(monitor);
        }
        fallback.get_or_insert(monitor);
    }
    fallback.ok_or(CaptureError::NoMonitor)
}

/// `exam_<YYYYmmdd_HHMMSS_micros>.<ext>`
pub fn screenshot_file_name(at: DateTime<Local>, format: ImageFormat) -> String {
    format!("exam_{}.{}", at.format("%Y%m%d_%H%M%S_%6f"), format.extension())
}

fn save_screenshot(
    image: &DynamicImage,
    dir: &Path,
    format: ImageFormat,
    at: DateTime<Local>,
) -> Result<PathBuf, CaptureError> {
    let path = dir.join(screenshot_file_name(at, format));
    let bytes = encode_as(image, format, SAVE_QUALITY)?;
    fs::create_dir_all(dir)
        .and_then(|_| fs::write(&path, bytes))
        .map_err(|source| CaptureError::Save {
            path: path.clone(),
            source,
        })?;
    log::debug!("Screenshot saved to: {}", path.display());
    Ok(path)
}

// ── Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::RgbaImage;

    fn solid_image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, image::Rgba([40, 80, 120, 255])))
    }

    #[test]
    fn file_name_carries_timestamp_and_extension() {
        let at = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            screenshot_file_name(at, ImageFormat::Jpeg),
            "exam_20250309_140507_000000.jpg"
        );
        assert!(screenshot_file_name(at, ImageFormat::Webp).ends_with(".webp"));
    }

    #[test]
    fn finish_saves_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let capture = ScreenCapture::new(Some(tmp.path().join("shots")), ImageFormat::Png);

        let frame = capture.finish(solid_image(10, 6)).unwrap();
        let path = frame.saved_path.expect("saved path");
        assert!(path.starts_with(tmp.path().join("shots")));
        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.dimensions(), (10, 6));
    }

    #[test]
    fn finish_without_directory_saves_nothing() {
        let capture = ScreenCapture::new(None, ImageFormat::Png);
        let frame = capture.finish(solid_image(4, 4)).unwrap();
        assert!(frame.saved_path.is_none());
    }

    #[test]
    fn from_settings_respects_save_flag() {
        let mut settings = ScreenshotSettings::default();
        assert!(ScreenCapture::from_settings(&settings).save_dir.is_none());
        settings.save_screenshots = true;
        assert_eq!(
            ScreenCapture::from_settings(&settings).save_dir,
            Some(PathBuf::from("screenshots"))
        );
    }
}
