// codec.rs - Turns a captured frame into bytes for the wire.
//
// Pure and stateless: the same image and settings always produce the same
// bytes. Formats without an alpha channel get an RGB conversion first, and
// frames larger than the configured bounds are downscaled with Lanczos3,
// keeping the aspect ratio.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageEncoder};

use crate::ai::EncodedImage;
use crate::settings::{ImageFormat, ImageSettings};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{format:?} encode failed: {source}")]
    Encode {
        format: ImageFormat,
        source: image::ImageError,
    },
}

#[derive(Debug, Clone)]
pub struct ImageCodec {
    format: ImageFormat,
    quality: u8,
    max_width: Option<u32>,
    max_height: Option<u32>,
}

impl ImageCodec {
    pub fn new(format: ImageFormat, quality: u8) -> Self {
        Self {
            format,
            quality: quality.clamp(1, 100),
            max_width: None,
            max_height: None,
        }
    }

    pub fn with_max_dimensions(mut self, max_width: Option<u32>, max_height: Option<u32>) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    pub fn from_settings(settings: &ImageSettings) -> Self {
        Self::new(settings.format, settings.quality)
            .with_max_dimensions(settings.max_width, settings.max_height)
    }

    pub fn encode(&self, image: &DynamicImage) -> Result<EncodedImage, CodecError> {
        let resized = self.downscale(image);
        let source = resized.as_ref().unwrap_or(image);
        let bytes = encode_as(source, self.format, self.quality)?;
        Ok(EncodedImage {
            bytes,
            mime_type: self.format.mime_type(),
        })
    }

    /// Target size that fits within the configured bounds, or None if the
    /// image already fits.
    fn target_dimensions(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let max_w = self.max_width.unwrap_or(u32::MAX);
        let max_h = self.max_height.unwrap_or(u32::MAX);
        if width <= max_w && height <= max_h {
            return None;
        }
        let ratio = f64::min(max_w as f64 / width as f64, max_h as f64 / height as f64);
        let new_w = ((width as f64 * ratio).round() as u32).max(1);
        let new_h = ((height as f64 * ratio).round() as u32).max(1);
        Some((new_w, new_h))
    }

    fn downscale(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let (w, h) = image.dimensions();
        let (new_w, new_h) = self.target_dimensions(w, h)?;
        log::debug!("Downscaling {}x{} -> {}x{}", w, h, new_w, new_h);
        Some(image.resize_exact(new_w, new_h, FilterType::Lanczos3))
    }
}

/// Serialize `image` in `format`. Also used to write saved screenshots.
pub fn encode_as(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, CodecError> {
    let (w, h) = image.dimensions();
    let mut buf: Vec<u8> = Vec::new();
    let wrap = |source| CodecError::Encode { format, source };

    let (pixels, color) = if format.supports_alpha() && image.color().has_alpha() {
        (image.to_rgba8().into_raw(), image::ExtendedColorType::Rgba8)
    } else {
        (image.to_rgb8().into_raw(), image::ExtendedColorType::Rgb8)
    };

    let written = match format {
        ImageFormat::Jpeg => JpegEncoder::new_with_quality(&mut buf, quality)
            .write_image(&pixels, w, h, color),
        ImageFormat::Webp => WebPEncoder::new_lossless(&mut buf).write_image(&pixels, w, h, color),
        ImageFormat::Png => PngEncoder::new(&mut buf).write_image(&pixels, w, h, color),
    };
    written.map_err(wrap)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbaImage};

    fn rgba_image(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbaImage::new(w, h);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn jpeg_round_trip_preserves_dimensions() {
        let codec = ImageCodec::new(ImageFormat::Jpeg, 90);
        let encoded = codec.encode(&rgba_image(37, 21)).unwrap();
        assert_eq!(encoded.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (37, 21));
    }

    #[test]
    fn png_keeps_alpha() {
        let codec = ImageCodec::new(ImageFormat::Png, 90);
        let encoded = codec.encode(&rgba_image(8, 8)).unwrap();
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn webp_is_rgb() {
        let codec = ImageCodec::new(ImageFormat::Webp, 90);
        let encoded = codec.encode(&rgba_image(16, 9)).unwrap();
        assert_eq!(encoded.mime_type, "image/webp");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (16, 9));
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn opaque_rgb_png_stays_rgb() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let bytes = encode_as(&img, ImageFormat::Png, 90).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn only_png_carries_alpha() {
        assert!(ImageFormat::Png.supports_alpha());
        assert!(!ImageFormat::Jpeg.supports_alpha());
        assert!(!ImageFormat::Webp.supports_alpha());
    }

    #[test]
    fn downscale_preserves_aspect_ratio() {
        let codec = ImageCodec::new(ImageFormat::Png, 90).with_max_dimensions(Some(100), None);
        let encoded = codec.encode(&rgba_image(400, 200)).unwrap();
        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn tighter_bound_wins() {
        let codec =
            ImageCodec::new(ImageFormat::Png, 90).with_max_dimensions(Some(300), Some(50));
        assert_eq!(codec.target_dimensions(400, 200), Some((100, 50)));
    }

    #[test]
    fn small_images_are_untouched() {
        let codec =
            ImageCodec::new(ImageFormat::Png, 90).with_max_dimensions(Some(1024), Some(1024));
        assert_eq!(codec.target_dimensions(640, 480), None);
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = ImageCodec::new(ImageFormat::Jpeg, 75);
        let img = rgba_image(20, 20);
        assert_eq!(codec.encode(&img).unwrap(), codec.encode(&img).unwrap());
    }
}
