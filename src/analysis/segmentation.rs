use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba, RgbaImage};
use std::sync::Arc;
use tracing::debug;

use super::core::{SegmentedImage, Segmenter, Stage};
use crate::common::{RawImage, Rect, Size};
use crate::config::SegmentationConfig;
use crate::error::ReviewError;

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Separates a subject from a roughly uniform backdrop, estimated from the image border.
#[derive(Debug, Clone)]
pub struct BackdropSegmenter {
    config: SegmentationConfig,
}

impl BackdropSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn segment_pixels(&self, original: Arc<DynamicImage>) -> SegmentedImage {
        let rgba = original.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return SegmentedImage::identity(original);
        }

        let backdrop = border_mean(&rgba);
        let threshold = self.config.mask_threshold;
        let mask: Vec<bool> = rgba
            .pixels()
            .map(|pixel| pixel[3] > 0 && distance(pixel, backdrop) > threshold)
            .collect();

        let foreground = mask.iter().filter(|&&m| m).count();
        let ratio = foreground as f32 / mask.len() as f32;
        if ratio < self.config.min_foreground_ratio || ratio > self.config.max_foreground_ratio {
            debug!(
                "Foreground ratio {:.3} outside [{:.3}, {:.3}], keeping original",
                ratio, self.config.min_foreground_ratio, self.config.max_foreground_ratio
            );
            return SegmentedImage::identity(original);
        }

        let layer = |keep_foreground: bool| -> RgbaImage {
            ImageBuffer::from_fn(width, height, |x, y| {
                let index = (y * width + x) as usize;
                if mask[index] == keep_foreground {
                    *rgba.get_pixel(x, y)
                } else {
                    CLEAR
                }
            })
        };

        SegmentedImage {
            active: Arc::new(layer(true)),
            inactive: Arc::new(layer(false)),
            original,
            subject_found: true,
        }
    }
}

impl Default for BackdropSegmenter {
    fn default() -> Self {
        Self::new(SegmentationConfig::default())
    }
}

#[async_trait]
impl Segmenter for BackdropSegmenter {
    async fn segment(&self, image: &RawImage) -> Result<SegmentedImage, ReviewError> {
        let segmenter = self.clone();
        let original = image.image().clone();
        tokio::task::spawn_blocking(move || segmenter.segment_pixels(original))
            .await
            .map_err(|e| ReviewError::degraded(Stage::Segmentation, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "backdrop"
    }
}

fn distance(pixel: &Rgba<u8>, reference: [f32; 3]) -> f32 {
    (0..3)
        .map(|c| {
            let d = pixel[c] as f32 - reference[c];
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Mean color of the outer ring of the image.
fn border_mean(rgba: &RgbaImage) -> [f32; 3] {
    let (width, height) = rgba.dimensions();
    let ring = (width.min(height) / 20).max(1);
    let mut sums = [0f64; 3];
    let mut n = 0f64;

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let on_border =
            x < ring || y < ring || x >= width.saturating_sub(ring) || y >= height.saturating_sub(ring);
        if on_border {
            for c in 0..3 {
                sums[c] += pixel[c] as f64;
            }
            n += 1.0;
        }
    }

    sums.map(|s| (s / n.max(1.0)) as f32)
}

/// `(x, y, width, height)` of the smallest rect holding every non-transparent pixel.
pub fn opaque_bounds(layer: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut any = false;

    for (x, y, pixel) in layer.enumerate_pixels() {
        if pixel[3] > 0 {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    any.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crops a layer to its opaque content. A fully transparent layer trims to nothing.
pub fn trim_transparent(layer: &RgbaImage) -> Option<RgbaImage> {
    let (x, y, width, height) = opaque_bounds(layer)?;
    Some(layer.view(x, y, width, height).to_image())
}

/// Bounds of the subject, scaled from image pixels into display pixels.
pub fn crop_bounds(segmented: &SegmentedImage, display: Size) -> Option<Rect> {
    if display.is_degenerate() {
        return None;
    }
    let (width, height) = segmented.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let (x, y, w, h) = opaque_bounds(&segmented.active)?;
    let sx = display.width / width as f64;
    let sy = display.height / height as f64;
    Some(Rect::new(x as f64, y as f64, w as f64, h as f64).scaled(sx, sy))
}
