use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::common::{RawImage, Rect};
use crate::error::ReviewError;

/// The independently scheduled units of analysis run for every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    TextDetection,
    Segmentation,
    Palette,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::TextDetection => "text detection",
            Stage::Segmentation => "segmentation",
            Stage::Palette => "palette extraction",
        };
        f.write_str(name)
    }
}

/// A located text region. Detectors emit rects in the unit square with a
/// bottom-left origin; reconciled boxes carry display pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub id: Uuid,
    pub confidence: f32,
    pub rect: Rect,
    pub text: String,
}

impl BoundingBox {
    /// Returns `None` for degenerate rects or a confidence outside `[0, 1]`.
    pub fn new(confidence: f32, rect: Rect, text: impl Into<String>) -> Option<Self> {
        Self::with_id(Uuid::new_v4(), confidence, rect, text)
    }

    pub fn with_id(
        id: Uuid,
        confidence: f32,
        rect: Rect,
        text: impl Into<String>,
    ) -> Option<Self> {
        if rect.is_degenerate() || !(0.0..=1.0).contains(&confidence) {
            return None;
        }
        Some(Self {
            id,
            confidence,
            rect,
            text: text.into(),
        })
    }

    /// Same box moved into another coordinate space; the id is kept.
    pub fn relocated(&self, rect: Rect) -> Option<Self> {
        Self::with_id(self.id, self.confidence, rect, self.text.clone())
    }

    pub fn area(&self) -> f64 {
        self.rect.area()
    }
}

/// Foreground/background split of one image. Layers match the source dimensions.
#[derive(Clone)]
pub struct SegmentedImage {
    pub original: Arc<DynamicImage>,
    pub active: Arc<RgbaImage>,
    pub inactive: Arc<RgbaImage>,
    /// False when no confident mask was found and both layers are the original.
    pub subject_found: bool,
}

impl SegmentedImage {
    pub fn identity(original: Arc<DynamicImage>) -> Self {
        let layer = Arc::new(original.to_rgba8());
        Self {
            original,
            active: layer.clone(),
            inactive: layer,
            subject_found: false,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.original.dimensions()
    }
}

impl fmt::Debug for SegmentedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedImage")
            .field("dimensions", &self.dimensions())
            .field("subject_found", &self.subject_found)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaletteColor {
    /// Packed `0xRRGGBB`.
    pub id: u32,
    pub rgb: [u8; 3],
}

impl PaletteColor {
    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        let id = (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32;
        Self { id, rgb }
    }

    pub fn hex(&self) -> String {
        format!("#{:06X}", self.id)
    }
}

/// Outcome of one stage. A degraded stage still carries its fallback value.
#[derive(Debug)]
pub struct StageResult<T> {
    pub result: T,
    pub degradation: Option<ReviewError>,
    pub processing_time_us: u64,
}

impl<T> StageResult<T> {
    pub fn ok(result: T) -> Self {
        Self {
            result,
            degradation: None,
            processing_time_us: 0,
        }
    }

    pub fn degraded(result: T, reason: ReviewError) -> Self {
        Self {
            result,
            degradation: Some(reason),
            processing_time_us: 0,
        }
    }

    pub fn with_timing(mut self, start_time: Instant) -> Self {
        self.processing_time_us = start_time.elapsed().as_micros() as u64;
        self
    }
}

/// Strategy for locating text regions.
#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, image: &RawImage) -> Result<Vec<BoundingBox>, ReviewError>;
    fn name(&self) -> &'static str;
}

/// Strategy for separating the subject from its backdrop.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, image: &RawImage) -> Result<SegmentedImage, ReviewError>;
    fn name(&self) -> &'static str;
}

/// Strategy for extracting an ordered palette of at most `count` colors.
#[async_trait]
pub trait Quantizer: Send + Sync {
    async fn palette(
        &self,
        layer: Arc<RgbaImage>,
        count: usize,
    ) -> Result<Vec<PaletteColor>, ReviewError>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn bounding_box_rejects_invalid_input() {
        let rect = Rect::new(0.1, 0.1, 0.2, 0.2);
        assert!(BoundingBox::new(1.2, rect, "x").is_none());
        assert!(BoundingBox::new(-0.1, rect, "x").is_none());
        assert!(BoundingBox::new(0.5, Rect::new(0.0, 0.0, 0.0, 0.2), "x").is_none());
        assert!(BoundingBox::new(1.0, rect, "x").is_some());
    }

    #[test]
    fn relocated_box_keeps_identity() {
        let b = BoundingBox::new(0.7, Rect::new(0.1, 0.1, 0.2, 0.2), "Title").unwrap();
        let moved = b.relocated(Rect::new(10.0, 10.0, 20.0, 20.0)).unwrap();
        assert_eq!(moved.id, b.id);
        assert_eq!(moved.text, "Title");
    }

    #[test]
    fn palette_color_packs_rgb() {
        let c = PaletteColor::from_rgb([0x12, 0xAB, 0x01]);
        assert_eq!(c.id, 0x12AB01);
        assert_eq!(c.hex(), "#12AB01");
    }

    #[test]
    fn identity_segmentation_shares_one_layer() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 3, Rgb([5, 6, 7])));
        let seg = SegmentedImage::identity(Arc::new(img));
        assert!(!seg.subject_found);
        assert!(Arc::ptr_eq(&seg.active, &seg.inactive));
        assert_eq!(seg.active.dimensions(), (4, 3));
    }
}
