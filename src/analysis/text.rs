use async_trait::async_trait;
use image::RgbImage;
use tracing::debug;

use super::core::{BoundingBox, Stage, TextDetector};
use crate::common::{RawImage, Rect};
use crate::config::TextDetectionConfig;
use crate::error::ReviewError;

/// Finds text-like regions from dense horizontal luminance edges. It locates
/// text but does not read it, so every box carries an empty string.
#[derive(Debug, Clone)]
pub struct EdgeRunTextDetector {
    config: TextDetectionConfig,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    x0: u32,
    x1: u32,
    y: u32,
    edges: u32,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    edges: u32,
    rows: u32,
}

impl Region {
    fn accepts(&self, segment: &Segment, row_step: u32) -> bool {
        segment.y == self.y1 + row_step && segment.x0 < self.x1 && segment.x1 > self.x0
    }

    fn extend(&mut self, segment: &Segment) {
        self.x0 = self.x0.min(segment.x0);
        self.x1 = self.x1.max(segment.x1);
        self.y1 = segment.y;
        self.edges += segment.edges;
        self.rows += 1;
    }
}

impl EdgeRunTextDetector {
    pub fn new(config: TextDetectionConfig) -> Self {
        Self { config }
    }

    fn rgb_to_luma(r: u8, g: u8, b: u8) -> f32 {
        // Rec. 709 luminance
        0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32
    }

    /// Boxes in the unit square with a bottom-left origin.
    pub fn detect_regions(&self, image: &RgbImage) -> Vec<BoundingBox> {
        let (width, height) = image.dimensions();
        if width < 2 || height == 0 {
            return Vec::new();
        }

        let row_step = self.config.row_step.max(1);
        let mut regions: Vec<Region> = Vec::new();

        for y in (0..height).step_by(row_step as usize) {
            for segment in self.row_segments(image, y) {
                match regions
                    .iter_mut()
                    .rev()
                    .find(|region| region.accepts(&segment, row_step))
                {
                    Some(region) => region.extend(&segment),
                    None => regions.push(Region {
                        x0: segment.x0,
                        x1: segment.x1,
                        y0: segment.y,
                        y1: segment.y,
                        edges: segment.edges,
                        rows: 1,
                    }),
                }
            }
        }

        debug!("Edge scan found {} candidate regions", regions.len());

        let (w, h) = (width as f64, height as f64);
        regions
            .iter()
            .filter_map(|region| {
                let box_width = region.x1 - region.x0;
                let box_height = (region.y1 - region.y0 + row_step).min(height - region.y0);
                let density = region.edges as f32 / (box_width * region.rows) as f32;
                let confidence = (density * 1.5).clamp(0.0, 1.0);

                let nh = box_height as f64 / h;
                let rect = Rect::new(
                    region.x0 as f64 / w,
                    1.0 - region.y0 as f64 / h - nh,
                    box_width as f64 / w,
                    nh,
                );
                BoundingBox::new(confidence, rect, String::new())
            })
            .collect()
    }

    fn row_segments(&self, image: &RgbImage, y: u32) -> Vec<Segment> {
        let width = image.width();
        let mut segments = Vec::new();
        let mut run: Option<(u32, u32, u32)> = None; // (start, last edge, edges)

        let luma_at = |x: u32| {
            let p = image.get_pixel(x, y);
            Self::rgb_to_luma(p[0], p[1], p[2])
        };

        let mut previous = luma_at(0);
        for x in 1..width {
            let current = luma_at(x);
            let is_edge = (current - previous).abs() > self.config.edge_threshold;
            previous = current;

            if is_edge {
                run = match run {
                    Some((start, last, edges)) if x - last <= self.config.max_gap => {
                        Some((start, x, edges + 1))
                    }
                    Some(finished) => {
                        self.close_run(finished, y, &mut segments);
                        Some((x - 1, x, 1))
                    }
                    None => Some((x - 1, x, 1)),
                };
            }
        }
        if let Some(finished) = run {
            self.close_run(finished, y, &mut segments);
        }

        segments
    }

    fn close_run(&self, (start, last, edges): (u32, u32, u32), y: u32, out: &mut Vec<Segment>) {
        if last - start >= self.config.min_run {
            out.push(Segment {
                x0: start,
                x1: last + 1,
                y,
                edges,
            });
        }
    }
}

impl Default for EdgeRunTextDetector {
    fn default() -> Self {
        Self::new(TextDetectionConfig::default())
    }
}

#[async_trait]
impl TextDetector for EdgeRunTextDetector {
    async fn detect(&self, image: &RawImage) -> Result<Vec<BoundingBox>, ReviewError> {
        let detector = self.clone();
        let source = image.image().clone();
        tokio::task::spawn_blocking(move || detector.detect_regions(&source.to_rgb8()))
            .await
            .map_err(|e| ReviewError::degraded(Stage::TextDetection, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "edge-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    /// Black 200x100 image with a striped 100x20 band at (50, 40).
    fn striped_band() -> RgbImage {
        ImageBuffer::from_fn(200, 100, |x, y| {
            let in_band = (50..150).contains(&x) && (40..60).contains(&y);
            if in_band && ((x - 50) / 2) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn finds_one_region_over_the_band() {
        let boxes = EdgeRunTextDetector::default().detect_regions(&striped_band());
        assert_eq!(boxes.len(), 1);

        let rect = boxes[0].rect;
        assert!((rect.x * 200.0 - 49.0).abs() <= 1.0);
        assert!((rect.width * 200.0 - 100.0).abs() <= 1.0);
        assert!((rect.height * 100.0 - 20.0).abs() < 1e-6);
        // bottom-left origin: band bottom edge sits 40px above the image bottom
        assert!((rect.y * 100.0 - 40.0).abs() < 1e-6);
        assert!(boxes[0].confidence > 0.5);
        assert!(boxes[0].text.is_empty());
    }

    #[test]
    fn flat_image_has_no_text() {
        let flat: RgbImage = ImageBuffer::from_pixel(64, 64, Rgb([128, 128, 128]));
        assert!(EdgeRunTextDetector::default().detect_regions(&flat).is_empty());
    }

    #[test]
    fn short_runs_are_ignored() {
        // a single 4px stripe pair is below the minimum run
        let img: RgbImage = ImageBuffer::from_fn(64, 16, |x, _| {
            if (10..12).contains(&x) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        assert!(EdgeRunTextDetector::default().detect_regions(&img).is_empty());
    }
}
