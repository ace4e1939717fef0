//! Median-cut palette extraction.
//!
//! Samples are gathered in row-major order, so identical buffers and counts
//! always produce identical palettes. Buckets are only split along a channel
//! that still has range, which means a palette never holds more entries than
//! the image has distinct sampled colors.

use async_trait::async_trait;
use image::RgbaImage;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::debug;

use super::core::{PaletteColor, Quantizer, Stage};
use crate::config::PaletteConfig;
use crate::error::ReviewError;

#[derive(Debug, Clone)]
pub struct MedianCutQuantizer {
    config: PaletteConfig,
}

struct Bucket {
    samples: Vec<[u8; 3]>,
    min: [u8; 3],
    max: [u8; 3],
}

impl Bucket {
    fn new(samples: Vec<[u8; 3]>) -> Self {
        let mut min = [u8::MAX; 3];
        let mut max = [u8::MIN; 3];
        for sample in &samples {
            for channel in 0..3 {
                min[channel] = min[channel].min(sample[channel]);
                max[channel] = max[channel].max(sample[channel]);
            }
        }
        Self { samples, min, max }
    }

    fn population(&self) -> usize {
        self.samples.len()
    }

    /// Channel with the widest range; the lowest channel index wins ties.
    fn longest_channel(&self) -> (usize, u8) {
        (0..3)
            .map(|channel| (channel, self.max[channel] - self.min[channel]))
            .fold((0, 0), |best, current| {
                if current.1 > best.1 {
                    current
                } else {
                    best
                }
            })
    }

    fn is_splittable(&self, min_population: usize) -> bool {
        self.population() >= min_population && self.longest_channel().1 > 0
    }

    fn split(self) -> (Bucket, Bucket) {
        let (channel, _) = self.longest_channel();

        let mut histogram = [0usize; 256];
        for sample in &self.samples {
            histogram[sample[channel] as usize] += 1;
        }

        let half = self.population() / 2;
        let mut cumulative = 0;
        let mut median = self.max[channel];
        for (value, count) in histogram.iter().enumerate() {
            cumulative += count;
            if cumulative >= half {
                median = value as u8;
                break;
            }
        }

        // When the median is the channel maximum everything would land low, so cut below it.
        let cut_inclusive = median < self.max[channel];
        let (low, high): (Vec<_>, Vec<_>) = self.samples.into_iter().partition(|sample| {
            if cut_inclusive {
                sample[channel] <= median
            } else {
                sample[channel] < median
            }
        });

        (Bucket::new(low), Bucket::new(high))
    }

    fn average(&self) -> [u8; 3] {
        let n = self.population() as u64;
        let mut sums = [0u64; 3];
        for sample in &self.samples {
            for channel in 0..3 {
                sums[channel] += sample[channel] as u64;
            }
        }
        sums.map(|sum| ((sum + n / 2) / n) as u8)
    }
}

impl MedianCutQuantizer {
    pub fn new(config: PaletteConfig) -> Self {
        Self { config }
    }

    /// Ordered palette of at most `count` colors, most populous first.
    pub fn quantize(&self, pixels: &RgbaImage, count: usize) -> Vec<PaletteColor> {
        if count == 0 {
            return Vec::new();
        }

        let samples = self.sample(pixels);
        if samples.is_empty() {
            debug!("No opaque samples, palette is empty");
            return Vec::new();
        }

        let mut buckets = vec![Bucket::new(samples)];
        while buckets.len() < count {
            let candidate = buckets
                .iter()
                .enumerate()
                .filter(|(_, bucket)| bucket.is_splittable(self.config.min_split_population))
                .max_by_key(|(index, bucket)| (bucket.population(), Reverse(*index)))
                .map(|(index, _)| index);

            let Some(index) = candidate else {
                break;
            };

            let (low, high) = buckets.remove(index).split();
            buckets.insert(index, low);
            buckets.push(high);
        }

        // Stable sort keeps creation order between equally populated buckets.
        buckets.sort_by_key(|bucket| Reverse(bucket.population()));
        buckets
            .iter()
            .map(|bucket| PaletteColor::from_rgb(bucket.average()))
            .collect()
    }

    fn sample(&self, pixels: &RgbaImage) -> Vec<[u8; 3]> {
        pixels
            .pixels()
            .step_by(self.config.sample_step.max(1))
            .filter(|pixel| pixel[3] >= self.config.min_alpha)
            .map(|pixel| [pixel[0], pixel[1], pixel[2]])
            .collect()
    }
}

impl Default for MedianCutQuantizer {
    fn default() -> Self {
        Self::new(PaletteConfig::default())
    }
}

#[async_trait]
impl Quantizer for MedianCutQuantizer {
    async fn palette(
        &self,
        layer: Arc<RgbaImage>,
        count: usize,
    ) -> Result<Vec<PaletteColor>, ReviewError> {
        let quantizer = self.clone();
        tokio::task::spawn_blocking(move || quantizer.quantize(&layer, count))
            .await
            .map_err(|e| ReviewError::degraded(Stage::Palette, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "median-cut"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn two_tone(width: u32, height: u32) -> RgbaImage {
        ImageBuffer::from_fn(width, height, |_, y| {
            if y < height / 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    fn gradient() -> RgbaImage {
        ImageBuffer::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255])
        })
    }

    #[test]
    fn two_distinct_colors_give_two_entries() {
        let palette = MedianCutQuantizer::default().quantize(&two_tone(10, 10), 5);
        assert_eq!(palette.len(), 2);
        let mut colors: Vec<_> = palette.iter().map(|c| c.rgb).collect();
        colors.sort();
        assert_eq!(colors, vec![[0, 0, 255], [255, 0, 0]]);
    }

    #[test]
    fn same_buffer_same_palette() {
        let quantizer = MedianCutQuantizer::default();
        let image = gradient();
        let first = quantizer.quantize(&image, 5);
        let second = quantizer.quantize(&image, 5);
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }

    #[test]
    fn palette_is_ordered_by_population() {
        // 3/4 green, 1/4 white, every pixel sampled
        let image: RgbaImage = ImageBuffer::from_fn(8, 8, |_, y| {
            if y < 6 {
                Rgba([0, 200, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let quantizer = MedianCutQuantizer::new(PaletteConfig {
            sample_step: 1,
            ..PaletteConfig::default()
        });
        let palette = quantizer.quantize(&image, 5);
        assert_eq!(palette[0].rgb, [0, 200, 0]);
        assert_eq!(palette[1].rgb, [255, 255, 255]);
    }

    #[test]
    fn transparent_input_gives_empty_palette() {
        let image: RgbaImage = ImageBuffer::from_pixel(20, 20, Rgba([10, 20, 30, 0]));
        assert!(MedianCutQuantizer::default().quantize(&image, 5).is_empty());
    }

    #[test]
    fn zero_count_gives_empty_palette() {
        assert!(MedianCutQuantizer::default().quantize(&gradient(), 0).is_empty());
    }

    #[test]
    fn single_bucket_is_the_weighted_average() {
        let quantizer = MedianCutQuantizer::new(PaletteConfig {
            sample_step: 1,
            ..PaletteConfig::default()
        });
        // three black rows over one white row: 255 / 4 = 63.75
        let image: RgbaImage = ImageBuffer::from_fn(2, 4, |_, y| {
            if y == 3 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let palette = quantizer.quantize(&image, 1);
        assert_eq!(palette, vec![PaletteColor::from_rgb([64, 64, 64])]);
    }

    #[test]
    fn never_exceeds_requested_count() {
        let palette = MedianCutQuantizer::default().quantize(&gradient(), 3);
        assert_eq!(palette.len(), 3);
        let unique: std::collections::HashSet<_> = palette.iter().map(|c| c.id).collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn quantizer_trait_runs_off_the_runtime() {
        let quantizer = MedianCutQuantizer::default();
        let palette = quantizer.palette(Arc::new(two_tone(10, 10)), 5).await.unwrap();
        assert_eq!(palette.len(), 2);
    }
}
