use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

const ENV_PREFIX: &str = "CRATE_REVIEW";

/// Tunable parameters for every analysis stage of a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReviewConfig {
    pub reconcile: ReconcileConfig,
    pub text: TextDetectionConfig,
    pub segmentation: SegmentationConfig,
    pub palette: PaletteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Boxes below this confidence are dropped. A box exactly at the threshold is kept.
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDetectionConfig {
    pub row_step: u32,
    pub edge_threshold: f32,
    pub min_run: u32,
    pub max_gap: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Euclidean RGB distance from the backdrop color that marks a pixel as foreground.
    pub mask_threshold: f32,
    pub min_foreground_ratio: f32,
    pub max_foreground_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub color_count: usize,
    pub sample_step: usize,
    pub min_alpha: u8,
    pub min_split_population: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}

impl Default for TextDetectionConfig {
    fn default() -> Self {
        Self {
            row_step: 4,
            edge_threshold: 25.0,
            min_run: 12,
            max_gap: 6,
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 48.0,
            min_foreground_ratio: 0.02,
            max_foreground_ratio: 0.9,
        }
    }
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            color_count: 5,
            sample_step: 10,
            min_alpha: 125,
            min_split_population: 2,
        }
    }
}

impl ReviewConfig {
    /// Layers an optional config file and `CRATE_REVIEW__*` environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ReviewError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ReviewConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ReviewError> {
        let threshold = self.reconcile.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid("Confidence threshold must be between 0.0 and 1.0"));
        }

        if self.text.row_step == 0 {
            return Err(invalid("Text row step must be greater than 0"));
        }

        let seg = &self.segmentation;
        if seg.min_foreground_ratio < 0.0
            || seg.max_foreground_ratio > 1.0
            || seg.min_foreground_ratio > seg.max_foreground_ratio
        {
            return Err(invalid(
                "Foreground ratios must satisfy 0.0 <= min <= max <= 1.0",
            ));
        }

        if self.palette.sample_step == 0 {
            return Err(invalid("Palette sample step must be greater than 0"));
        }

        if self.palette.min_split_population < 2 {
            return Err(invalid("A bucket needs at least 2 samples to split"));
        }

        Ok(())
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.reconcile.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_color_count(mut self, count: usize) -> Self {
        self.palette.color_count = count;
        self
    }
}

fn invalid(message: &str) -> ReviewError {
    ReviewError::Config(config::ConfigError::Message(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ReviewConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconcile.confidence_threshold, 0.5);
        assert_eq!(config.palette.color_count, 5);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = ReviewConfig::default();
        config.reconcile.confidence_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ReviewError::Config(_))));
    }

    #[test]
    fn rejects_inverted_foreground_ratios() {
        let mut config = ReviewConfig::default();
        config.segmentation.min_foreground_ratio = 0.8;
        config.segmentation.max_foreground_ratio = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_overrides_only_named_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[palette]\ncolor_count = 8\n\n[reconcile]\nconfidence_threshold = 0.25").unwrap();

        let config = ReviewConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.palette.color_count, 8);
        assert_eq!(config.palette.sample_step, 10);
        assert_eq!(config.reconcile.confidence_threshold, 0.25);
        assert_eq!(config.segmentation, SegmentationConfig::default());
    }

    #[test]
    fn overrides_clamp_the_threshold() {
        let config = ReviewConfig::default()
            .with_confidence_threshold(1.7)
            .with_color_count(3);
        assert_eq!(config.reconcile.confidence_threshold, 1.0);
        assert_eq!(config.palette.color_count, 3);
        assert!(config.validate().is_ok());
    }
}
