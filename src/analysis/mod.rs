pub mod core;
pub mod orientation;
pub mod palette;
pub mod reconcile;
pub mod segmentation;
pub mod text;

use std::sync::Arc;

pub use self::core::{
    BoundingBox, PaletteColor, Quantizer, SegmentedImage, Segmenter, Stage, StageResult,
    TextDetector,
};
pub use orientation::OrientationNormalizer;
pub use palette::MedianCutQuantizer;
pub use reconcile::{reconcile, Reconciliation};
pub use segmentation::{crop_bounds, trim_transparent, BackdropSegmenter};
pub use text::EdgeRunTextDetector;

use crate::config::ReviewConfig;

/// The swappable analyzers shared by every record of a session.
#[derive(Clone)]
pub struct AnalysisBackends {
    pub text: Arc<dyn TextDetector>,
    pub segmenter: Arc<dyn Segmenter>,
    pub quantizer: Arc<dyn Quantizer>,
}

impl AnalysisBackends {
    pub fn new(
        text: Arc<dyn TextDetector>,
        segmenter: Arc<dyn Segmenter>,
        quantizer: Arc<dyn Quantizer>,
    ) -> Self {
        Self {
            text,
            segmenter,
            quantizer,
        }
    }

    /// Built-in analyzers tuned by `config`.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self::new(
            Arc::new(EdgeRunTextDetector::new(config.text.clone())),
            Arc::new(BackdropSegmenter::new(config.segmentation.clone())),
            Arc::new(MedianCutQuantizer::new(config.palette.clone())),
        )
    }
}
