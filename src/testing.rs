//! Stand-in analyzers for exercising the review lifecycle.

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgb};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::analysis::{
    AnalysisBackends, BoundingBox, MedianCutQuantizer, SegmentedImage, Segmenter, Stage,
    TextDetector,
};
use crate::common::RawImage;
use crate::error::{PersistenceError, ReviewError};
use crate::persistence::{MemoryStore, PersistedEntry, Persistence};

pub(crate) fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RawImage {
    RawImage::new(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
        width,
        height,
        Rgb(rgb),
    )))
}

pub(crate) struct FixedTextDetector {
    boxes: Vec<BoundingBox>,
}

impl FixedTextDetector {
    pub(crate) fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }
}

#[async_trait]
impl TextDetector for FixedTextDetector {
    async fn detect(&self, _image: &RawImage) -> Result<Vec<BoundingBox>, ReviewError> {
        Ok(self.boxes.clone())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

pub(crate) struct FailingTextDetector;

#[async_trait]
impl TextDetector for FailingTextDetector {
    async fn detect(&self, _image: &RawImage) -> Result<Vec<BoundingBox>, ReviewError> {
        Err(ReviewError::degraded(Stage::TextDetection, "recognizer unavailable"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub(crate) struct IdentitySegmenter;

#[async_trait]
impl Segmenter for IdentitySegmenter {
    async fn segment(&self, image: &RawImage) -> Result<SegmentedImage, ReviewError> {
        Ok(SegmentedImage::identity(image.image().clone()))
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Closed until `open` is called, then open for every waiter, past and future.
#[derive(Clone)]
pub(crate) struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn open(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Holds every segmentation until `release` is called.
#[derive(Clone)]
pub(crate) struct GatedSegmenter {
    gate: Gate,
}

impl GatedSegmenter {
    pub(crate) fn new() -> Self {
        Self { gate: Gate::new() }
    }

    pub(crate) fn release(&self) {
        self.gate.open();
    }
}

#[async_trait]
impl Segmenter for GatedSegmenter {
    async fn segment(&self, image: &RawImage) -> Result<SegmentedImage, ReviewError> {
        self.gate.wait().await;
        Ok(SegmentedImage::identity(image.image().clone()))
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Memory store whose image writes block until `release` is called.
pub(crate) struct GatedStore {
    inner: MemoryStore,
    gate: Gate,
    entered: Notify,
}

impl GatedStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gate: Gate::new(),
            entered: Notify::new(),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Resolves once a write is blocked on the gate.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.gate.open();
    }
}

#[async_trait]
impl Persistence for GatedStore {
    async fn save(&self, entry: PersistedEntry) -> Result<Uuid, PersistenceError> {
        self.inner.save(entry).await
    }

    async fn load_image(&self, name: &str) -> Result<RawImage, PersistenceError> {
        self.inner.load_image(name).await
    }

    async fn write_image(
        &self,
        image: &DynamicImage,
        id: Uuid,
        is_original: bool,
    ) -> Result<String, PersistenceError> {
        self.entered.notify_one();
        self.gate.wait().await;
        self.inner.write_image(image, id, is_original).await
    }
}

pub(crate) fn stub_backends(boxes: Vec<BoundingBox>) -> AnalysisBackends {
    AnalysisBackends::new(
        Arc::new(FixedTextDetector::new(boxes)),
        Arc::new(IdentitySegmenter),
        Arc::new(MedianCutQuantizer::default()),
    )
}
