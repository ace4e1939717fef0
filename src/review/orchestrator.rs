//! Per-record analysis lifecycle.
//!
//! Every record lives behind its own mutex together with an epoch token.
//! Stage tasks capture the epoch they were started under and only write while
//! it still matches, so a cancelled record can never be touched by a result
//! that arrives late. Reconciliation and crop bounds are joins on a reported
//! display size and run at most once per distinct size.

use chrono::Utc;
use futures::future::join_all;
use image::DynamicImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::record::{next_epoch, RecordId, RecordIdentity, RecordPhase, ReviewRecord};
use crate::analysis::{
    crop_bounds, reconcile, trim_transparent, AnalysisBackends, BoundingBox, PaletteColor,
    Quantizer, SegmentedImage, Segmenter, Stage, StageResult, TextDetector,
};
use crate::common::{RawImage, Size};
use crate::config::ReviewConfig;
use crate::error::ReviewError;
use crate::persistence::{FolderRef, PersistedEntry, Persistence};

pub(crate) enum StageOutput {
    TextBoxes(StageResult<Vec<BoundingBox>>),
    Segmentation(StageResult<SegmentedImage>),
    Palette(StageResult<Vec<PaletteColor>>),
}

impl StageOutput {
    fn stage(&self) -> Stage {
        match self {
            StageOutput::TextBoxes(_) => Stage::TextDetection,
            StageOutput::Segmentation(_) => Stage::Segmentation,
            StageOutput::Palette(_) => Stage::Palette,
        }
    }
}

/// The one place a record is mutated from, shared with its stage tasks.
#[derive(Clone)]
struct SharedRecord {
    inner: Arc<Mutex<ReviewRecord>>,
    config: Arc<ReviewConfig>,
}

impl SharedRecord {
    fn lock(&self) -> MutexGuard<'_, ReviewRecord> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a stage result unless the record moved on. Returns whether it landed.
    fn apply(&self, epoch: u64, output: StageOutput) -> bool {
        let mut record = self.lock();
        let stage = output.stage();

        if record.epoch != epoch || record.phase.is_terminal() {
            debug!("Discarding late {} result for record {}", stage, record.id);
            return false;
        }

        let applied = match output {
            StageOutput::TextBoxes(result) => {
                if record.detected_boxes.is_some() {
                    false
                } else {
                    if result.degradation.is_some() {
                        record.mark_degraded(stage);
                    }
                    record.detected_boxes = Some(result.result);
                    true
                }
            }
            StageOutput::Segmentation(result) => {
                if record.segmentation.is_some() {
                    false
                } else {
                    if result.degradation.is_some() || !result.result.subject_found {
                        record.mark_degraded(stage);
                    }
                    record.segmentation = Some(result.result);
                    true
                }
            }
            StageOutput::Palette(result) => {
                if record.palette.is_some() {
                    false
                } else {
                    if result.degradation.is_some() {
                        record.mark_degraded(stage);
                    }
                    record.palette = Some(result.result);
                    true
                }
            }
        };

        if applied {
            derive_for_display(&mut record, &self.config);
            if record.phase == RecordPhase::AnalysisRunning && record.analysis_finished() {
                record.phase = RecordPhase::AnalysisComplete;
                info!("Analysis complete for record {}", record.id);
            }
        }
        applied
    }
}

/// Runs the display-size joins that are due. Each runs once per distinct
/// size; returning to a size already handled restores what it produced.
fn derive_for_display(record: &mut ReviewRecord, config: &ReviewConfig) {
    let Some(display_size) = record.display_size else {
        return;
    };

    if record.reconciled_for != Some(display_size) {
        let cached = record
            .reconciled
            .iter()
            .find(|(size, _)| *size == display_size)
            .map(|(_, boxes)| boxes.clone());

        if let Some(boxes) = cached {
            record.text_boxes = boxes;
            record.reconciled_for = Some(display_size);
            relocate_title(record);
        } else if let Some(detected) = record.detected_boxes.as_deref() {
            let reconciliation = reconcile(
                detected,
                display_size,
                config.reconcile.confidence_threshold,
                !record.auto_title,
            );
            record
                .reconciled
                .push((display_size, reconciliation.boxes.clone()));
            record.text_boxes = reconciliation.boxes;
            record.reconciled_for = Some(display_size);
            record.reconciliations += 1;

            match reconciliation.suggested_title {
                Some(suggested) => {
                    debug!("Suggesting title {:?} for record {}", suggested.text, record.id);
                    record.name = suggested.text.clone();
                    record.title = Some(suggested);
                }
                None => relocate_title(record),
            }
        }
    }

    if record.cropped_for != Some(display_size) {
        let cached = record
            .crops
            .iter()
            .find(|(size, _)| *size == display_size)
            .map(|(_, bounds)| *bounds);

        if let Some(bounds) = cached {
            record.crop_bounds = bounds;
            record.cropped_for = Some(display_size);
        } else if let Some(segmentation) = &record.segmentation {
            let bounds = crop_bounds(segmentation, display_size);
            record.crops.push((display_size, bounds));
            record.crop_bounds = bounds;
            record.cropped_for = Some(display_size);
        }
    }
}

/// A chosen title follows its box into the current display space.
fn relocate_title(record: &mut ReviewRecord) {
    let relocated = record
        .title
        .as_ref()
        .and_then(|title| record.text_boxes.iter().find(|b| b.id == title.id).cloned());
    if relocated.is_some() {
        record.title = relocated;
    }
}

pub struct AnalysisOrchestrator {
    id: RecordId,
    shared: SharedRecord,
    backends: AnalysisBackends,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisOrchestrator {
    pub fn new(record: ReviewRecord, backends: AnalysisBackends, config: Arc<ReviewConfig>) -> Self {
        Self {
            id: record.id,
            shared: SharedRecord {
                inner: Arc::new(Mutex::new(record)),
                config,
            },
            backends,
            cancel_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Consistent copy of the record as it is right now.
    pub fn snapshot(&self) -> ReviewRecord {
        self.shared.lock().clone()
    }

    pub fn phase(&self) -> RecordPhase {
        self.shared.lock().phase
    }

    /// Spawns the analysis stages. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let (epoch, image) = {
            let mut record = self.shared.lock();
            if record.phase != RecordPhase::Created {
                return;
            }
            record.phase = RecordPhase::AnalysisRunning;
            (record.epoch, record.image.clone())
        };
        debug!("Starting analysis for record {}", self.id);

        let palette_count = self.shared.config.palette.color_count;
        let (layer_tx, layer_rx) = oneshot::channel();

        let handles = vec![
            tokio::spawn(run_text_detection(
                self.shared.clone(),
                self.backends.text.clone(),
                image.clone(),
                epoch,
                self.cancel_token.clone(),
            )),
            tokio::spawn(run_segmentation(
                self.shared.clone(),
                self.backends.segmenter.clone(),
                image,
                epoch,
                self.cancel_token.clone(),
                layer_tx,
            )),
            tokio::spawn(run_palette(
                self.shared.clone(),
                self.backends.quantizer.clone(),
                palette_count,
                epoch,
                self.cancel_token.clone(),
                layer_rx,
            )),
        ];

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    /// Waits for every stage task started so far.
    pub async fn wait_for_analysis(&self) {
        let handles: Vec<_> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Analysis task for record {} panicked: {}", self.id, e);
                }
            }
        }
    }

    /// Reports the rendered display size. Returns true when this size still
    /// needs deriving, false for a repeat, a degenerate size, or a size
    /// already handled earlier, whose stored results are put back in place.
    pub fn request_for_processing(&self, display_size: Size) -> bool {
        if display_size.is_degenerate() {
            debug!("Ignoring degenerate display size {:?}", display_size);
            return false;
        }

        let mut record = self.shared.lock();
        if record.phase.is_terminal() || record.display_size == Some(display_size) {
            return false;
        }

        let handled = record.reconciled.iter().any(|(size, _)| *size == display_size)
            && record.crops.iter().any(|(size, _)| *size == display_size);
        record.display_size = Some(display_size);
        derive_for_display(&mut record, &self.shared.config);
        !handled
    }

    /// Tapping the current title clears it, tapping any other box makes it the
    /// title. Either way automatic suggestion is off for good.
    pub fn did_tap_bounding_box(&self, tapped: &BoundingBox) {
        let mut record = self.shared.lock();
        if record.phase.is_terminal() {
            return;
        }
        record.auto_title = false;
        record.edited_by_user = true;

        let is_current = record.title.as_ref().map(|title| title.id) == Some(tapped.id);
        if is_current {
            record.title = None;
            record.name.clear();
        } else {
            record.title = Some(tapped.clone());
            record.name = tapped.text.clone();
        }
    }

    pub fn assign_folder(&self, folder: FolderRef) {
        self.edit(|record| record.folder = Some(folder));
    }

    /// A typed name is a user choice too, so it also stops title suggestions.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.edit(|record| {
            record.auto_title = false;
            record.name = name;
        });
    }

    pub fn set_description(&self, description: impl Into<String>) {
        let description = description.into();
        self.edit(|record| record.description = description);
    }

    pub fn set_include_segmented(&self, include: bool) {
        self.edit(|record| record.include_segmented = include);
    }

    fn edit(&self, change: impl FnOnce(&mut ReviewRecord)) {
        let mut record = self.shared.lock();
        if record.phase.is_terminal() {
            return;
        }
        change(&mut record);
        record.edited_by_user = true;
    }

    /// Discards the record. Outstanding stages stop and anything they still
    /// produce is dropped. Returns false if the record is being saved, was
    /// already saved, or was already cancelled.
    pub fn cancel(&self) -> bool {
        {
            let mut record = self.shared.lock();
            if record.phase.is_terminal() || record.phase == RecordPhase::Saving {
                debug!("Record {} is {:?}, not cancelling", self.id, record.phase);
                return false;
            }
            record.phase = RecordPhase::Cancelled;
            record.epoch = next_epoch();
        }
        self.cancel_token.cancel();
        info!("Cancelled record {}", self.id);
        true
    }

    /// Persists the record through `store`. Fails with a validation error,
    /// before touching the store, when no folder is assigned.
    pub async fn save(&self, store: &dyn Persistence) -> Result<Uuid, ReviewError> {
        let draft = {
            let mut record = self.shared.lock();
            match record.phase {
                RecordPhase::Cancelled => return Err(ReviewError::Cancelled),
                RecordPhase::Saved => {
                    if let Some(id) = record.persisted_id() {
                        return Ok(id);
                    }
                }
                RecordPhase::Saving => {
                    return Err(ReviewError::Validation(
                        "a save is already in progress".to_string(),
                    ))
                }
                _ => {}
            }

            let folder = record.folder.clone().ok_or_else(|| {
                ReviewError::Validation("a folder must be assigned before saving".to_string())
            })?;

            let id = match record.identity {
                RecordIdentity::Existing(id) | RecordIdentity::New(Some(id)) => id,
                RecordIdentity::New(None) => {
                    let id = Uuid::new_v4();
                    record.identity = RecordIdentity::New(Some(id));
                    id
                }
            };

            record.phase = RecordPhase::Saving;
            SaveDraft {
                id,
                folder,
                name: record.name.clone(),
                description: record.description.clone(),
                image: record.image.clone(),
                subject: record
                    .segmentation
                    .as_ref()
                    .map(|segmentation| segmentation.active.clone()),
                colors: record
                    .palette
                    .iter()
                    .flatten()
                    .map(|color| color.id)
                    .collect(),
            }
        };

        let result = draft.persist(store).await;

        // Only this call moves a record out of `Saving`; cancel refuses it.
        let mut record = self.shared.lock();
        match &result {
            Ok(id) => {
                info!("Saved record {} as {}", self.id, id);
                record.phase = RecordPhase::Saved;
                record.identity = RecordIdentity::Existing(*id);
                drop(record);
                self.cancel_token.cancel();
            }
            Err(e) => {
                error!("Failed to save record {}: {}", self.id, e);
                record.phase = RecordPhase::SaveFailed;
            }
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn epoch(&self) -> u64 {
        self.shared.lock().epoch
    }

    #[cfg(test)]
    pub(crate) fn apply(&self, epoch: u64, output: StageOutput) -> bool {
        self.shared.apply(epoch, output)
    }
}

impl Drop for AnalysisOrchestrator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// What a save writes. `subject` is the active layer of whatever segmentation
/// landed, the identity fallback included, and is stored trimmed.
struct SaveDraft {
    id: Uuid,
    folder: FolderRef,
    name: String,
    description: String,
    image: RawImage,
    subject: Option<Arc<image::RgbaImage>>,
    colors: Vec<u32>,
}

impl SaveDraft {
    async fn persist(self, store: &dyn Persistence) -> Result<Uuid, ReviewError> {
        let original = store.write_image(self.image.image(), self.id, true).await?;

        let modified = match self.subject.as_deref().and_then(trim_transparent) {
            Some(cutout) => Some(
                store
                    .write_image(&DynamicImage::ImageRgba8(cutout), self.id, false)
                    .await?,
            ),
            None => None,
        };

        let entry = PersistedEntry {
            id: self.id,
            name: self.name,
            description: self.description,
            date: Utc::now(),
            folder: Some(self.folder),
            original,
            modified,
            colors: self.colors,
        };
        Ok(store.save(entry).await?)
    }
}

async fn run_text_detection(
    shared: SharedRecord,
    detector: Arc<dyn TextDetector>,
    image: RawImage,
    epoch: u64,
    cancel_token: CancellationToken,
) {
    let start = Instant::now();
    let outcome = tokio::select! {
        _ = cancel_token.cancelled() => return,
        outcome = detector.detect(&image) => outcome,
    };

    let result = match outcome {
        Ok(boxes) => StageResult::ok(boxes),
        Err(e) => {
            warn!("{} text detection failed, continuing without text: {}", detector.name(), e);
            StageResult::degraded(Vec::new(), e)
        }
    }
    .with_timing(start);

    debug!(
        "{} found {} text boxes in {}us",
        detector.name(),
        result.result.len(),
        result.processing_time_us
    );
    shared.apply(epoch, StageOutput::TextBoxes(result));
}

async fn run_segmentation(
    shared: SharedRecord,
    segmenter: Arc<dyn Segmenter>,
    image: RawImage,
    epoch: u64,
    cancel_token: CancellationToken,
    layer_tx: oneshot::Sender<Arc<image::RgbaImage>>,
) {
    let start = Instant::now();
    let outcome = tokio::select! {
        _ = cancel_token.cancelled() => return,
        outcome = segmenter.segment(&image) => outcome,
    };

    let result = match outcome {
        Ok(segmentation) => StageResult::ok(segmentation),
        Err(e) => {
            warn!("{} segmentation failed, using the original: {}", segmenter.name(), e);
            StageResult::degraded(SegmentedImage::identity(image.image().clone()), e)
        }
    }
    .with_timing(start);

    debug!(
        "{} segmentation finished in {}us (subject found: {})",
        segmenter.name(),
        result.processing_time_us,
        result.result.subject_found
    );

    let active = result.result.active.clone();
    if shared.apply(epoch, StageOutput::Segmentation(result)) {
        // The palette task ends on its own if the receiver is already gone.
        let _ = layer_tx.send(active);
    }
}

async fn run_palette(
    shared: SharedRecord,
    quantizer: Arc<dyn Quantizer>,
    count: usize,
    epoch: u64,
    cancel_token: CancellationToken,
    layer_rx: oneshot::Receiver<Arc<image::RgbaImage>>,
) {
    let layer = tokio::select! {
        _ = cancel_token.cancelled() => return,
        layer = layer_rx => match layer {
            Ok(layer) => layer,
            Err(_) => {
                debug!("Segmentation did not land, skipping palette");
                return;
            }
        },
    };

    let start = Instant::now();
    let outcome = tokio::select! {
        _ = cancel_token.cancelled() => return,
        outcome = quantizer.palette(layer, count) => outcome,
    };

    let result = match outcome {
        Ok(palette) => StageResult::ok(palette),
        Err(e) => {
            warn!("{} palette extraction failed: {}", quantizer.name(), e);
            StageResult::degraded(Vec::new(), e)
        }
    }
    .with_timing(start);

    debug!(
        "{} extracted {} colors in {}us",
        quantizer.name(),
        result.result.len(),
        result.processing_time_us
    );
    shared.apply(epoch, StageOutput::Palette(result));
}
