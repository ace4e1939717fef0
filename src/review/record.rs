use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::{BoundingBox, PaletteColor, SegmentedImage, Stage};
use crate::common::{RawImage, Rect, Size};
use crate::persistence::{FolderRef, PersistedEntry};

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Hands out a token no other record, or earlier incarnation of this one, has held.
pub(crate) fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPhase {
    Created,
    AnalysisRunning,
    AnalysisComplete,
    Saving,
    Saved,
    SaveFailed,
    Cancelled,
}

impl RecordPhase {
    /// No analysis result or user edit may land on a record in these phases.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordPhase::Saved | RecordPhase::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordIdentity {
    /// Never persisted. Holds the id picked on the first save attempt, if any.
    New(Option<Uuid>),
    Existing(Uuid),
}

/// Everything known about one photo while it is under review.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub id: RecordId,
    pub image: RawImage,
    pub page: usize,
    pub identity: RecordIdentity,
    pub phase: RecordPhase,

    pub name: String,
    pub description: String,
    pub folder: Option<FolderRef>,

    /// Full detector output, detector space.
    pub detected_boxes: Option<Vec<BoundingBox>>,
    /// Confident boxes in display pixels.
    pub text_boxes: Vec<BoundingBox>,
    pub title: Option<BoundingBox>,

    pub segmentation: Option<SegmentedImage>,
    pub include_segmented: bool,
    pub palette: Option<Vec<PaletteColor>>,
    pub crop_bounds: Option<Rect>,

    pub display_size: Option<Size>,
    pub edited_by_user: bool,
    pub degraded: Vec<Stage>,
    pub reconciliations: u32,

    pub(crate) epoch: u64,
    pub(crate) auto_title: bool,
    /// Size the current `text_boxes` were reconciled for.
    pub(crate) reconciled_for: Option<Size>,
    pub(crate) cropped_for: Option<Size>,
    /// Every display size already reconciled, with the boxes it produced.
    pub(crate) reconciled: Vec<(Size, Vec<BoundingBox>)>,
    pub(crate) crops: Vec<(Size, Option<Rect>)>,
}

impl ReviewRecord {
    pub fn fresh(image: RawImage, page: usize) -> Self {
        Self {
            id: RecordId::new(),
            image,
            page,
            identity: RecordIdentity::New(None),
            phase: RecordPhase::Created,
            name: String::new(),
            description: String::new(),
            folder: None,
            detected_boxes: None,
            text_boxes: Vec::new(),
            title: None,
            segmentation: None,
            include_segmented: false,
            palette: None,
            crop_bounds: None,
            display_size: None,
            edited_by_user: false,
            degraded: Vec::new(),
            reconciliations: 0,
            epoch: next_epoch(),
            auto_title: true,
            reconciled_for: None,
            cropped_for: None,
            reconciled: Vec::new(),
            crops: Vec::new(),
        }
    }

    /// Record for editing a stored entry. Its name was already chosen, so no
    /// title is ever suggested for it.
    pub fn rehydrated(entry: &PersistedEntry, image: RawImage) -> Self {
        Self {
            identity: RecordIdentity::Existing(entry.id),
            name: entry.name.clone(),
            description: entry.description.clone(),
            folder: entry.folder.clone(),
            auto_title: false,
            ..Self::fresh(image, 0)
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self.identity, RecordIdentity::New(_))
    }

    pub fn persisted_id(&self) -> Option<Uuid> {
        match self.identity {
            RecordIdentity::Existing(id) => Some(id),
            RecordIdentity::New(_) => None,
        }
    }

    /// The layer currently presented as "the segmented image".
    pub fn segmented(&self) -> Option<&Arc<RgbaImage>> {
        self.segmentation.as_ref().map(|segmentation| {
            if self.include_segmented {
                &segmentation.active
            } else {
                &segmentation.inactive
            }
        })
    }

    pub fn analysis_finished(&self) -> bool {
        self.detected_boxes.is_some() && self.segmentation.is_some() && self.palette.is_some()
    }

    pub fn title_suggestions_enabled(&self) -> bool {
        self.auto_title
    }

    pub(crate) fn mark_degraded(&mut self, stage: Stage) {
        if !self.degraded.contains(&stage) {
            self.degraded.push(stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn raw() -> RawImage {
        RawImage::new(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
            4,
            4,
            Rgb([0, 0, 0]),
        )))
    }

    #[test]
    fn every_record_gets_its_own_epoch() {
        let a = ReviewRecord::fresh(raw(), 0);
        let b = ReviewRecord::fresh(raw(), 1);
        assert_ne!(a.epoch, b.epoch);
        assert_ne!(a.id, b.id);
        assert!(a.is_new());
        assert_eq!(a.persisted_id(), None);
    }

    #[test]
    fn rehydrated_record_is_bound_and_never_suggests() {
        let entry = PersistedEntry {
            id: Uuid::new_v4(),
            name: "Old name".to_string(),
            description: "kept".to_string(),
            date: Utc::now(),
            folder: Some(FolderRef::new("Recipes")),
            original: "a.png".to_string(),
            modified: None,
            colors: Vec::new(),
        };
        let record = ReviewRecord::rehydrated(&entry, raw());
        assert_eq!(record.persisted_id(), Some(entry.id));
        assert_eq!(record.name, "Old name");
        assert_eq!(record.folder, entry.folder);
        assert!(!record.title_suggestions_enabled());
    }

    #[test]
    fn segmented_follows_include_toggle() {
        let mut record = ReviewRecord::fresh(raw(), 0);
        assert!(record.segmented().is_none());

        let mut segmentation = SegmentedImage::identity(record.image.image().clone());
        segmentation.active = Arc::new(ImageBuffer::from_pixel(1, 1, image::Rgba([1, 1, 1, 1])));
        record.segmentation = Some(segmentation);

        assert_eq!(record.segmented().unwrap().dimensions(), (4, 4));
        record.include_segmented = true;
        assert_eq!(record.segmented().unwrap().dimensions(), (1, 1));
    }
}
