use image::{DynamicImage, GenericImageView};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::orientation::{read_exif_orientation, OrientationNormalizer};
use crate::common::Size;
use crate::error::ReviewError;

/// Decoded, upright pixels of one intake photo. Cloning shares the buffer.
#[derive(Clone)]
pub struct RawImage {
    id: Uuid,
    image: Arc<DynamicImage>,
}

impl RawImage {
    /// Wraps pixels that are already upright.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            id: Uuid::new_v4(),
            image: Arc::new(image),
        }
    }

    /// Decodes encoded bytes and applies their EXIF orientation.
    pub fn decode(bytes: &[u8]) -> Result<Self, ReviewError> {
        let image = image::load_from_memory(bytes)?;
        let orientation = read_exif_orientation(bytes);
        Ok(Self::new(OrientationNormalizer::normalize(image, orientation)))
    }

    pub fn open(path: &Path) -> Result<Self, ReviewError> {
        let bytes = std::fs::read(path).map_err(image::ImageError::IoError)?;
        Self::decode(&bytes)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &Arc<DynamicImage> {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn size(&self) -> Size {
        Size::from(self.dimensions())
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("RawImage")
            .field("id", &self.id)
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}
