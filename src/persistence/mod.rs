pub mod directory;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::RawImage;
use crate::error::PersistenceError;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// Identity of a folder owned by the folder directory. Records only borrow it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: Uuid,
    pub name: String,
}

impl FolderRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// What a save hands to the store, and what an edit session is rehydrated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub folder: Option<FolderRef>,
    /// Stored name of the upright original.
    pub original: String,
    /// Stored name of the trimmed subject cutout, when one was segmented.
    pub modified: Option<String>,
    /// Packed `0xRRGGBB` palette ids, most dominant first.
    pub colors: Vec<u32>,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, entry: PersistedEntry) -> Result<Uuid, PersistenceError>;
    async fn load_image(&self, name: &str) -> Result<RawImage, PersistenceError>;
    async fn write_image(
        &self,
        image: &DynamicImage,
        id: Uuid,
        is_original: bool,
    ) -> Result<String, PersistenceError>;
}

/// Supplies the folders a record can be filed under.
pub trait FolderDirectory: Send + Sync {
    fn folders(&self) -> Vec<FolderRef>;

    fn folder(&self, id: Uuid) -> Option<FolderRef> {
        self.folders().into_iter().find(|folder| folder.id == id)
    }
}

pub(crate) fn stored_name(id: Uuid, is_original: bool) -> String {
    let kind = if is_original { "original" } else { "modified" };
    format!("{}-{}.png", id, kind)
}
