use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::{stored_name, FolderDirectory, FolderRef, PersistedEntry, Persistence};
use crate::common::RawImage;
use crate::error::PersistenceError;

const IMAGES_DIR: &str = "images";
const ENTRIES_DIR: &str = "entries";

/// Stores images as PNG files and entries as JSON documents under one root.
pub struct DirectoryStore {
    root: PathBuf,
    folders: Vec<FolderRef>,
}

impl DirectoryStore {
    pub async fn open(root: impl Into<PathBuf>, folders: Vec<FolderRef>) -> Result<Self, PersistenceError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(IMAGES_DIR)).await?;
        tokio::fs::create_dir_all(root.join(ENTRIES_DIR)).await?;
        info!("Opened directory store at {}", root.display());
        Ok(Self { root, folders })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn image_path(&self, name: &str) -> PathBuf {
        self.root.join(IMAGES_DIR).join(name)
    }

    fn entry_path(&self, id: Uuid) -> PathBuf {
        self.root.join(ENTRIES_DIR).join(format!("{}.json", id))
    }

    pub async fn load_entry(&self, id: Uuid) -> Result<PersistedEntry, PersistenceError> {
        let path = self.entry_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Persistence for DirectoryStore {
    async fn save(&self, entry: PersistedEntry) -> Result<Uuid, PersistenceError> {
        let id = entry.id;
        let json = serde_json::to_vec_pretty(&entry)?;
        tokio::fs::write(self.entry_path(id), json).await?;
        debug!("Wrote entry {}", id);
        Ok(id)
    }

    async fn load_image(&self, name: &str) -> Result<RawImage, PersistenceError> {
        let path = self.image_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        // Stored images were normalized before they were written.
        Ok(RawImage::new(image::load_from_memory(&bytes)?))
    }

    async fn write_image(
        &self,
        image: &DynamicImage,
        id: Uuid,
        is_original: bool,
    ) -> Result<String, PersistenceError> {
        let name = stored_name(id, is_original);
        let path = self.image_path(&name);
        let image = image.clone();

        tokio::task::spawn_blocking(move || image.save_with_format(path, ImageFormat::Png))
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;

        debug!("Wrote image {}", name);
        Ok(name)
    }
}

impl FolderDirectory for DirectoryStore {
    fn folders(&self) -> Vec<FolderRef> {
        self.folders.clone()
    }
}
