use async_trait::async_trait;
use image::DynamicImage;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use super::{stored_name, FolderDirectory, FolderRef, PersistedEntry, Persistence};
use crate::common::RawImage;
use crate::error::PersistenceError;

/// Keeps everything in process memory. Entries can be made to fail by name.
#[derive(Default)]
pub struct MemoryStore {
    folders: Vec<FolderRef>,
    images: Mutex<HashMap<String, DynamicImage>>,
    entries: Mutex<IndexMap<Uuid, PersistedEntry>>,
    rejected_names: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folders(mut self, folders: Vec<FolderRef>) -> Self {
        self.folders = folders;
        self
    }

    /// Every later `save` of an entry with this name is rejected.
    pub fn reject_entries_named(&self, name: impl Into<String>) {
        guard(&self.rejected_names).insert(name.into());
    }

    pub fn entries(&self) -> Vec<PersistedEntry> {
        guard(&self.entries).values().cloned().collect()
    }

    pub fn entry(&self, id: Uuid) -> Option<PersistedEntry> {
        guard(&self.entries).get(&id).cloned()
    }

    pub fn has_image(&self, name: &str) -> bool {
        guard(&self.images).contains_key(name)
    }

    /// Number of persistence calls of any kind received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn save(&self, entry: PersistedEntry) -> Result<Uuid, PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if guard(&self.rejected_names).contains(&entry.name) {
            return Err(PersistenceError::Rejected(format!(
                "entry {} is not accepted",
                entry.name
            )));
        }

        let id = entry.id;
        debug!("Storing entry {} in memory", id);
        guard(&self.entries).insert(id, entry);
        Ok(id)
    }

    async fn load_image(&self, name: &str) -> Result<RawImage, PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        guard(&self.images)
            .get(name)
            .cloned()
            .map(RawImage::new)
            .ok_or_else(|| PersistenceError::NotFound(name.to_string()))
    }

    async fn write_image(
        &self,
        image: &DynamicImage,
        id: Uuid,
        is_original: bool,
    ) -> Result<String, PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = stored_name(id, is_original);
        guard(&self.images).insert(name.clone(), image.clone());
        Ok(name)
    }
}

impl FolderDirectory for MemoryStore {
    fn folders(&self) -> Vec<FolderRef> {
        self.folders.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{GenericImageView, ImageBuffer, Rgb};

    fn entry(name: &str) -> PersistedEntry {
        PersistedEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            date: Utc::now(),
            folder: None,
            original: "x.png".to_string(),
            modified: None,
            colors: vec![0xFF0000],
        }
    }

    #[tokio::test]
    async fn round_trips_images_by_stored_name() {
        let store = MemoryStore::new();
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(3, 2, Rgb([1, 2, 3])));
        let id = Uuid::new_v4();

        let name = store.write_image(&img, id, true).await.unwrap();
        assert!(name.ends_with("-original.png"));
        let loaded = store.load_image(&name).await.unwrap();
        assert_eq!(loaded.image().dimensions(), (3, 2));
        assert!(matches!(
            store.load_image("missing.png").await,
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_named_entries_only() {
        let store = MemoryStore::new();
        store.reject_entries_named("bad");
        assert!(store.save(entry("bad")).await.is_err());
        assert!(store.save(entry("good")).await.is_ok());
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.calls(), 2);
    }

    #[test]
    fn looks_up_folders_by_id() {
        let kitchen = FolderRef::new("Kitchen");
        let store = MemoryStore::new().with_folders(vec![FolderRef::new("Books"), kitchen.clone()]);
        assert_eq!(store.folder(kitchen.id), Some(kitchen));
        assert_eq!(store.folder(Uuid::new_v4()), None);
    }
}
