pub mod analysis;
pub mod common;
pub mod config;
pub mod error;
pub mod persistence;
pub mod review;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::{AnalysisBackends, BoundingBox, PaletteColor, SegmentedImage, Stage};
pub use common::{RawImage, Rect, Size};
pub use config::ReviewConfig;
pub use error::{PersistenceError, ReviewError};
pub use persistence::{DirectoryStore, FolderRef, MemoryStore, PersistedEntry, Persistence};
pub use review::{AnalysisOrchestrator, RecordId, RecordPhase, ReviewRecord, ReviewSession};
