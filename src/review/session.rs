use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::orchestrator::AnalysisOrchestrator;
use super::record::{RecordId, ReviewRecord};
use crate::analysis::AnalysisBackends;
use crate::common::RawImage;
use crate::config::ReviewConfig;
use crate::error::ReviewError;
use crate::persistence::{PersistedEntry, Persistence};

/// Outcome of one `save_all`, in record order.
#[derive(Debug)]
pub struct SaveReport {
    pub outcomes: Vec<(RecordId, Result<Uuid, ReviewError>)>,
}

impl SaveReport {
    pub fn saved(&self) -> impl Iterator<Item = (RecordId, Uuid)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(record, result)| result.as_ref().ok().map(|id| (*record, *id)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (RecordId, &ReviewError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(record, result)| result.as_ref().err().map(|e| (*record, e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, result)| result.is_ok())
    }
}

/// Ordered set of records under review, one per intake image.
pub struct ReviewSession {
    records: IndexMap<RecordId, AnalysisOrchestrator>,
    current: Option<RecordId>,
    backends: AnalysisBackends,
    config: Arc<ReviewConfig>,
}

impl ReviewSession {
    pub fn new(backends: AnalysisBackends, config: ReviewConfig) -> Self {
        Self {
            records: IndexMap::new(),
            current: None,
            backends,
            config: Arc::new(config),
        }
    }

    /// Builds one record per image and starts its analysis. Does nothing if
    /// the session already holds records.
    pub fn create_from_images(&mut self, images: Vec<RawImage>) {
        if !self.records.is_empty() {
            debug!("Session already populated, ignoring {} images", images.len());
            return;
        }

        for (page, image) in images.into_iter().enumerate() {
            self.insert(ReviewRecord::fresh(image, page));
        }
        self.current = self.records.keys().next().copied();
        info!("Created {} records", self.records.len());
    }

    /// Starts a single-record session for editing a stored entry.
    pub async fn create_from_existing_entry(
        &mut self,
        entry: &PersistedEntry,
        store: &dyn Persistence,
    ) -> Result<RecordId, ReviewError> {
        if !self.records.is_empty() {
            return Err(ReviewError::Validation(
                "an edit session needs an empty review session".to_string(),
            ));
        }
        if entry.folder.is_none() {
            return Err(ReviewError::Validation(format!(
                "entry {} has no folder",
                entry.id
            )));
        }

        let image = store.load_image(&entry.original).await?;
        let id = self.insert(ReviewRecord::rehydrated(entry, image));
        self.current = Some(id);
        info!("Editing entry {} as record {}", entry.id, id);
        Ok(id)
    }

    fn insert(&mut self, record: ReviewRecord) -> RecordId {
        let id = record.id;
        let orchestrator =
            AnalysisOrchestrator::new(record, self.backends.clone(), self.config.clone());
        orchestrator.start();
        self.records.insert(id, orchestrator);
        id
    }

    /// Cancels every record and empties the session.
    pub fn reset(&mut self) {
        for orchestrator in self.records.values() {
            orchestrator.cancel();
        }
        self.records.clear();
        self.current = None;
    }

    /// Cancels one record and removes it from the session. The cancelled
    /// record is handed back; it ignores any analysis still in flight.
    pub fn discard(&mut self, id: RecordId) -> Option<AnalysisOrchestrator> {
        let index = self.records.get_index_of(&id)?;
        let orchestrator = self.records.shift_remove(&id)?;
        orchestrator.cancel();

        if self.current == Some(id) {
            let next = index.min(self.records.len().saturating_sub(1));
            self.current = self.records.get_index(next).map(|(id, _)| *id);
        }
        Some(orchestrator)
    }

    /// Makes record `index` current. Selecting the last index of a
    /// single-record session changes nothing.
    pub fn select_index(&mut self, index: usize) -> Result<(), ReviewError> {
        let len = self.records.len();
        if index >= len {
            return Err(ReviewError::IndexOutOfRange { index, len });
        }
        if len == 1 {
            return Ok(());
        }
        self.current = self.records.get_index(index).map(|(id, _)| *id);
        Ok(())
    }

    pub fn current(&self) -> Option<&AnalysisOrchestrator> {
        self.current.and_then(|id| self.records.get(&id))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current.and_then(|id| self.records.get_index_of(&id))
    }

    pub fn get(&self, id: RecordId) -> Option<&AnalysisOrchestrator> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &AnalysisOrchestrator> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub async fn wait_for_analysis(&self) {
        join_all(self.records.values().map(|o| o.wait_for_analysis())).await;
    }

    /// Saves every record concurrently. Saved records leave the session,
    /// failed ones stay so they can be retried.
    pub async fn save_all(&mut self, store: &dyn Persistence) -> SaveReport {
        let results = join_all(self.records.values().map(|o| o.save(store))).await;
        let outcomes: Vec<_> = self.records.keys().copied().zip(results).collect();

        let report = SaveReport { outcomes };
        for (record, e) in report.failed() {
            warn!("Record {} was not saved: {}", record, e);
        }

        let saved: Vec<RecordId> = report.saved().map(|(record, _)| record).collect();
        for record in &saved {
            self.records.shift_remove(record);
        }
        if self.current.is_some_and(|id| !self.records.contains_key(&id)) {
            self.current = self.records.keys().next().copied();
        }

        info!(
            "Saved {} of {} records",
            saved.len(),
            report.outcomes.len()
        );
        report
    }
}

impl Drop for ReviewSession {
    fn drop(&mut self) {
        for orchestrator in self.records.values() {
            orchestrator.cancel();
        }
    }
}
