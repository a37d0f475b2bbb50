//! Per-session dataset registry.
//!
//! Pure bookkeeping over a session's datasets: label uniqueness, the active
//! pointer, derivation links, creation-ordered listing. The registry never
//! talks to the store or the engine; the session layer materializes storage
//! objects first and registers the finished record, so a failed operation
//! leaves the registry untouched.
//!
//! All mutation happens under the owning session's exclusive lock.

use crate::dataset::{Dataset, DatasetSummary, Label};
use crate::error::{ServiceError, ServiceResult};
use std::collections::HashMap;

/// One page of dataset summaries, ordered by creation time ascending.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatasetPage {
    pub items: Vec<DatasetSummary>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub has_more: bool,
}

/// In-memory index of the datasets belonging to one session.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    datasets: HashMap<Label, Dataset>,
    /// Labels in creation order; the listing order
    order: Vec<Label>,
    /// Default target for operations that omit an explicit label.
    /// None when the session is empty or the active dataset was deleted.
    active: Option<Label>,
    /// Per-session counter feeding auto-generated labels
    auto_counter: u64,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        DatasetRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.datasets.contains_key(label)
    }

    /// Label of the active dataset, if one is defined.
    pub fn active_label(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Resolve the target dataset: the explicit label if given, otherwise the
    /// session's active dataset.
    pub fn resolve(&self, label: Option<&str>) -> ServiceResult<&Dataset> {
        match label {
            Some(label) => self
                .datasets
                .get(label)
                .ok_or_else(|| ServiceError::DatasetNotFound(label.to_string())),
            None => {
                let active = self.active.as_ref().ok_or(ServiceError::NoActiveDataset)?;
                // The active pointer only ever holds a registered label
                self.datasets
                    .get(active)
                    .ok_or(ServiceError::NoActiveDataset)
            }
        }
    }

    /// Look up a dataset by explicit label.
    pub fn get(&self, label: &str) -> ServiceResult<&Dataset> {
        self.resolve(Some(label))
    }

    /// Register a finished dataset record and make it the active dataset.
    ///
    /// Fails with `LabelConflict` if the label is taken; the registry is not
    /// modified in that case.
    pub fn register(&mut self, dataset: Dataset) -> ServiceResult<&Dataset> {
        if self.datasets.contains_key(&dataset.label) {
            return Err(ServiceError::LabelConflict(dataset.label));
        }
        let label = dataset.label.clone();
        self.order.push(label.clone());
        self.active = Some(label.clone());
        Ok(self
            .datasets
            .entry(label)
            .or_insert(dataset))
    }

    /// Point the active dataset at an existing label.
    pub fn set_active(&mut self, label: &str) -> ServiceResult<()> {
        if !self.datasets.contains_key(label) {
            return Err(ServiceError::DatasetNotFound(label.to_string()));
        }
        self.active = Some(label.to_string());
        Ok(())
    }

    /// Remove a dataset entry, returning the record so the caller can drop
    /// its storage object. Deleting the active dataset leaves the active
    /// pointer undefined; it is never reassigned to an arbitrary sibling.
    pub fn remove(&mut self, label: &str) -> ServiceResult<Dataset> {
        let dataset = self
            .datasets
            .remove(label)
            .ok_or_else(|| ServiceError::DatasetNotFound(label.to_string()))?;
        self.order.retain(|l| l != label);
        if self.active.as_deref() == Some(label) {
            self.active = None;
        }
        Ok(dataset)
    }

    /// Remove every dataset, in creation order, for session teardown.
    pub fn drain(&mut self) -> Vec<Dataset> {
        let order = std::mem::take(&mut self.order);
        self.active = None;
        order
            .into_iter()
            .filter_map(|label| self.datasets.remove(&label))
            .collect()
    }

    /// Page through dataset summaries in creation order. `page` is 1-based;
    /// `per_page` is clamped to `max_page_size`.
    pub fn list(&self, page: usize, per_page: usize, max_page_size: usize) -> DatasetPage {
        let per_page = per_page.clamp(1, max_page_size.max(1));
        let page = page.max(1);
        let total = self.order.len();
        let start = (page - 1).saturating_mul(per_page);

        let items: Vec<DatasetSummary> = self
            .order
            .iter()
            .skip(start)
            .take(per_page)
            .filter_map(|label| self.datasets.get(label))
            .map(Dataset::summary)
            .collect();

        DatasetPage {
            has_more: start + items.len() < total,
            items,
            page,
            per_page,
            total,
        }
    }

    /// Produce a label no existing dataset in this session holds.
    ///
    /// Derived datasets get `<parent>-<n>`, ingested ones `dataset-<n>`,
    /// where `n` is a session-scoped counter. A collision with a
    /// client-chosen label advances the counter and retries, bounded by
    /// `retry_limit`.
    pub fn next_auto_label(
        &mut self,
        parent: Option<&str>,
        retry_limit: usize,
    ) -> ServiceResult<Label> {
        let base = parent.unwrap_or("dataset");
        for _ in 0..retry_limit.max(1) {
            self.auto_counter += 1;
            let candidate = format!("{base}-{}", self.auto_counter);
            if !self.datasets.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ServiceError::LabelConflict(format!(
            "{base}-{}",
            self.auto_counter
        )))
    }
}
