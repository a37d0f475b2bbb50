//! Session Manager for the dataset lifecycle core.
//!
//! Owns the set of live sessions and orchestrates everything a request does
//! to one: resolve/refresh, ingest, apply an operation, export, delete,
//! teardown. Each session holds its own dataset registry and working
//! directory; sessions are fully independent units of concurrency.
//!
//! ## Architecture
//!
//! ```text
//! SessionManager
//! ├── Sessions (RwLock<HashMap<Token, Arc<SessionEntry>>>)
//! │   └── SessionEntry
//! │       ├── last_activity (idle clock, readable without the session lock)
//! │       └── Mutex<SessionState>
//! │           ├── DatasetRegistry (labels, active pointer, lineage)
//! │           └── working directory, timestamps
//! ├── DatasetStore adapter (materialize / drop / export)
//! ├── GeometryEngine adapter (execute operations)
//! └── Config (idle timeout, page cap, operation timeout, paths)
//! ```
//!
//! ## Locking
//!
//! The outer map lock is held only to look up or unlink entries. All
//! mutating work on one session happens under that session's `Mutex`, which
//! serializes requests against each other and against teardown. Teardown
//! unlinks the entry from the map and marks the state destroyed under the
//! lock, so a racing resolve either finds the session fully live or fails
//! with `SessionNotFound` — never a half-destroyed session.

use crate::config::Config;
use crate::dataset::{Dataset, DatasetSummary};
use crate::engine::{GeometryEngine, OperationInput};
use crate::error::{EngineError, ServiceError, ServiceResult};
use crate::ops::Operation;
use crate::registry::{DatasetPage, DatasetRegistry};
use crate::store::{DatasetStore, ExportFormat, StorageRef};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opaque session credential (cryptographic UUID to prevent enumeration).
pub type SessionToken = String;

/// Client-facing view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub created: DateTime<Utc>,
    pub last_request: DateTime<Utc>,
    pub dataset_count: usize,
    pub active_dataset: Option<DatasetSummary>,
}

struct SessionState {
    /// Internal identity; names the working and output directories
    id: Uuid,
    created: DateTime<Utc>,
    last_request: DateTime<Utc>,
    working_dir: PathBuf,
    registry: DatasetRegistry,
    /// Set by teardown while still holding the session lock; a resolve that
    /// was already waiting on the lock observes it and fails cleanly
    destroyed: bool,
}

struct SessionEntry {
    /// Idle clock, readable by the reaper without taking the session lock
    last_activity: Mutex<Instant>,
    state: tokio::sync::Mutex<SessionState>,
}

impl SessionEntry {
    fn idle_elapsed(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Manages all live sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionToken, Arc<SessionEntry>>>,
    store: Arc<dyn DatasetStore>,
    engine: Arc<dyn GeometryEngine>,
    config: Config,
}

impl SessionManager {
    pub fn new(config: Config, store: Arc<dyn DatasetStore>, engine: Arc<dyn GeometryEngine>) -> Self {
        SessionManager {
            sessions: RwLock::new(HashMap::new()),
            store,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn has_session(&self, token: &str) -> bool {
        self.sessions.read().contains_key(token)
    }

    /// Idle threshold from configuration; `None` disables reaping.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.config.session.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Allocate a fresh session: unused credential, timestamps, an empty
    /// dataset registry and a working directory.
    pub async fn create_session(&self) -> ServiceResult<SessionToken> {
        let max = self.config.session.max_sessions;
        if max > 0 && self.sessions.read().len() >= max {
            return Err(ServiceError::TooManySessions(max));
        }

        let id = Uuid::new_v4();
        let token = Uuid::new_v4().to_string();
        let working_dir = self
            .config
            .paths
            .working_dir
            .join("session")
            .join(id.simple().to_string());

        let now = Utc::now();
        let entry = Arc::new(SessionEntry {
            last_activity: Mutex::new(Instant::now()),
            state: tokio::sync::Mutex::new(SessionState {
                id,
                created: now,
                last_request: now,
                working_dir: working_dir.clone(),
                registry: DatasetRegistry::new(),
                destroyed: false,
            }),
        });

        {
            let mut sessions = self.sessions.write();
            if max > 0 && sessions.len() >= max {
                return Err(ServiceError::TooManySessions(max));
            }
            sessions.insert(token.clone(), entry);
        }

        // Claim the slot first: a lost admission race leaves nothing on disk
        if let Err(err) = tokio::fs::create_dir_all(&working_dir).await {
            self.sessions.write().remove(&token);
            return Err(err.into());
        }

        tracing::info!(session = %id, "session_created");
        Ok(token)
    }

    /// Look up a session by credential and refresh its activity timestamp.
    ///
    /// Also the session-information surface: returns timestamps, dataset
    /// count and the active dataset's summary.
    pub async fn resolve(&self, token: &str) -> ServiceResult<SessionInfo> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);
        Ok(Self::info(&state))
    }

    /// Ingest a spatial file as a new root dataset and make it active.
    pub async fn ingest(
        &self,
        token: &str,
        file: &Path,
        label: Option<String>,
        crs_override: Option<u32>,
    ) -> ServiceResult<DatasetSummary> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);

        // Reject a taken label before any store work happens
        if let Some(label) = &label {
            if state.registry.contains(label) {
                return Err(ServiceError::LabelConflict(label.clone()));
            }
        }

        let ingested = self.store.materialize_from_file(file, crs_override).await?;

        let label = match label {
            Some(label) => label,
            None => {
                match state
                    .registry
                    .next_auto_label(None, self.config.datasets.label_retry_limit)
                {
                    Ok(label) => label,
                    Err(err) => {
                        self.drop_best_effort(&ingested.storage_ref).await;
                        return Err(err);
                    }
                }
            }
        };
        let dataset = Dataset::ingested(
            label,
            ingested.storage_ref.clone(),
            ingested.schema,
            Some(file.to_path_buf()),
        );

        let session_id = state.id;
        match state.registry.register(dataset) {
            Ok(dataset) => {
                tracing::info!(session = %session_id, label = %dataset.label, "dataset_ingested");
                Ok(dataset.summary())
            }
            Err(err) => {
                self.drop_best_effort(&ingested.storage_ref).await;
                Err(err)
            }
        }
    }

    /// Apply a geometric operation, materializing the result as a new
    /// dataset derived from the source (explicit label, or the session's
    /// active dataset).
    ///
    /// On engine failure, store failure or timeout, the registry is left as
    /// if the call never happened and no storage object survives: a timed-out
    /// operation keeps running on its own task and whatever it materializes
    /// after the deadline is dropped as soon as it exists.
    pub async fn apply(
        &self,
        token: &str,
        source: Option<&str>,
        operation: &Operation,
        new_label: Option<String>,
    ) -> ServiceResult<DatasetSummary> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);

        if let Some(label) = &new_label {
            if state.registry.contains(label) {
                return Err(ServiceError::LabelConflict(label.clone()));
            }
        }

        let src = state.registry.resolve(source)?;
        let parent_label = src.label.clone();
        let parent_ref = src.storage_ref.clone();
        let parent_schema = src.schema.clone();
        let join = match operation.join_partner() {
            Some(right) => {
                let right = state.registry.get(right)?;
                Some((right.storage_ref.clone(), right.schema.clone()))
            }
            None => None,
        };

        let work = {
            let store = Arc::clone(&self.store);
            let engine = Arc::clone(&self.engine);
            let operation = operation.clone();
            let parent_ref = parent_ref.clone();
            async move {
                let input = OperationInput {
                    storage_ref: &parent_ref,
                    schema: &parent_schema,
                    join: join.as_ref().map(|(r, s)| (r, s)),
                };
                let outcome = engine.execute(&operation, input).await?;
                let view_ref = store.materialize_view(&parent_ref, &outcome.view).await?;
                Ok::<_, ServiceError>((outcome.schema, view_ref))
            }
        };

        // The operation runs on its own task: a timeout abandons it instead
        // of cancelling it. Cancellation could land mid-materialize, with the
        // object created but its ref lost; abandonment lets the call finish
        // and drops whatever it produced.
        let started = Instant::now();
        let result = match self.config.datasets.operation_timeout_ms {
            0 => work.await,
            ms => {
                let mut handle = tokio::spawn(work);
                match tokio::time::timeout(Duration::from_millis(ms), &mut handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => Err(ServiceError::Operation(EngineError::Failed {
                        operation: operation.name(),
                        reason: format!("operation task failed: {join_err}"),
                    })),
                    Err(_) => {
                        let store = Arc::clone(&self.store);
                        tokio::spawn(async move {
                            if let Ok(Ok((_, view_ref))) = handle.await {
                                if let Err(err) = store.drop_object(&view_ref).await {
                                    tracing::warn!(
                                        storage_ref = %view_ref,
                                        error = %err,
                                        "orphan_drop_failed"
                                    );
                                }
                            }
                        });
                        Err(ServiceError::OperationTimeout {
                            operation: operation.name(),
                            elapsed: started.elapsed(),
                        })
                    }
                }
            }
        };
        let (schema, view_ref) = result?;

        let label = match new_label {
            Some(label) => label,
            None => {
                match state
                    .registry
                    .next_auto_label(Some(&parent_label), self.config.datasets.label_retry_limit)
                {
                    Ok(label) => label,
                    Err(err) => {
                        self.drop_best_effort(&view_ref).await;
                        return Err(err);
                    }
                }
            }
        };

        let dataset = Dataset::derived(
            label,
            view_ref.clone(),
            schema,
            operation.name(),
            parent_label,
        );
        let session_id = state.id;
        match state.registry.register(dataset) {
            Ok(dataset) => {
                tracing::info!(
                    session = %session_id,
                    label = %dataset.label,
                    operation = %operation.name(),
                    "dataset_derived"
                );
                Ok(dataset.summary())
            }
            Err(err) => {
                self.drop_best_effort(&view_ref).await;
                Err(err)
            }
        }
    }

    /// Wire-shaped variant of [`apply`](Self::apply): operation name plus
    /// JSON parameters, validated against the catalog first.
    pub async fn apply_request(
        &self,
        token: &str,
        source: Option<&str>,
        operation_name: &str,
        params: &serde_json::Value,
        new_label: Option<String>,
    ) -> ServiceResult<DatasetSummary> {
        let operation = Operation::from_request(operation_name, params)?;
        self.apply(token, source, &operation, new_label).await
    }

    /// Point the session's active dataset at an existing label.
    pub async fn set_active(&self, token: &str, label: &str) -> ServiceResult<()> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);
        state.registry.set_active(label)
    }

    /// Delete one dataset: drop its storage object, then remove the registry
    /// entry. If the drop fails the registry is left untouched and the error
    /// surfaces, so the entry can be retried.
    pub async fn delete_dataset(&self, token: &str, label: &str) -> ServiceResult<()> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);

        let storage_ref = state.registry.get(label)?.storage_ref.clone();
        self.store.drop_object(&storage_ref).await?;
        state.registry.remove(label)?;
        tracing::info!(session = %state.id, label, "dataset_deleted");
        Ok(())
    }

    /// Page through the session's datasets in creation order.
    pub async fn list_datasets(
        &self,
        token: &str,
        page: usize,
        per_page: usize,
    ) -> ServiceResult<DatasetPage> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);
        Ok(state
            .registry
            .list(page, per_page, self.config.datasets.max_page_size))
    }

    /// Export a dataset (explicit label, or the active one) through the
    /// store and copy the file under the output root, returning the output
    /// path.
    pub async fn export(
        &self,
        token: &str,
        label: Option<&str>,
        format: ExportFormat,
    ) -> ServiceResult<PathBuf> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }
        Self::touch(&entry, &mut state);

        let dataset = state.registry.resolve(label)?;
        let storage_ref = dataset.storage_ref.clone();
        let exported_label = dataset.label.clone();

        let exports_dir = state.working_dir.join("exports");
        let file = self.store.export(&storage_ref, format, &exports_dir).await?;

        let output_dir = self
            .config
            .paths
            .output_dir
            .join(state.id.simple().to_string());
        tokio::fs::create_dir_all(&output_dir).await?;
        let filename = file
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| format!("export.{}", format.extension()).into());
        let output_file = output_dir.join(filename);
        tokio::fs::copy(&file, &output_file).await?;

        tracing::info!(session = %state.id, label = %exported_label, file = %output_file.display(), "dataset_exported");
        Ok(output_file)
    }

    /// Tear a session down: unlink it, drop every dataset's storage object
    /// and remove the working directory. Destroying an absent session fails
    /// with `SessionNotFound` to surface client misuse.
    pub async fn destroy_session(&self, token: &str) -> ServiceResult<()> {
        self.teardown(token, None).await.map(|_| ())
    }

    /// Tear a session down only if it has been idle at least `idle`.
    /// Returns false when a racing request refreshed the session first.
    pub(crate) async fn destroy_if_idle(&self, token: &str, idle: Duration) -> ServiceResult<bool> {
        self.teardown(token, Some(idle)).await
    }

    /// Tokens of sessions idle at least `idle`, for the reaper sweep.
    pub fn expired_tokens(&self, idle: Duration) -> Vec<SessionToken> {
        self.sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.idle_elapsed() >= idle)
            .map(|(token, _)| token.clone())
            .collect()
    }

    async fn teardown(&self, token: &str, only_if_idle: Option<Duration>) -> ServiceResult<bool> {
        let entry = self.entry(token)?;
        let mut state = entry.state.lock().await;
        if state.destroyed {
            return Err(ServiceError::SessionNotFound);
        }

        // An in-flight request may have refreshed the session while the
        // sweep was waiting for the lock
        if let Some(idle) = only_if_idle {
            if entry.idle_elapsed() < idle {
                return Ok(false);
            }
        }

        // Unlink first: no new resolve can find the session while its
        // resources are being released
        self.sessions.write().remove(token);
        state.destroyed = true;

        for dataset in state.registry.drain() {
            if let Err(err) = self.store.drop_object(&dataset.storage_ref).await {
                tracing::warn!(
                    session = %state.id,
                    label = %dataset.label,
                    error = %err,
                    "teardown_drop_failed"
                );
            }
        }

        match tokio::fs::remove_dir_all(&state.working_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(session = %state.id, error = %err, "teardown_workdir_failed");
            }
        }

        tracing::info!(session = %state.id, "session_destroyed");
        Ok(true)
    }

    fn entry(&self, token: &str) -> ServiceResult<Arc<SessionEntry>> {
        self.sessions
            .read()
            .get(token)
            .cloned()
            .ok_or(ServiceError::SessionNotFound)
    }

    fn touch(entry: &SessionEntry, state: &mut SessionState) {
        *entry.last_activity.lock() = Instant::now();
        state.last_request = Utc::now();
    }

    fn info(state: &SessionState) -> SessionInfo {
        let active_dataset = state
            .registry
            .active_label()
            .and_then(|label| state.registry.get(label).ok())
            .map(Dataset::summary);
        SessionInfo {
            created: state.created,
            last_request: state.last_request,
            dataset_count: state.registry.len(),
            active_dataset,
        }
    }

    /// Drop a storage object after a failed operation; failures are logged,
    /// never raised over the original error.
    async fn drop_best_effort(&self, storage_ref: &StorageRef) {
        if let Err(err) = self.store.drop_object(storage_ref).await {
            tracing::warn!(storage_ref = %storage_ref, error = %err, "orphan_drop_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EchoEngine;
    use crate::store::MemoryStore;

    fn manager_with(dir: &tempfile::TempDir) -> (Arc<SessionManager>, Arc<MemoryStore>) {
        let mut config = Config::default();
        config.paths.working_dir = dir.path().join("work");
        config.paths.output_dir = dir.path().join("output");
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(SessionManager::new(
            config,
            store.clone(),
            Arc::new(EchoEngine::new()),
        ));
        (manager, store)
    }

    fn spatial_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"features").unwrap();
        path
    }

    #[tokio::test]
    async fn test_create_and_resolve_session() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);

        let token = manager.create_session().await.unwrap();
        assert!(manager.has_session(&token));

        let info = manager.resolve(&token).await.unwrap();
        assert_eq!(info.dataset_count, 0);
        assert!(info.active_dataset.is_none());
    }

    #[tokio::test]
    async fn test_resolve_unknown_token() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        assert!(matches!(
            manager.resolve("nope").await,
            Err(ServiceError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_max_sessions_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.working_dir = dir.path().join("work");
        config.session.max_sessions = 2;
        let manager = SessionManager::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(EchoEngine::new()),
        );

        manager.create_session().await.unwrap();
        manager.create_session().await.unwrap();
        assert!(matches!(
            manager.create_session().await,
            Err(ServiceError::TooManySessions(2))
        ));
    }

    #[tokio::test]
    async fn test_ingest_sets_active_and_creates_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "roads.geojson");

        let summary = manager
            .ingest(&token, &file, Some("roads".to_string()), None)
            .await
            .unwrap();
        assert_eq!(summary.label, "roads");
        assert_eq!(store.object_count(), 1);

        let info = manager.resolve(&token).await.unwrap();
        assert_eq!(info.dataset_count, 1);
        assert_eq!(info.active_dataset.unwrap().label, "roads");
    }

    #[tokio::test]
    async fn test_ingest_label_conflict_leaves_no_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "roads.geojson");

        manager
            .ingest(&token, &file, Some("roads".to_string()), None)
            .await
            .unwrap();
        let err = manager
            .ingest(&token, &file, Some("roads".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::LabelConflict(_)));
        // The conflict was rejected before any store work
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_ingest_auto_label_exhaustion_drops_object() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.working_dir = dir.path().join("work");
        config.datasets.label_retry_limit = 1;
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            config,
            store.clone(),
            Arc::new(EchoEngine::new()),
        );
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "roads.geojson");

        // Takes the only candidate the single retry can produce
        manager
            .ingest(&token, &file, Some("dataset-1".to_string()), None)
            .await
            .unwrap();

        let err = manager.ingest(&token, &file, None, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::LabelConflict(_)));
        // The object materialized for the failed ingest was dropped again
        assert_eq!(store.object_count(), 1);
        let info = manager.resolve(&token).await.unwrap();
        assert_eq!(info.dataset_count, 1);
    }

    #[tokio::test]
    async fn test_lost_admission_leaves_no_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.working_dir = dir.path().join("work");
        config.session.max_sessions = 1;
        let manager = SessionManager::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(EchoEngine::new()),
        );

        manager.create_session().await.unwrap();
        assert!(matches!(
            manager.create_session().await,
            Err(ServiceError::TooManySessions(1))
        ));

        // Only the admitted session owns a directory
        let work_root = dir.path().join("work").join("session");
        let dirs = std::fs::read_dir(&work_root).map(Iterator::count).unwrap();
        assert_eq!(dirs, 1);
    }

    #[tokio::test]
    async fn test_same_label_in_two_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let file = spatial_file(&dir, "roads.geojson");

        let t1 = manager.create_session().await.unwrap();
        let t2 = manager.create_session().await.unwrap();
        manager
            .ingest(&t1, &file, Some("roads".to_string()), None)
            .await
            .unwrap();
        manager
            .ingest(&t2, &file, Some("roads".to_string()), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_apply_without_active_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();

        let err = manager
            .apply(&token, None, &Operation::Centroid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoActiveDataset));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_operation_chain_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");

        // ingest -> "a", active
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();

        // label-less apply derives from "a", auto-label, becomes active
        let derived = manager
            .apply(&token, None, &Operation::Buffer { distance: 10.0 }, None)
            .await
            .unwrap();
        assert_eq!(derived.label, "a-1");

        // back to "a", then an explicit-label apply
        manager.set_active(&token, "a").await.unwrap();
        let clipped = manager
            .apply(
                &token,
                None,
                &Operation::ConvexHull,
                Some("c".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(clipped.label, "c");

        let page = manager.list_datasets(&token, 1, 10).await.unwrap();
        let labels: Vec<&str> = page.items.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "a-1", "c"]);

        let info = manager.resolve(&token).await.unwrap();
        assert_eq!(info.active_dataset.unwrap().label, "c");
    }

    #[tokio::test]
    async fn test_apply_join_resolves_right_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");

        manager
            .ingest(&token, &file, Some("roads".to_string()), None)
            .await
            .unwrap();
        manager
            .ingest(&token, &file, Some("zones".to_string()), None)
            .await
            .unwrap();

        let op = Operation::Join {
            predicate: crate::ops::JoinPredicate::Intersects,
            right: "zones".to_string(),
            join_type: crate::ops::JoinType::Outer,
        };
        let joined = manager
            .apply(&token, Some("roads"), &op, None)
            .await
            .unwrap();
        assert_eq!(joined.label, "roads-1");
        assert!(matches!(
            joined.lineage,
            crate::dataset::Lineage::Derived { ref parent, .. } if parent == "roads"
        ));

        let missing = Operation::Join {
            predicate: crate::ops::JoinPredicate::Intersects,
            right: "nothere".to_string(),
            join_type: crate::ops::JoinType::Outer,
        };
        let err = manager
            .apply(&token, Some("roads"), &missing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DatasetNotFound(_)));
    }

    #[tokio::test]
    async fn test_apply_storage_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();

        store.fail_next_view();
        let err = manager
            .apply(&token, None, &Operation::Centroid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));

        // No dataset was registered and "a" is still active
        let info = manager.resolve(&token).await.unwrap();
        assert_eq!(info.dataset_count, 1);
        assert_eq!(info.active_dataset.unwrap().label, "a");
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_active_clears_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();

        manager.delete_dataset(&token, "a").await.unwrap();
        assert_eq!(store.object_count(), 0);

        let err = manager
            .apply(&token, None, &Operation::Centroid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoActiveDataset));
    }

    #[tokio::test]
    async fn test_delete_unknown_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        assert!(matches!(
            manager.delete_dataset(&token, "ghost").await,
            Err(ServiceError::DatasetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_export_copies_to_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();

        let exported = manager
            .export(&token, None, ExportFormat::GeoJson)
            .await
            .unwrap();
        assert!(exported.exists());
        assert!(exported.starts_with(dir.path().join("output")));
    }

    #[tokio::test]
    async fn test_destroy_session_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();
        manager
            .apply(&token, None, &Operation::Centroid, None)
            .await
            .unwrap();

        manager.destroy_session(&token).await.unwrap();
        assert!(!manager.has_session(&token));
        assert_eq!(store.object_count(), 0);
        // One drop per dataset
        assert_eq!(store.drop_log().len(), 2);
        // Working directory is gone
        let work_root = dir.path().join("work").join("session");
        let remaining = std::fs::read_dir(&work_root).map(Iterator::count).unwrap_or(0);
        assert_eq!(remaining, 0);

        assert!(matches!(
            manager.resolve(&token).await,
            Err(ServiceError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_destroy_absent_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        manager.destroy_session(&token).await.unwrap();
        assert!(matches!(
            manager.destroy_session(&token).await,
            Err(ServiceError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_apply_request_wire_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager_with(&dir);
        let token = manager.create_session().await.unwrap();
        let file = spatial_file(&dir, "a.geojson");
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();

        let summary = manager
            .apply_request(
                &token,
                None,
                "buffer",
                &serde_json::json!({"distance": 5.0}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(summary.label, "a-1");

        let err = manager
            .apply_request(&token, None, "teleport", &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Operation(crate::error::EngineError::UnknownOperation(_))
        ));
    }
}
