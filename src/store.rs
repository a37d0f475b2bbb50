//! Dataset store adapter.
//!
//! The backing spatial store is an external collaborator; this module defines
//! the narrow contract the lifecycle core consumes: materialize a file as a
//! queryable object, materialize a view derived from another object plus an
//! operation, drop an object, export an object to a file.
//!
//! `drop_object` is idempotent by contract: teardown races are expected, so
//! dropping an already-removed object is a no-op, not an error.
//!
//! `MemoryStore` is the reference implementation: it keeps objects in a map
//! and synthesizes schemas from file names. It backs the test suite and any
//! embedding that does not need a real spatial database.

use crate::error::StorageError;
use crate::schema::{DatasetSchema, Field, FieldType};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Identifier of a storage object (table or view) in the shared store.
///
/// Globally unique across sessions; sessions share one backing store, so
/// per-session labels are not enough to avoid collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageRef(String);

impl StorageRef {
    pub fn new(name: impl Into<String>) -> Self {
        StorageRef(name.into())
    }

    /// Generate a fresh, globally unique reference.
    pub fn generate() -> Self {
        StorageRef(format!("ds_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A view the store can materialize: an expression over a parent object,
/// produced by the geometry engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// Backend expression selecting/transforming the parent's features
    pub expression: String,
    /// Second input object for join views
    pub join_ref: Option<StorageRef>,
}

impl ViewDefinition {
    pub fn new(expression: impl Into<String>) -> Self {
        ViewDefinition {
            expression: expression.into(),
            join_ref: None,
        }
    }

    pub fn with_join(expression: impl Into<String>, join_ref: StorageRef) -> Self {
        ViewDefinition {
            expression: expression.into(),
            join_ref: Some(join_ref),
        }
    }
}

/// Result of materializing a source file.
#[derive(Debug, Clone)]
pub struct IngestedObject {
    pub storage_ref: StorageRef,
    /// Schema recognized from the source file
    pub schema: DatasetSchema,
}

/// Export encodings the store can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    GeoJson,
    Csv,
    Shapefile,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::GeoJson => "geojson",
            ExportFormat::Csv => "csv",
            ExportFormat::Shapefile => "shp",
        }
    }
}

/// Narrow contract to the backing spatial store.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Persist a spatial file's content as a queryable object, recognizing
    /// its schema. `crs_override` supplies the CRS when the file carries
    /// none.
    async fn materialize_from_file(
        &self,
        file: &Path,
        crs_override: Option<u32>,
    ) -> Result<IngestedObject, StorageError>;

    /// Materialize a view over `parent` as a new object.
    async fn materialize_view(
        &self,
        parent: &StorageRef,
        view: &ViewDefinition,
    ) -> Result<StorageRef, StorageError>;

    /// Drop an object's storage. Idempotent: dropping an absent object
    /// succeeds.
    async fn drop_object(&self, storage_ref: &StorageRef) -> Result<(), StorageError>;

    /// Export an object to `dest_dir` in the requested format, returning the
    /// written file's path.
    async fn export(
        &self,
        storage_ref: &StorageRef,
        format: ExportFormat,
        dest_dir: &Path,
    ) -> Result<PathBuf, StorageError>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    schema: DatasetSchema,
    #[allow(dead_code)]
    origin: ObjectOrigin,
}

#[derive(Debug, Clone)]
enum ObjectOrigin {
    Table { file: PathBuf },
    View { parent: StorageRef, expression: String },
}

/// In-memory reference implementation of [`DatasetStore`].
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<StorageRef, StoredObject>>,
    /// Every drop request, including drops of absent objects
    drop_log: Mutex<Vec<StorageRef>>,
    fail_next_view: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn contains(&self, storage_ref: &StorageRef) -> bool {
        self.objects.lock().contains_key(storage_ref)
    }

    /// All drop requests seen so far, in order.
    pub fn drop_log(&self) -> Vec<StorageRef> {
        self.drop_log.lock().clone()
    }

    /// Make the next `materialize_view` call fail, for error-path tests.
    pub fn fail_next_view(&self) {
        self.fail_next_view.store(true, Ordering::SeqCst);
    }

    fn recognize_schema(file: &Path, crs_override: Option<u32>) -> Result<DatasetSchema, StorageError> {
        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        // Delimited files carry no CRS of their own
        let epsg = match (extension.as_str(), crs_override) {
            ("csv", Some(epsg)) => epsg,
            ("csv", None) => return Err(StorageError::CrsNotFound),
            (_, Some(epsg)) => epsg,
            (_, None) => 4326,
        };

        match extension.as_str() {
            "geojson" | "json" | "shp" | "gpkg" | "csv" => Ok(DatasetSchema::new(
                vec![
                    Field::new("id", FieldType::Integer),
                    Field::new("name", FieldType::Text),
                ],
                "geom",
                epsg,
            )),
            other => Err(StorageError::UnreadableFile(format!(
                "unsupported file extension '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn materialize_from_file(
        &self,
        file: &Path,
        crs_override: Option<u32>,
    ) -> Result<IngestedObject, StorageError> {
        tokio::fs::metadata(file)
            .await
            .map_err(|_| StorageError::UnreadableFile(file.display().to_string()))?;

        let schema = Self::recognize_schema(file, crs_override)?;
        let storage_ref = StorageRef::generate();
        self.objects.lock().insert(
            storage_ref.clone(),
            StoredObject {
                schema: schema.clone(),
                origin: ObjectOrigin::Table {
                    file: file.to_path_buf(),
                },
            },
        );
        Ok(IngestedObject {
            storage_ref,
            schema,
        })
    }

    async fn materialize_view(
        &self,
        parent: &StorageRef,
        view: &ViewDefinition,
    ) -> Result<StorageRef, StorageError> {
        if self.fail_next_view.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("injected view failure".to_string()));
        }

        let mut objects = self.objects.lock();
        let parent_obj = objects
            .get(parent)
            .ok_or_else(|| StorageError::ObjectNotFound(parent.to_string()))?;
        if let Some(join_ref) = &view.join_ref {
            if !objects.contains_key(join_ref) {
                return Err(StorageError::ObjectNotFound(join_ref.to_string()));
            }
        }

        let schema = parent_obj.schema.clone();
        let storage_ref = StorageRef::generate();
        objects.insert(
            storage_ref.clone(),
            StoredObject {
                schema,
                origin: ObjectOrigin::View {
                    parent: parent.clone(),
                    expression: view.expression.clone(),
                },
            },
        );
        Ok(storage_ref)
    }

    async fn drop_object(&self, storage_ref: &StorageRef) -> Result<(), StorageError> {
        self.drop_log.lock().push(storage_ref.clone());
        self.objects.lock().remove(storage_ref);
        Ok(())
    }

    async fn export(
        &self,
        storage_ref: &StorageRef,
        format: ExportFormat,
        dest_dir: &Path,
    ) -> Result<PathBuf, StorageError> {
        let schema = {
            let objects = self.objects.lock();
            let object = objects
                .get(storage_ref)
                .ok_or_else(|| StorageError::ObjectNotFound(storage_ref.to_string()))?;
            object.schema.clone()
        };

        tokio::fs::create_dir_all(dest_dir).await?;
        let file = dest_dir.join(format!("{storage_ref}.{}", format.extension()));
        let payload = serde_json::to_vec(&schema)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tokio::fs::write(&file, payload).await?;
        Ok(file)
    }
}
