//! Dataset records and summaries.
//!
//! A dataset is immutable once created: every geometric operation produces a
//! new dataset referencing its parent, never rewriting one in place. Roots
//! come from file ingestion; children record the operation that derived them.

use crate::schema::DatasetSchema;
use crate::store::StorageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique name of a dataset within its owning session.
pub type Label = String;

/// How a dataset came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Lineage {
    /// Root dataset, ingested from a spatial file
    Ingested {
        /// Source file path, if the dataset originated from a file
        filename: Option<PathBuf>,
    },
    /// Child dataset, derived by applying an operation to a parent
    Derived {
        /// Catalog name of the operation that produced it
        operation: String,
        /// Label of the parent dataset
        parent: Label,
    },
}

/// An immutable dataset belonging to exactly one session.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Internal identity, stable across label lookups
    pub id: Uuid,
    /// Session-unique label
    pub label: Label,
    /// Backing storage object (table or view) in the shared spatial store
    pub storage_ref: StorageRef,
    /// Attribute names/types, geometry column, CRS
    pub schema: DatasetSchema,
    /// Root or derivation edge
    pub lineage: Lineage,
    /// Creation timestamp
    pub created: DateTime<Utc>,
}

impl Dataset {
    pub fn ingested(
        label: Label,
        storage_ref: StorageRef,
        schema: DatasetSchema,
        filename: Option<PathBuf>,
    ) -> Self {
        Dataset {
            id: Uuid::new_v4(),
            label,
            storage_ref,
            schema,
            lineage: Lineage::Ingested { filename },
            created: Utc::now(),
        }
    }

    pub fn derived(
        label: Label,
        storage_ref: StorageRef,
        schema: DatasetSchema,
        operation: String,
        parent: Label,
    ) -> Self {
        Dataset {
            id: Uuid::new_v4(),
            label,
            storage_ref,
            schema,
            lineage: Lineage::Derived { operation, parent },
            created: Utc::now(),
        }
    }

    /// Label of the parent dataset, if this one was derived.
    pub fn parent(&self) -> Option<&str> {
        match &self.lineage {
            Lineage::Derived { parent, .. } => Some(parent.as_str()),
            Lineage::Ingested { .. } => None,
        }
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            label: self.label.clone(),
            lineage: self.lineage.clone(),
            created: self.created,
            fields: self
                .schema
                .field_names()
                .iter()
                .map(|n| (*n).to_string())
                .collect(),
            epsg: self.schema.epsg,
        }
    }
}

/// Client-facing view of a dataset, as returned by listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub label: Label,
    #[serde(flatten)]
    pub lineage: Lineage,
    pub created: DateTime<Utc>,
    pub fields: Vec<String>,
    pub epsg: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};

    fn schema() -> DatasetSchema {
        DatasetSchema::new(vec![Field::new("id", FieldType::Integer)], "geom", 4326)
    }

    #[test]
    fn test_ingested_dataset_is_root() {
        let ds = Dataset::ingested(
            "roads".to_string(),
            StorageRef::new("ds_roads"),
            schema(),
            Some(PathBuf::from("/tmp/roads.shp")),
        );
        assert!(ds.parent().is_none());
        assert!(matches!(ds.lineage, Lineage::Ingested { .. }));
    }

    #[test]
    fn test_derived_dataset_records_parent() {
        let ds = Dataset::derived(
            "roads-1".to_string(),
            StorageRef::new("ds_roads_1"),
            schema(),
            "buffer".to_string(),
            "roads".to_string(),
        );
        assert_eq!(ds.parent(), Some("roads"));
    }

    #[test]
    fn test_summary_carries_lineage() {
        let ds = Dataset::derived(
            "c".to_string(),
            StorageRef::new("ds_c"),
            schema(),
            "centroid".to_string(),
            "a".to_string(),
        );
        let summary = ds.summary();
        assert_eq!(summary.label, "c");
        assert_eq!(summary.epsg, 4326);
        assert!(matches!(summary.lineage, Lineage::Derived { ref parent, .. } if parent == "a"));

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"kind\":\"derived\""));
    }
}
