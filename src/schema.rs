//! Dataset schema model.
//!
//! Tracks attribute names and types as recognized from the source file, plus
//! the geometry column and CRS. A derived dataset inherits its parent's
//! schema unless the operation reports a new one; joins merge the attribute
//! fields of both parents.

use serde::{Deserialize, Serialize};

/// Attribute types recognized from spatial source files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    /// The geometry column itself
    Geometry,
}

/// A named, typed attribute of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
        }
    }
}

/// Schema of a dataset: attribute fields, geometry column, CRS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// All fields, including the geometry column
    fields: Vec<Field>,
    /// Name of the geometry column
    pub geometry_column: String,
    /// EPSG code of the coordinate reference system
    pub epsg: u32,
}

impl DatasetSchema {
    /// Create a schema from fields. The geometry column must be present in
    /// `fields`; if it is not, it is appended as a `Geometry` field.
    pub fn new(mut fields: Vec<Field>, geometry_column: impl Into<String>, epsg: u32) -> Self {
        let geometry_column = geometry_column.into();
        if !fields.iter().any(|f| f.name == geometry_column) {
            fields.push(Field::new(geometry_column.clone(), FieldType::Geometry));
        }
        DatasetSchema {
            fields,
            geometry_column,
            epsg,
        }
    }

    /// All fields, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field names, in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Look up a field's type by name.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.field_type)
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Merge this schema with a join partner's: attribute fields of both
    /// sides, the left side's geometry column and CRS. Right-side fields that
    /// collide with a left-side name are prefixed with `right_`.
    pub fn merge_join(&self, right: &DatasetSchema) -> DatasetSchema {
        let mut fields = self.fields.clone();
        for field in &right.fields {
            if field.name == right.geometry_column {
                continue;
            }
            if fields.iter().any(|f| f.name == field.name) {
                fields.push(Field::new(
                    format!("right_{}", field.name),
                    field.field_type,
                ));
            } else {
                fields.push(field.clone());
            }
        }
        DatasetSchema {
            fields,
            geometry_column: self.geometry_column.clone(),
            epsg: self.epsg,
        }
    }
}
