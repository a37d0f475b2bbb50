//! Geometric operation catalog.
//!
//! Three operation families, mirroring what the geometry backend supports:
//!
//! - **constructive**: one input dataset, the geometry of every feature is
//!   rewritten (centroid, convex hull, coordinate flip, validity repair,
//!   buffer).
//! - **filter**: one input dataset, features are kept when a spatial
//!   predicate against a WKT argument (or a buffered point) holds.
//! - **join**: two input datasets from the same session, attribute-joined on
//!   a spatial predicate.
//!
//! Operations arrive from the request layer as a name plus JSON parameters
//! and are validated here, before any adapter is invoked. An unknown name or
//! a malformed parameter never reaches the engine or the store.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Spatial predicates available to filter operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialPredicate {
    Contains,
    ContainsProperly,
    Covers,
    CoveredBy,
    Crosses,
    Disjoint,
    Intersects,
    Within,
}

impl SpatialPredicate {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(SpatialPredicate::Contains),
            "contains_properly" => Some(SpatialPredicate::ContainsProperly),
            "covers" => Some(SpatialPredicate::Covers),
            "covered_by" => Some(SpatialPredicate::CoveredBy),
            "crosses" => Some(SpatialPredicate::Crosses),
            "disjoint" => Some(SpatialPredicate::Disjoint),
            "intersects" => Some(SpatialPredicate::Intersects),
            "within" => Some(SpatialPredicate::Within),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpatialPredicate::Contains => "contains",
            SpatialPredicate::ContainsProperly => "contains_properly",
            SpatialPredicate::Covers => "covers",
            SpatialPredicate::CoveredBy => "covered_by",
            SpatialPredicate::Crosses => "crosses",
            SpatialPredicate::Disjoint => "disjoint",
            SpatialPredicate::Intersects => "intersects",
            SpatialPredicate::Within => "within",
        }
    }
}

/// Predicates available to join operations (a subset of the filter set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPredicate {
    Contains,
    Intersects,
    Within,
}

impl JoinPredicate {
    pub fn name(self) -> &'static str {
        match self {
            JoinPredicate::Contains => "contains",
            JoinPredicate::Intersects => "intersects",
            JoinPredicate::Within => "within",
        }
    }
}

/// How unmatched left-side features are treated in a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    #[default]
    Outer,
}

/// A validated geometric operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Centroid,
    ConvexHull,
    FlipCoordinates,
    MakeValid,
    Buffer {
        distance: f64,
    },
    Filter {
        predicate: SpatialPredicate,
        wkt: String,
    },
    WithinBuffer {
        center_x: f64,
        center_y: f64,
        radius: f64,
    },
    Join {
        predicate: JoinPredicate,
        right: String,
        #[serde(default)]
        join_type: JoinType,
    },
    WithinDistance {
        right: String,
        distance: f64,
        #[serde(default)]
        join_type: JoinType,
    },
}

impl Operation {
    /// Catalog name of the operation, as exposed to clients.
    pub fn name(&self) -> String {
        match self {
            Operation::Centroid => "centroid".to_string(),
            Operation::ConvexHull => "convex_hull".to_string(),
            Operation::FlipCoordinates => "flip_coordinates".to_string(),
            Operation::MakeValid => "make_valid".to_string(),
            Operation::Buffer { .. } => "buffer".to_string(),
            Operation::Filter { predicate, .. } => format!("filter_{}", predicate.name()),
            Operation::WithinBuffer { .. } => "within_buffer".to_string(),
            Operation::Join { predicate, .. } => format!("join_{}", predicate.name()),
            Operation::WithinDistance { .. } => "within_distance".to_string(),
        }
    }

    /// Label of the second input dataset, for join operations.
    pub fn join_partner(&self) -> Option<&str> {
        match self {
            Operation::Join { right, .. } | Operation::WithinDistance { right, .. } => {
                Some(right.as_str())
            }
            _ => None,
        }
    }

    /// Parse and validate an operation from its wire shape: a catalog name
    /// plus a JSON parameter object.
    pub fn from_request(name: &str, params: &Value) -> Result<Operation, EngineError> {
        let op = match name {
            "centroid" => Operation::Centroid,
            "convex_hull" => Operation::ConvexHull,
            "flip_coordinates" => Operation::FlipCoordinates,
            "make_valid" => Operation::MakeValid,
            "buffer" => Operation::Buffer {
                distance: required_f64(name, params, "distance")?,
            },
            "within_buffer" => Operation::WithinBuffer {
                center_x: required_f64(name, params, "center_x")?,
                center_y: required_f64(name, params, "center_y")?,
                radius: required_f64(name, params, "radius")?,
            },
            "within_distance" => Operation::WithinDistance {
                right: required_str(name, params, "right")?,
                distance: required_f64(name, params, "distance")?,
                join_type: optional_join_type(name, params)?,
            },
            _ => {
                if let Some(predicate) = name
                    .strip_prefix("filter_")
                    .and_then(SpatialPredicate::from_name)
                {
                    Operation::Filter {
                        predicate,
                        wkt: required_str(name, params, "wkt")?,
                    }
                } else if let Some(predicate) = name.strip_prefix("join_").and_then(|p| match p {
                    "contains" => Some(JoinPredicate::Contains),
                    "intersects" => Some(JoinPredicate::Intersects),
                    "within" => Some(JoinPredicate::Within),
                    _ => None,
                }) {
                    Operation::Join {
                        predicate,
                        right: required_str(name, params, "right")?,
                        join_type: optional_join_type(name, params)?,
                    }
                } else {
                    return Err(EngineError::UnknownOperation(name.to_string()));
                }
            }
        };
        op.validate()?;
        Ok(op)
    }

    /// Check value-level constraints on the parameters.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Operation::Buffer { distance } if *distance < 0.0 => Err(invalid(
                &self.name(),
                "distance must be non-negative",
            )),
            Operation::WithinBuffer { radius, .. } if *radius <= 0.0 => {
                Err(invalid(&self.name(), "radius must be positive"))
            }
            Operation::WithinDistance { distance, .. } if *distance < 0.0 => Err(invalid(
                &self.name(),
                "distance must be non-negative",
            )),
            Operation::Filter { wkt, .. } if wkt.trim().is_empty() => {
                Err(invalid(&self.name(), "wkt must not be empty"))
            }
            Operation::Join { right, .. } | Operation::WithinDistance { right, .. }
                if right.trim().is_empty() =>
            {
                Err(invalid(&self.name(), "right dataset label must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn invalid(operation: &str, reason: &str) -> EngineError {
    EngineError::InvalidParameter {
        operation: operation.to_string(),
        reason: reason.to_string(),
    }
}

fn required_f64(operation: &str, params: &Value, key: &str) -> Result<f64, EngineError> {
    params
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid(operation, &format!("missing or non-numeric '{key}'")))
}

fn required_str(operation: &str, params: &Value, key: &str) -> Result<String, EngineError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(operation, &format!("missing or non-string '{key}'")))
}

fn optional_join_type(operation: &str, params: &Value) -> Result<JoinType, EngineError> {
    match params.get("join_type") {
        None | Some(Value::Null) => Ok(JoinType::default()),
        Some(Value::String(s)) => match s.as_str() {
            "inner" => Ok(JoinType::Inner),
            "outer" => Ok(JoinType::Outer),
            other => Err(invalid(
                operation,
                &format!("join_type must be 'inner' or 'outer', got '{other}'"),
            )),
        },
        Some(_) => Err(invalid(operation, "join_type must be a string")),
    }
}
