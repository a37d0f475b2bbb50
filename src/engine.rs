//! Geometry engine adapter.
//!
//! The engine executes one validated operation against one materialized
//! input (two for joins) and reports the derived schema plus a view
//! definition the store can materialize. It is stateless with respect to
//! session bookkeeping; interpreting the result as a new dataset is the
//! session layer's job.
//!
//! `EchoEngine` is the reference implementation: it performs no geometry at
//! all and only synthesizes backend expressions, which is enough for the
//! lifecycle core and its tests.

use crate::error::EngineError;
use crate::ops::Operation;
use crate::schema::DatasetSchema;
use crate::store::{StorageRef, ViewDefinition};
use async_trait::async_trait;

/// Materialized input handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct OperationInput<'a> {
    pub storage_ref: &'a StorageRef,
    pub schema: &'a DatasetSchema,
    /// Second input for join operations
    pub join: Option<(&'a StorageRef, &'a DatasetSchema)>,
}

/// What the engine produced: the derived dataset's schema and the view the
/// store should materialize.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub schema: DatasetSchema,
    pub view: ViewDefinition,
}

/// Contract to the external geometry backend.
#[async_trait]
pub trait GeometryEngine: Send + Sync {
    async fn execute(
        &self,
        operation: &Operation,
        input: OperationInput<'_>,
    ) -> Result<OperationOutcome, EngineError>;
}

/// Reference engine that synthesizes view expressions without touching
/// geometry. Join operations require the second input to be present.
#[derive(Debug, Default)]
pub struct EchoEngine;

impl EchoEngine {
    pub fn new() -> Self {
        EchoEngine
    }
}

#[async_trait]
impl GeometryEngine for EchoEngine {
    async fn execute(
        &self,
        operation: &Operation,
        input: OperationInput<'_>,
    ) -> Result<OperationOutcome, EngineError> {
        operation.validate()?;
        let geom = &input.schema.geometry_column;

        let outcome = match operation {
            Operation::Centroid
            | Operation::ConvexHull
            | Operation::FlipCoordinates
            | Operation::MakeValid => OperationOutcome {
                schema: input.schema.clone(),
                view: ViewDefinition::new(format!("{}({geom})", operation.name())),
            },
            Operation::Buffer { distance } => OperationOutcome {
                schema: input.schema.clone(),
                view: ViewDefinition::new(format!("buffer({geom}, {distance})")),
            },
            Operation::Filter { predicate, wkt } => OperationOutcome {
                schema: input.schema.clone(),
                view: ViewDefinition::new(format!(
                    "filter({}, {geom}, geom_from_text('{wkt}', {}))",
                    predicate.name(),
                    input.schema.epsg
                )),
            },
            Operation::WithinBuffer {
                center_x,
                center_y,
                radius,
            } => OperationOutcome {
                schema: input.schema.clone(),
                view: ViewDefinition::new(format!(
                    "dwithin({geom}, point({center_x} {center_y}, {}), {radius})",
                    input.schema.epsg
                )),
            },
            Operation::Join {
                predicate,
                join_type,
                ..
            } => {
                let (right_ref, right_schema) = join_input(operation, input)?;
                OperationOutcome {
                    schema: input.schema.merge_join(right_schema),
                    view: ViewDefinition::with_join(
                        format!(
                            "join({}, {geom}, {}.{}, {join_type:?})",
                            predicate.name(),
                            right_ref,
                            right_schema.geometry_column
                        ),
                        right_ref.clone(),
                    ),
                }
            }
            Operation::WithinDistance {
                distance,
                join_type,
                ..
            } => {
                let (right_ref, right_schema) = join_input(operation, input)?;
                OperationOutcome {
                    schema: input.schema.merge_join(right_schema),
                    view: ViewDefinition::with_join(
                        format!(
                            "join(dwithin({distance}), {geom}, {}.{}, {join_type:?})",
                            right_ref, right_schema.geometry_column
                        ),
                        right_ref.clone(),
                    ),
                }
            }
        };
        Ok(outcome)
    }
}

fn join_input<'a>(
    operation: &Operation,
    input: OperationInput<'a>,
) -> Result<(&'a StorageRef, &'a DatasetSchema), EngineError> {
    input.join.ok_or_else(|| EngineError::Failed {
        operation: operation.name(),
        reason: "join operation requires a second input dataset".to_string(),
    })
}
