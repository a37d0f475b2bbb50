//! # GeoSession
//!
//! Session-scoped lifecycle core for a spatial dataset service. Clients open
//! a session, ingest spatial files as datasets, chain geometric operations
//! that derive new datasets, export results and tear the session down —
//! explicitly or through idle expiry.
//!
//! ## Architecture
//!
//! ```text
//! Client request (token)
//!     ↓
//! [SessionManager]        → resolve token, refresh activity
//!     ↓
//! [DatasetRegistry]       → labels, active pointer, lineage (per session)
//!     ↓
//! [GeometryEngine]        → execute operation, derive schema + view
//!     ↓
//! [DatasetStore]          → materialize / drop / export storage objects
//!
//! [Reaper] ──(interval)──→ destroy sessions idle past the threshold
//! ```
//!
//! Sessions are independent units of concurrency: requests against distinct
//! sessions run in parallel, requests against one session are serialized.
//! Datasets are immutable; every operation produces a new dataset that
//! records the operation and parent it was derived from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geosession::{Config, EchoEngine, MemoryStore, Operation, SessionManager};
//! use std::sync::Arc;
//!
//! let manager = Arc::new(SessionManager::new(
//!     Config::load()?,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(EchoEngine::new()),
//! ));
//! let reaper = geosession::Reaper::spawn(manager.clone());
//!
//! let token = manager.create_session().await?;
//! manager.ingest(&token, "roads.geojson".as_ref(), None, None).await?;
//! manager.apply(&token, None, &Operation::Buffer { distance: 25.0 }, None).await?;
//! manager.destroy_session(&token).await?;
//! ```

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod ops;
pub mod reaper;
pub mod registry;
pub mod schema;
pub mod session;
pub mod store;

pub use config::Config;
pub use dataset::{Dataset, DatasetSummary, Label, Lineage};
pub use engine::{EchoEngine, GeometryEngine, OperationInput, OperationOutcome};
pub use error::{EngineError, ServiceError, ServiceResult, StorageError};
pub use ops::{JoinPredicate, JoinType, Operation, SpatialPredicate};
pub use reaper::Reaper;
pub use registry::{DatasetPage, DatasetRegistry};
pub use schema::{DatasetSchema, Field, FieldType};
pub use session::{SessionInfo, SessionManager, SessionToken};
pub use store::{
    DatasetStore, ExportFormat, IngestedObject, MemoryStore, StorageRef, ViewDefinition,
};
