//! Keeps a Cloud Spanner schema and its extended schema in sync.
//!
//! `oxide-spanner-sync` drives the `oxide-spanner` core against a database:
//!
//! - **Client** - The few Spanner calls synchronization needs, plus an
//!   in-memory implementation
//! - **Cache** - Snapshot-published table structures and extended schema
//! - **Reconciler** - Diffs and writes the side table holding generation
//!   strategies and defaults
//! - **Synchronizer** - Serialized passes: side table, DDL, reload, reconcile
//! - **Writer** - Fills surrogate keys and commit timestamps before inserts
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oxide_spanner_sync::prelude::*;
//!
//! let client = Arc::new(MemoryClient::from_dump(&dump)?);
//! let sync = SchemaSynchronizer::new(client, SyncOptions::new());
//!
//! // First pass after a deploy: entities may name columns not created yet.
//! let report = sync.synchronize(&entities, &statements, true).await?;
//! println!("{} DDL statements, {} facts", report.ddl.len(), report.extended.len());
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Translate a JSON AST into Spanner DDL
//! oxide-spanner transform --input ast.json
//!
//! # Show the tables of a schema dump
//! oxide-spanner parse-schema --input schema.sql
//!
//! # Run a synchronization pass offline
//! oxide-spanner sync --schema schema.sql --entities entities.json --bootstrap
//! ```

pub mod cache;
pub mod client;
pub mod entity;
pub mod error;
pub mod reconciler;
pub mod synchronizer;
pub mod writer;

pub use error::{Result, SyncError};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::cache::SchemaCache;
    pub use crate::client::{MemoryClient, Row, SpannerClient};
    pub use crate::entity::{ColumnMetadata, EntityMetadata};
    pub use crate::error::{Result, SyncError};
    pub use crate::reconciler::{ExtendedSchemaDiff, SchemaReconciler};
    pub use crate::synchronizer::{
        SchemaSynchronizer, SyncOptions, SyncReport, DEFAULT_SCHEMA_TABLE,
    };
    pub use crate::writer::prepare_insert;
}
