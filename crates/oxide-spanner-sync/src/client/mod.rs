//! Database client abstraction.
//!
//! The reconciler only needs a handful of calls from Spanner: apply a DDL
//! batch, dump the schema, and read/write rows of a single table. The RPC
//! transport is not part of this crate; [`MemoryClient`] implements the same
//! calls in memory.

mod memory;

pub use memory::MemoryClient;

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;

use crate::error::Result;

/// A row as column name → value.
pub type Row = BTreeMap<String, Value>;

/// The Spanner calls schema synchronization depends on.
pub trait SpannerClient: Send + Sync {
    /// Applies a DDL batch in order. Statements before a failing one stay
    /// applied.
    ///
    /// # Errors
    ///
    /// `SyncError::Client` when a statement is rejected.
    fn update_ddl(&self, statements: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Returns the database schema, one statement per table or index.
    ///
    /// # Errors
    ///
    /// `SyncError::Client` when the schema cannot be read.
    fn schema_ddl(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Reads `columns` of every row of `table`.
    ///
    /// # Errors
    ///
    /// `SyncError::Client` for an unknown table or column.
    fn read_rows(
        &self,
        table: &str,
        columns: &[&str],
    ) -> impl Future<Output = Result<Vec<Vec<Value>>>> + Send;

    /// Inserts a row, or updates the row with the same key.
    ///
    /// # Errors
    ///
    /// `SyncError::Client` for an unknown table or column, or a failed write.
    fn upsert_row(
        &self,
        table: &str,
        columns: &[&str],
        values: Vec<Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the row with primary key `key`, if any.
    ///
    /// # Errors
    ///
    /// `SyncError::Client` for an unknown table or a failed write.
    fn delete_row(&self, table: &str, key: Vec<Value>) -> impl Future<Output = Result<()>> + Send;
}
