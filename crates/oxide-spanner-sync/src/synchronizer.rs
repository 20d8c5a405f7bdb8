//! Schema synchronization passes.
//!
//! A pass makes sure the side table exists, applies transformed DDL,
//! refreshes the cached table structures and reconciles the extended schema
//! with the entities. Passes are serialized; cache readers keep working on
//! their snapshot while one runs.

use std::sync::Arc;

use oxide_spanner::ast::Statement;
use oxide_spanner::extended::ExtendedSchemaDelta;
use oxide_spanner::{transform_all, SchemaTextParser};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::SchemaCache;
use crate::client::SpannerClient;
use crate::entity::EntityMetadata;
use crate::error::Result;
use crate::reconciler::{ExtendedSchemaDiff, SchemaReconciler};

/// Side table used when none is configured.
pub const DEFAULT_SCHEMA_TABLE: &str = "oxide_extended_schema";

/// Options for synchronization passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Name of the extended schema side table.
    pub schema_table: String,
    /// Compute and log everything, write nothing.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_table: DEFAULT_SCHEMA_TABLE.to_string(),
            dry_run: false,
        }
    }

    /// Uses another side table.
    #[must_use]
    pub fn schema_table(mut self, name: impl Into<String>) -> Self {
        self.schema_table = name.into();
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }
}

/// What a synchronization pass did, or would do in dry-run mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Spanner DDL sent to the database.
    pub ddl: Vec<String>,
    /// Side-table changes coming from the DDL.
    pub delta: ExtendedSchemaDiff,
    /// Side-table changes coming from entity metadata.
    pub extended: ExtendedSchemaDiff,
    /// Number of tables in the database after the pass.
    pub tables: usize,
    /// Whether writes were skipped.
    pub dry_run: bool,
}

/// Runs synchronization passes against one database.
pub struct SchemaSynchronizer<C: SpannerClient> {
    client: Arc<C>,
    cache: Arc<SchemaCache>,
    options: SyncOptions,
    reconciler: SchemaReconciler<C>,
    pass: Mutex<()>,
}

impl<C: SpannerClient> SchemaSynchronizer<C> {
    /// Creates a synchronizer with a fresh cache.
    #[must_use]
    pub fn new(client: Arc<C>, options: SyncOptions) -> Self {
        Self::with_cache(client, Arc::new(SchemaCache::new()), options)
    }

    /// Creates a synchronizer publishing into `cache`.
    #[must_use]
    pub fn with_cache(client: Arc<C>, cache: Arc<SchemaCache>, options: SyncOptions) -> Self {
        let reconciler = SchemaReconciler::new(Arc::clone(&client), options.clone());
        Self {
            client,
            cache,
            options,
            reconciler,
            pass: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    #[must_use]
    pub const fn client(&self) -> &Arc<C> {
        &self.client
    }

    #[must_use]
    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    #[must_use]
    pub const fn reconciler(&self) -> &SchemaReconciler<C> {
        &self.reconciler
    }

    /// Transforms and applies `statements`, then persists their facts.
    ///
    /// Every statement is transformed before anything is sent, so an
    /// unsupported construct leaves the database untouched.
    ///
    /// # Errors
    ///
    /// `SyncError::Ddl` when a statement cannot be transformed, client errors
    /// from the DDL batch or the side table, and dangling fact references
    /// when `ignore_column_not_found` is not set.
    pub async fn execute_ddl(
        &self,
        statements: &[Statement],
        ignore_column_not_found: bool,
    ) -> Result<(Vec<String>, ExtendedSchemaDiff)> {
        let _pass = self.pass.lock().await;
        self.run_ddl(statements, ignore_column_not_found).await
    }

    /// Reloads every table from the database dump into the cache.
    ///
    /// Returns the number of tables.
    ///
    /// # Errors
    ///
    /// Client errors from the schema dump, a dump that does not parse, and
    /// dangling extended facts when `ignore_column_not_found` is not set.
    pub async fn load_tables(&self, ignore_column_not_found: bool) -> Result<usize> {
        let _pass = self.pass.lock().await;
        self.reload_tables(ignore_column_not_found).await
    }

    /// Runs a full pass: side table, DDL, table reload, reconciliation.
    ///
    /// The first pass of a deployment usually runs with
    /// `ignore_column_not_found` set, since entities and DDL may not agree yet.
    ///
    /// # Errors
    ///
    /// The first error of any step. Steps that completed stay applied; the
    /// next pass picks up from the stored state.
    pub async fn synchronize(
        &self,
        entities: &[EntityMetadata],
        statements: &[Statement],
        ignore_column_not_found: bool,
    ) -> Result<SyncReport> {
        let _pass = self.pass.lock().await;
        info!(
            entities = entities.len(),
            statements = statements.len(),
            dry_run = self.options.dry_run,
            "Starting schema synchronization"
        );

        self.reload_tables(true).await?;
        self.reconciler.create_and_load_schema_table(&self.cache).await?;
        let (ddl, delta) = self.run_ddl(statements, ignore_column_not_found).await?;
        self.reload_tables(ignore_column_not_found).await?;
        let extended = self
            .reconciler
            .sync_extend_schemas(&self.cache, entities, ignore_column_not_found)
            .await?;
        let tables = self.reload_tables(ignore_column_not_found).await?;

        info!(
            ddl = ddl.len(),
            facts = delta.len() + extended.len(),
            tables,
            "Schema synchronization finished"
        );
        Ok(SyncReport {
            ddl,
            delta,
            extended,
            tables,
            dry_run: self.options.dry_run,
        })
    }

    async fn run_ddl(
        &self,
        statements: &[Statement],
        ignore_column_not_found: bool,
    ) -> Result<(Vec<String>, ExtendedSchemaDiff)> {
        let mut delta = ExtendedSchemaDelta::new();
        let ddl = transform_all(statements, &mut delta)?;
        if ddl.is_empty() {
            return Ok((ddl, ExtendedSchemaDiff::default()));
        }

        if self.options.dry_run {
            for sql in &ddl {
                info!(sql = %sql, "Would execute DDL");
            }
            let pending = ExtendedSchemaDiff {
                additions: delta.upserts().cloned().collect(),
                removals: Vec::new(),
            };
            return Ok((ddl, pending));
        }

        for sql in &ddl {
            debug!(sql = %sql, "Executing DDL");
        }
        let applied = self.client.update_ddl(ddl.clone()).await;

        let schema_table = self.options.schema_table.as_str();
        if statements
            .iter()
            .any(|s| s.touched_tables().contains(&schema_table))
        {
            debug!(table = %schema_table, "Extended schema table touched, invalidating");
            self.cache.invalidate_extended();
        }
        self.reload_tables(true).await?;
        applied?;

        if delta.is_empty() {
            return Ok((ddl, ExtendedSchemaDiff::default()));
        }
        if self.cache.table(schema_table).is_none() {
            warn!(table = %schema_table, "Extended schema table missing, facts not persisted");
            return Ok((ddl, ExtendedSchemaDiff::default()));
        }
        let diff = self
            .reconciler
            .apply_delta(&self.cache, &delta, ignore_column_not_found)
            .await?;
        if !diff.is_empty() {
            self.reload_tables(ignore_column_not_found).await?;
        }
        Ok((ddl, diff))
    }

    async fn reload_tables(&self, ignore_column_not_found: bool) -> Result<usize> {
        let dump = self.client.schema_ddl().await?;
        let tables = SchemaTextParser::new().parse(&dump)?;
        let extended = self.cache.extended();

        for table in tables.values() {
            let decorated = match &extended {
                Some(map) => map.decorate(table, ignore_column_not_found)?,
                None => table.clone(),
            };
            self.cache.replace_table(decorated);
        }
        for name in self.cache.tables().keys() {
            if !tables.contains_key(name) {
                debug!(table = %name, "Table gone, dropping from cache");
                self.cache.remove_table(name);
            }
        }
        debug!(tables = tables.len(), "Reloaded tables");
        Ok(tables.len())
    }
}
