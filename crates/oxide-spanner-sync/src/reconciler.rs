//! Extended schema reconciliation.
//!
//! Spanner cannot store generation strategies or client-side defaults, so
//! they live as `(table, column, type, value)` rows in a side table. The
//! reconciler loads that table, compares it with what the entities and the
//! applied DDL want, and writes the difference. Nothing is rolled back: a
//! pass that dies halfway leaves rows that the next pass's diff repairs.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{try_join, try_join_all};
use oxide_spanner::ast::{ColumnDefinition, CreateTable, DataType, Statement};
use oxide_spanner::error::DdlError;
use oxide_spanner::extended::{
    ExtendedSchemaDelta, ExtendedSchemaEntry, ExtendedSchemaMap, PropertyType,
};
use oxide_spanner::schema::{ColumnLength, TableSchema};
use oxide_spanner::transform;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::SchemaCache;
use crate::client::SpannerClient;
use crate::entity::EntityMetadata;
use crate::error::{Result, SyncError};
use crate::synchronizer::SyncOptions;

/// Columns of the side table, in storage order.
pub const SCHEMA_TABLE_COLUMNS: [&str; 4] = ["table", "column", "type", "value"];

/// Facts to write and facts to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedSchemaDiff {
    /// Facts that are missing or hold another value.
    pub additions: Vec<ExtendedSchemaEntry>,
    /// Stored facts nobody wants any more.
    pub removals: Vec<ExtendedSchemaEntry>,
}

impl ExtendedSchemaDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len()
    }
}

fn column_exists(tables: &BTreeMap<String, Arc<TableSchema>>, table: &str, column: &str) -> bool {
    tables.get(table).is_some_and(|t| t.has_column(column))
}

fn text_cell(table: &str, row: &[Value], index: usize) -> Result<String> {
    match row.get(index) {
        Some(Value::String(text)) => Ok(text.clone()),
        other => Err(SyncError::invalid_row(
            table,
            format!("{} is not a string: {other:?}", SCHEMA_TABLE_COLUMNS[index]),
        )),
    }
}

/// Keeps the side table in line with entity metadata and applied DDL.
pub struct SchemaReconciler<C: SpannerClient> {
    client: Arc<C>,
    options: SyncOptions,
}

impl<C: SpannerClient> SchemaReconciler<C> {
    /// Creates a reconciler writing through `client`.
    #[must_use]
    pub fn new(client: Arc<C>, options: SyncOptions) -> Self {
        Self { client, options }
    }

    /// Name of the side table.
    #[must_use]
    pub fn schema_table(&self) -> &str {
        &self.options.schema_table
    }

    /// `CREATE TABLE IF NOT EXISTS` for the side table.
    #[must_use]
    pub fn side_table_statement(&self) -> Statement {
        let name_type = || DataType::new("varchar").with_length(ColumnLength::Size(255));
        let mut create = CreateTable::new(self.options.schema_table.clone())
            .column(ColumnDefinition::new("table", name_type()).not_null())
            .column(ColumnDefinition::new("column", name_type()).not_null())
            .column(ColumnDefinition::new("type", name_type()).not_null())
            .column(ColumnDefinition::new("value", DataType::new("text")))
            .primary_key(&["table", "column", "type"]);
        create.if_not_exists = true;
        Statement::CreateTable(create)
    }

    /// Creates the side table when missing, then loads it into the cache.
    ///
    /// In dry-run mode the table is not created; a missing table loads as
    /// an empty map.
    ///
    /// # Errors
    ///
    /// Client errors from creating or reading the side table, and
    /// [`SyncError::InvalidRow`] for a stored row that is not a fact.
    pub async fn create_and_load_schema_table(
        &self,
        cache: &SchemaCache,
    ) -> Result<Arc<ExtendedSchemaMap>> {
        let mut delta = ExtendedSchemaDelta::new();
        let ddl = transform(&self.side_table_statement(), &mut delta)?;

        if self.options.dry_run {
            if cache.table(self.schema_table()).is_none() {
                for sql in &ddl {
                    info!(sql = %sql, "Would create extended schema table");
                }
                return Ok(cache.store_extended(ExtendedSchemaMap::new()));
            }
        } else {
            debug!(table = %self.schema_table(), "Ensuring extended schema table");
            self.client.update_ddl(ddl).await?;
        }
        self.load(cache).await
    }

    /// Reads every side-table row and publishes the resulting map.
    ///
    /// # Errors
    ///
    /// Client errors from the read, and [`SyncError::InvalidRow`] for a row
    /// with a non-text cell or an unknown property type.
    pub async fn load(&self, cache: &SchemaCache) -> Result<Arc<ExtendedSchemaMap>> {
        let table = self.schema_table();
        let rows = self.client.read_rows(table, &SCHEMA_TABLE_COLUMNS).await?;

        let mut map = ExtendedSchemaMap::new();
        for row in rows {
            let property = text_cell(table, &row, 2)?;
            let property: PropertyType = property
                .parse()
                .map_err(|err: DdlError| SyncError::invalid_row(table, err.to_string()))?;
            let value = match row.get(3) {
                Some(Value::Null) | None => {
                    debug!(table = %table, "Skipping extended schema row without value");
                    continue;
                }
                Some(_) => text_cell(table, &row, 3)?,
            };
            map.insert(ExtendedSchemaEntry::new(
                text_cell(table, &row, 0)?,
                text_cell(table, &row, 1)?,
                property,
                value,
            ));
        }
        debug!(table = %table, facts = map.len(), "Loaded extended schema");
        Ok(cache.store_extended(map))
    }

    async fn loaded(&self, cache: &SchemaCache) -> Result<Arc<ExtendedSchemaMap>> {
        match cache.extended() {
            Some(map) => Ok(map),
            None => self.load(cache).await,
        }
    }

    /// Compares what `entities` want with what is stored.
    ///
    /// Facts naming a column that does not exist, desired or stored, are
    /// dropped when `ignore_column_not_found` is set and are a
    /// [`DdlError::DanglingReference`] otherwise. Stored facts of tables with
    /// no entity are left alone.
    ///
    /// # Errors
    ///
    /// [`DdlError::DanglingReference`] for a fact naming a missing column when
    /// `ignore_column_not_found` is not set.
    pub fn diff(
        entities: &[EntityMetadata],
        loaded: &ExtendedSchemaMap,
        tables: &BTreeMap<String, Arc<TableSchema>>,
        ignore_column_not_found: bool,
    ) -> Result<ExtendedSchemaDiff> {
        let mut desired = ExtendedSchemaMap::new();
        for entity in entities {
            for fact in entity.desired_facts() {
                if !column_exists(tables, &fact.table, &fact.column) {
                    if ignore_column_not_found {
                        warn!(
                            table = %fact.table,
                            column = %fact.column,
                            "Entity column not in database, skipping its facts"
                        );
                        continue;
                    }
                    return Err(
                        DdlError::dangling(&fact.table, Some(fact.column.as_str()), "entity column")
                            .into(),
                    );
                }
                desired.insert(fact);
            }
        }

        let mut diff = ExtendedSchemaDiff::default();
        for fact in loaded.entries() {
            let (table, column, property) = fact.key();
            if !column_exists(tables, table, column) {
                if !ignore_column_not_found {
                    return Err(DdlError::dangling(table, Some(column), "extended schema entry").into());
                }
                diff.removals.push(fact.clone());
            } else if entities.iter().any(|e| e.table_name == table)
                && desired.get(table, column, property).is_none()
            {
                diff.removals.push(fact.clone());
            }
        }
        diff.additions = desired
            .entries()
            .filter(|fact| {
                let (table, column, property) = fact.key();
                loaded.get(table, column, property) != Some(*fact)
            })
            .cloned()
            .collect();
        Ok(diff)
    }

    /// Brings the side table in line with `entities`.
    ///
    /// # Errors
    ///
    /// Errors of [`SchemaReconciler::diff`] and client errors from the writes.
    /// A failed write leaves the cached map unloaded.
    pub async fn sync_extend_schemas(
        &self,
        cache: &SchemaCache,
        entities: &[EntityMetadata],
        ignore_column_not_found: bool,
    ) -> Result<ExtendedSchemaDiff> {
        let loaded = self.loaded(cache).await?;
        let tables = cache.tables();
        let diff = Self::diff(entities, &loaded, &tables, ignore_column_not_found)?;
        self.write(cache, &diff).await?;
        Ok(diff)
    }

    /// Persists the facts a transformed DDL batch produced.
    ///
    /// Runs after the DDL itself was applied and the cached tables reloaded.
    ///
    /// # Errors
    ///
    /// [`DdlError::DanglingReference`] for a fact naming a missing column when
    /// `ignore_column_not_found` is not set, and client errors from the writes.
    pub async fn apply_delta(
        &self,
        cache: &SchemaCache,
        delta: &ExtendedSchemaDelta,
        ignore_column_not_found: bool,
    ) -> Result<ExtendedSchemaDiff> {
        if delta.is_empty() {
            return Ok(ExtendedSchemaDiff::default());
        }
        let loaded = self.loaded(cache).await?;
        let tables = cache.tables();

        let mut target = ExtendedSchemaMap::new();
        for fact in delta.applied_to(&loaded).entries() {
            if !column_exists(&tables, &fact.table, &fact.column) {
                if ignore_column_not_found {
                    warn!(
                        table = %fact.table,
                        column = %fact.column,
                        "Dropping extended schema fact for missing column"
                    );
                    continue;
                }
                return Err(
                    DdlError::dangling(&fact.table, Some(fact.column.as_str()), "extended schema entry")
                        .into(),
                );
            }
            target.insert(fact.clone());
        }

        let (additions, removals) = loaded.changes_to(&target);
        let diff = ExtendedSchemaDiff { additions, removals };
        self.write(cache, &diff).await?;
        Ok(diff)
    }

    /// Issues the upserts and deletes of `diff` as one concurrent batch,
    /// then reloads the side table.
    ///
    /// Readers keep the previous map until the reload replaces it. A failed
    /// batch invalidates the map instead.
    async fn write(&self, cache: &SchemaCache, diff: &ExtendedSchemaDiff) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        info!(
            table = %self.schema_table(),
            additions = diff.additions.len(),
            removals = diff.removals.len(),
            dry_run = self.options.dry_run,
            "Reconciling extended schema"
        );
        if self.options.dry_run {
            for fact in &diff.additions {
                info!(table = %fact.table, column = %fact.column, property = %fact.property, value = %fact.value, "Would store fact");
            }
            for fact in &diff.removals {
                info!(table = %fact.table, column = %fact.column, property = %fact.property, "Would delete fact");
            }
            return Ok(());
        }

        let table = self.schema_table();
        let upserts = diff.additions.iter().map(|fact| {
            let values = vec![
                Value::from(fact.table.as_str()),
                Value::from(fact.column.as_str()),
                Value::from(fact.property.as_str()),
                Value::from(fact.value.as_str()),
            ];
            self.client.upsert_row(table, &SCHEMA_TABLE_COLUMNS, values)
        });
        let deletes = diff.removals.iter().map(|fact| {
            let key = vec![
                Value::from(fact.table.as_str()),
                Value::from(fact.column.as_str()),
                Value::from(fact.property.as_str()),
            ];
            self.client.delete_row(table, key)
        });

        if let Err(err) = try_join(try_join_all(upserts), try_join_all(deletes)).await {
            // Some rows may have landed; the cached map no longer matches storage.
            cache.invalidate_extended();
            return Err(err);
        }
        self.load(cache).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::entity::ColumnMetadata;
    use oxide_spanner::schema::{ColumnSchema, ColumnType, GenerationStrategy};

    fn tables() -> BTreeMap<String, Arc<TableSchema>> {
        let users = TableSchema::new("users")
            .column(ColumnSchema::new("id", ColumnType::Int64).not_null())
            .column(ColumnSchema::new("created_at", ColumnType::Timestamp))
            .primary_key(&["id"]);
        let logs = TableSchema::new("logs")
            .column(ColumnSchema::new("id", ColumnType::String).not_null())
            .primary_key(&["id"]);
        [users, logs]
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect()
    }

    fn users_entity() -> EntityMetadata {
        EntityMetadata::new("users")
            .column(ColumnMetadata::new("id").generated(GenerationStrategy::Increment))
            .column(ColumnMetadata::new("created_at").create_date())
    }

    fn fact(table: &str, column: &str, property: PropertyType, value: &str) -> ExtendedSchemaEntry {
        ExtendedSchemaEntry::new(table, column, property, value)
    }

    async fn reconciler_with_tables() -> (Arc<MemoryClient>, SchemaReconciler<MemoryClient>, SchemaCache) {
        let client = Arc::new(
            MemoryClient::from_dump(
                "CREATE TABLE users (id INT64 NOT NULL, created_at TIMESTAMP) PRIMARY KEY (id)",
            )
            .unwrap(),
        );
        let reconciler = SchemaReconciler::new(Arc::clone(&client), SyncOptions::new());
        let cache = SchemaCache::new();
        cache.replace_tables(tables().into_values().map(|t| (*t).clone()));
        reconciler.create_and_load_schema_table(&cache).await.unwrap();
        (client, reconciler, cache)
    }

    #[tokio::test]
    async fn test_write_replaces_snapshot_on_success() {
        let (_client, reconciler, cache) = reconciler_with_tables().await;
        let before = cache.extended().unwrap();
        assert!(before.is_empty());

        let diff = reconciler
            .sync_extend_schemas(&cache, &[users_entity()], false)
            .await
            .unwrap();
        assert_eq!(diff.additions.len(), 2);
        let after = cache.extended().unwrap();
        assert_eq!(after.len(), 2);
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_invalidates_snapshot() {
        let (client, reconciler, cache) = reconciler_with_tables().await;
        client.fail_writes_after(1).await;

        let err = reconciler
            .sync_extend_schemas(&cache, &[users_entity()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Client { .. }), "{err}");
        assert!(!cache.is_extended_loaded());

        client.clear_write_failure().await;
        let diff = reconciler
            .sync_extend_schemas(&cache, &[users_entity()], false)
            .await
            .unwrap();
        assert_eq!(diff.additions.len(), 1);
        assert!(cache.is_extended_loaded());
    }

    #[test]
    fn test_diff_from_empty_storage() {
        let diff = SchemaReconciler::<MemoryClient>::diff(
            &[users_entity()],
            &ExtendedSchemaMap::new(),
            &tables(),
            false,
        )
        .unwrap();
        assert_eq!(diff.additions.len(), 2);
        assert!(diff.removals.is_empty());
    }

    #[test]
    fn test_diff_changed_and_undesired_facts() {
        let loaded: ExtendedSchemaMap = [
            fact("users", "id", PropertyType::GeneratorStrategy, "uuid"),
            fact("users", "created_at", PropertyType::Default, "PENDING_COMMIT_TIMESTAMP()"),
            fact("users", "created_at", PropertyType::GeneratorStrategy, "increment"),
            fact("logs", "id", PropertyType::GeneratorStrategy, "uuid"),
        ]
        .into_iter()
        .collect();

        let diff = SchemaReconciler::<MemoryClient>::diff(
            &[users_entity()],
            &loaded,
            &tables(),
            false,
        )
        .unwrap();
        assert_eq!(
            diff.additions,
            vec![fact("users", "id", PropertyType::GeneratorStrategy, "increment")]
        );
        assert_eq!(
            diff.removals,
            vec![fact("users", "created_at", PropertyType::GeneratorStrategy, "increment")]
        );
    }

    #[test]
    fn test_diff_dangling_facts() {
        let loaded: ExtendedSchemaMap = [fact("users", "gone", PropertyType::Default, "1")]
            .into_iter()
            .collect();
        let entity = users_entity().column(ColumnMetadata::new("missing").default("0"));

        let err = SchemaReconciler::<MemoryClient>::diff(
            &[entity.clone()],
            &loaded,
            &tables(),
            false,
        )
        .unwrap_err();
        assert!(err.is_dangling_reference());

        let diff = SchemaReconciler::<MemoryClient>::diff(
            &[entity],
            &loaded,
            &tables(),
            true,
        )
        .unwrap();
        assert_eq!(diff.additions.len(), 2);
        assert_eq!(diff.removals, vec![fact("users", "gone", PropertyType::Default, "1")]);
    }
}
