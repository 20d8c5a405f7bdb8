//! Schema cache.
//!
//! Holds the decorated table structures and the extended schema map. Both are
//! published through `ArcSwap`, so readers take a consistent snapshot without
//! locking while a synchronization pass replaces entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use oxide_spanner::extended::ExtendedSchemaMap;
use oxide_spanner::schema::TableSchema;

type TableMap = BTreeMap<String, Arc<TableSchema>>;

/// Cached table structures and extended schema.
#[derive(Debug)]
pub struct SchemaCache {
    tables: ArcSwap<TableMap>,
    extended: ArcSwapOption<ExtendedSchemaMap>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    /// Creates an empty cache with no extended schema loaded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: ArcSwap::from_pointee(BTreeMap::new()),
            extended: ArcSwapOption::empty(),
        }
    }

    /// The cached structure of `name`.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Arc<TableSchema>> {
        self.tables.load().get(name).cloned()
    }

    /// Snapshot of every cached table.
    #[must_use]
    pub fn tables(&self) -> Arc<TableMap> {
        self.tables.load_full()
    }

    /// Publishes a fully computed table, replacing any previous entry.
    pub fn replace_table(&self, table: TableSchema) {
        let table = Arc::new(table);
        self.tables.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(table.name.clone(), Arc::clone(&table));
            next
        });
    }

    /// Drops the entry of `name`.
    pub fn remove_table(&self, name: &str) {
        self.tables.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(name);
            next
        });
    }

    /// Replaces the whole table map at once.
    pub fn replace_tables(&self, tables: impl IntoIterator<Item = TableSchema>) {
        let next: TableMap = tables
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();
        self.tables.store(Arc::new(next));
    }

    /// The loaded extended schema, if any.
    #[must_use]
    pub fn extended(&self) -> Option<Arc<ExtendedSchemaMap>> {
        self.extended.load_full()
    }

    /// Publishes a freshly loaded extended schema.
    #[must_use]
    pub fn store_extended(&self, map: ExtendedSchemaMap) -> Arc<ExtendedSchemaMap> {
        let map = Arc::new(map);
        self.extended.store(Some(Arc::clone(&map)));
        map
    }

    /// Marks the extended schema as unloaded.
    pub fn invalidate_extended(&self) {
        self.extended.store(None);
    }

    #[must_use]
    pub fn is_extended_loaded(&self) -> bool {
        self.extended.load().is_some()
    }

    /// Forgets everything.
    pub fn invalidate(&self) {
        self.tables.store(Arc::new(BTreeMap::new()));
        self.invalidate_extended();
    }
}
