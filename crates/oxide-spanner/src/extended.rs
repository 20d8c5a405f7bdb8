//! Extended schema: per-column facts Spanner DDL cannot store.
//!
//! Generation strategies and default expressions live in a side table with
//! one row per `(table, column, property)`. [`ExtendedSchemaMap`] is the
//! in-memory view of that table, [`ExtendedSchemaDelta`] is what a DDL
//! transformation asks to change in it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DdlError, Result};
use crate::normalize::{default_fact_value, normalize_default};
use crate::schema::{ColumnDefault, GenerationStrategy, TableSchema};

/// Kind of fact stored in the side table's `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    /// Name of a custom generator.
    Generator,
    /// `increment`, `uuid` or `custom`.
    GeneratorStrategy,
    /// Default expression, or the commit-timestamp sentinel.
    Default,
}

impl PropertyType {
    /// All property types, in side-table order.
    pub const ALL: [Self; 3] = [Self::Generator, Self::GeneratorStrategy, Self::Default];

    /// Wire name of the property.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::GeneratorStrategy => "generatorStrategy",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = DdlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DdlError::malformed(s, "unknown extended schema property"))
    }
}

/// One side-table row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtendedSchemaEntry {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Fact kind.
    pub property: PropertyType,
    /// Fact value.
    pub value: String,
}

impl ExtendedSchemaEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        property: PropertyType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            property,
            value: value.into(),
        }
    }

    /// The side table's primary key for this row.
    #[must_use]
    pub fn key(&self) -> (&str, &str, PropertyType) {
        (&self.table, &self.column, self.property)
    }
}

/// Derives the facts describing one column.
///
/// A strategy yields one `generatorStrategy` fact, plus a `generator` fact
/// for custom generators. A default yields one `default` fact.
#[must_use]
pub fn facts_for_column(
    table: &str,
    column: &str,
    generation: Option<&GenerationStrategy>,
    default: Option<&ColumnDefault>,
) -> Vec<ExtendedSchemaEntry> {
    let mut facts = Vec::new();
    if let Some(strategy) = generation {
        facts.push(ExtendedSchemaEntry::new(
            table,
            column,
            PropertyType::GeneratorStrategy,
            strategy.strategy_name(),
        ));
        if let GenerationStrategy::Custom(name) = strategy {
            facts.push(ExtendedSchemaEntry::new(
                table,
                column,
                PropertyType::Generator,
                name.clone(),
            ));
        }
    }
    if let Some(default) = default {
        facts.push(ExtendedSchemaEntry::new(
            table,
            column,
            PropertyType::Default,
            default_fact_value(default),
        ));
    }
    facts
}

type ColumnFacts = BTreeMap<PropertyType, ExtendedSchemaEntry>;

/// Table → column → property → entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedSchemaMap {
    tables: BTreeMap<String, BTreeMap<String, ColumnFacts>>,
}

impl ExtendedSchemaMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, returning the one it replaced.
    pub fn insert(&mut self, entry: ExtendedSchemaEntry) -> Option<ExtendedSchemaEntry> {
        self.tables
            .entry(entry.table.clone())
            .or_default()
            .entry(entry.column.clone())
            .or_default()
            .insert(entry.property, entry)
    }

    /// Looks up one fact.
    #[must_use]
    pub fn get(&self, table: &str, column: &str, property: PropertyType) -> Option<&ExtendedSchemaEntry> {
        self.tables.get(table)?.get(column)?.get(&property)
    }

    /// Removes one fact.
    pub fn remove(
        &mut self,
        table: &str,
        column: &str,
        property: PropertyType,
    ) -> Option<ExtendedSchemaEntry> {
        let columns = self.tables.get_mut(table)?;
        let facts = columns.get_mut(column)?;
        let removed = facts.remove(&property);
        if facts.is_empty() {
            columns.remove(column);
        }
        if columns.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    /// Removes every fact of a column.
    pub fn remove_column(&mut self, table: &str, column: &str) -> Vec<ExtendedSchemaEntry> {
        let Some(columns) = self.tables.get_mut(table) else {
            return Vec::new();
        };
        let removed = columns
            .remove(column)
            .map(|facts| facts.into_values().collect())
            .unwrap_or_default();
        if columns.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    /// Removes every fact of a table.
    pub fn remove_table(&mut self, table: &str) -> Vec<ExtendedSchemaEntry> {
        self.tables
            .remove(table)
            .map(|columns| columns.into_values().flat_map(BTreeMap::into_values).collect())
            .unwrap_or_default()
    }

    /// Moves every fact of `from` to `to`.
    pub fn rename_table(&mut self, from: &str, to: &str) {
        for mut entry in self.remove_table(from) {
            entry.table = to.to_string();
            self.insert(entry);
        }
    }

    /// All entries, ordered by table, column and property.
    pub fn entries(&self) -> impl Iterator<Item = &ExtendedSchemaEntry> {
        self.tables
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
    }

    /// Names of tables holding at least one fact.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Names of the columns of `table` holding at least one fact.
    pub fn columns<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a str> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(BTreeMap::keys)
            .map(String::as_str)
    }

    /// Facts of one table, keyed by column.
    #[must_use]
    pub fn for_table(&self, table: &str) -> Option<&BTreeMap<String, ColumnFacts>> {
        self.tables.get(table)
    }

    /// Facts of one column.
    pub fn entries_for_column<'a>(
        &'a self,
        table: &str,
        column: &str,
    ) -> impl Iterator<Item = &'a ExtendedSchemaEntry> {
        self.tables
            .get(table)
            .and_then(|columns| columns.get(column))
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    /// Whether the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns a copy of `table` with generation and default facts attached.
    ///
    /// A fact naming a column the table does not have is skipped when
    /// `ignore_column_not_found` is set. Generator facts that do not resolve
    /// to a strategy, such as a `custom` strategy whose `generator` row is
    /// missing, leave the column without generation; the next reconciliation
    /// rewrites them.
    ///
    /// # Errors
    ///
    /// [`DdlError::DanglingReference`] for a fact naming a missing column
    /// when `ignore_column_not_found` is not set.
    pub fn decorate(&self, table: &TableSchema, ignore_column_not_found: bool) -> Result<TableSchema> {
        let mut decorated = table.clone();
        let Some(columns) = self.tables.get(&table.name) else {
            return Ok(decorated);
        };

        for (column_name, facts) in columns {
            let Some(column) = decorated.get_column_mut(column_name) else {
                if ignore_column_not_found {
                    warn!(
                        table = %table.name,
                        column = %column_name,
                        "Ignoring extended schema facts for missing column"
                    );
                    continue;
                }
                return Err(DdlError::dangling(
                    &table.name,
                    Some(column_name.as_str()),
                    "extended schema entry",
                ));
            };

            if let Some(strategy) = facts.get(&PropertyType::GeneratorStrategy) {
                let generator = facts.get(&PropertyType::Generator).map(|e| e.value.as_str());
                match GenerationStrategy::from_facts(&strategy.value, generator) {
                    Some(generation) => column.generation = Some(generation),
                    None => warn!(
                        table = %table.name,
                        column = %column_name,
                        strategy = %strategy.value,
                        "Incomplete generator facts, skipping"
                    ),
                }
            }
            if let Some(default) = facts.get(&PropertyType::Default) {
                column.default = Some(normalize_default(&default.value));
            }
        }
        Ok(decorated)
    }

    /// Rows to write and rows to delete to turn `self` into `target`.
    ///
    /// Entries whose value already matches are left out.
    #[must_use]
    pub fn changes_to(&self, target: &Self) -> (Vec<ExtendedSchemaEntry>, Vec<ExtendedSchemaEntry>) {
        let additions = target
            .entries()
            .filter(|entry| {
                let (table, column, property) = entry.key();
                self.get(table, column, property) != Some(*entry)
            })
            .cloned()
            .collect();
        let removals = self
            .entries()
            .filter(|entry| {
                let (table, column, property) = entry.key();
                target.get(table, column, property).is_none()
            })
            .cloned()
            .collect();
        (additions, removals)
    }
}

impl FromIterator<ExtendedSchemaEntry> for ExtendedSchemaMap {
    fn from_iter<I: IntoIterator<Item = ExtendedSchemaEntry>>(iter: I) -> Self {
        let mut map = Self::new();
        for entry in iter {
            map.insert(entry);
        }
        map
    }
}

/// One requested side-table change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    /// Insert or replace one fact.
    Upsert(ExtendedSchemaEntry),
    /// Forget every fact of a column.
    RemoveColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Forget every fact of a table.
    RemoveTable {
        /// Table name.
        table: String,
    },
    /// Move every fact of a table to its new name.
    RenameTable {
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
}

/// Ordered side-table changes produced by transforming DDL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedSchemaDelta {
    ops: Vec<DeltaOp>,
}

impl ExtendedSchemaDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation.
    pub fn push(&mut self, op: DeltaOp) {
        self.ops.push(op);
    }

    /// Appends an upsert.
    pub fn upsert(&mut self, entry: ExtendedSchemaEntry) {
        self.push(DeltaOp::Upsert(entry));
    }

    /// Appends every operation of `other`.
    pub fn append(&mut self, other: &mut Self) {
        self.ops.append(&mut other.ops);
    }

    /// Operations in order.
    #[must_use]
    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    /// Upserted entries in order.
    pub fn upserts(&self) -> impl Iterator<Item = &ExtendedSchemaEntry> {
        self.ops.iter().filter_map(|op| match op {
            DeltaOp::Upsert(entry) => Some(entry),
            _ => None,
        })
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the delta holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Replays the operations on a copy of `map`.
    #[must_use]
    pub fn applied_to(&self, map: &ExtendedSchemaMap) -> ExtendedSchemaMap {
        let mut next = map.clone();
        for op in &self.ops {
            match op {
                DeltaOp::Upsert(entry) => {
                    next.insert(entry.clone());
                }
                DeltaOp::RemoveColumn { table, column } => {
                    next.remove_column(table, column);
                }
                DeltaOp::RemoveTable { table } => {
                    next.remove_table(table);
                }
                DeltaOp::RenameTable { from, to } => next.rename_table(from, to),
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType};

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column(ColumnSchema::new("id", ColumnType::Int64).not_null())
            .column(ColumnSchema::new("created_at", ColumnType::Timestamp))
            .primary_key(&["id"])
    }

    #[test]
    fn test_property_wire_names() {
        assert_eq!(PropertyType::GeneratorStrategy.as_str(), "generatorStrategy");
        assert_eq!(
            "generatorStrategy".parse::<PropertyType>().unwrap(),
            PropertyType::GeneratorStrategy
        );
        assert_eq!(
            serde_json::to_string(&PropertyType::Default).unwrap(),
            "\"default\""
        );
        assert!("strategy".parse::<PropertyType>().is_err());
    }

    #[test]
    fn test_facts_for_custom_generator() {
        let facts = facts_for_column(
            "users",
            "id",
            Some(&GenerationStrategy::Custom("snowflake".to_string())),
            None,
        );
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].property, PropertyType::GeneratorStrategy);
        assert_eq!(facts[0].value, "custom");
        assert_eq!(facts[1].property, PropertyType::Generator);
        assert_eq!(facts[1].value, "snowflake");
    }

    #[test]
    fn test_decorate_does_not_mutate_input() {
        let table = users();
        let map: ExtendedSchemaMap = facts_for_column(
            "users",
            "id",
            Some(&GenerationStrategy::Increment),
            None,
        )
        .into_iter()
        .chain(facts_for_column(
            "users",
            "created_at",
            None,
            Some(&ColumnDefault::CommitTimestamp),
        ))
        .collect();

        let decorated = map.decorate(&table, false).unwrap();
        assert_eq!(
            decorated.get_column("id").unwrap().generation,
            Some(GenerationStrategy::Increment)
        );
        assert_eq!(
            decorated.get_column("created_at").unwrap().default,
            Some(ColumnDefault::CommitTimestamp)
        );
        assert!(table.get_column("id").unwrap().generation.is_none());
    }

    #[test]
    fn test_decorate_dangling_fact() {
        let map: ExtendedSchemaMap = facts_for_column(
            "users",
            "ghost",
            Some(&GenerationStrategy::Uuid),
            None,
        )
        .into_iter()
        .collect();

        let err = map.decorate(&users(), false).unwrap_err();
        assert!(err.is_dangling_reference());
        let decorated = map.decorate(&users(), true).unwrap();
        assert_eq!(decorated, users());
    }

    #[test]
    fn test_decorate_skips_incomplete_generator() {
        let mut map = ExtendedSchemaMap::new();
        map.insert(ExtendedSchemaEntry::new(
            "users",
            "id",
            PropertyType::GeneratorStrategy,
            "custom",
        ));
        map.insert(ExtendedSchemaEntry::new(
            "users",
            "created_at",
            PropertyType::GeneratorStrategy,
            "sequence",
        ));
        map.insert(ExtendedSchemaEntry::new(
            "users",
            "created_at",
            PropertyType::Default,
            "'now'",
        ));

        let decorated = map.decorate(&users(), false).unwrap();
        assert!(decorated.get_column("id").unwrap().generation.is_none());
        let created_at = decorated.get_column("created_at").unwrap();
        assert!(created_at.generation.is_none());
        assert_eq!(
            created_at.default,
            Some(ColumnDefault::Expression("'now'".to_string()))
        );

        map.insert(ExtendedSchemaEntry::new(
            "users",
            "id",
            PropertyType::Generator,
            "snowflake",
        ));
        let decorated = map.decorate(&users(), false).unwrap();
        assert_eq!(
            decorated.get_column("id").unwrap().generation,
            Some(GenerationStrategy::Custom("snowflake".to_string()))
        );
    }

    #[test]
    fn test_delta_replay_and_changes() {
        let mut current = ExtendedSchemaMap::new();
        current.insert(ExtendedSchemaEntry::new(
            "users",
            "id",
            PropertyType::GeneratorStrategy,
            "increment",
        ));
        current.insert(ExtendedSchemaEntry::new(
            "users",
            "note",
            PropertyType::Default,
            "'x'",
        ));

        let mut delta = ExtendedSchemaDelta::new();
        delta.push(DeltaOp::RemoveColumn {
            table: "users".to_string(),
            column: "note".to_string(),
        });
        delta.push(DeltaOp::RenameTable {
            from: "users".to_string(),
            to: "accounts".to_string(),
        });

        let target = delta.applied_to(&current);
        assert!(target.get("accounts", "id", PropertyType::GeneratorStrategy).is_some());
        assert!(target.for_table("users").is_none());

        let (additions, removals) = current.changes_to(&target);
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].table, "accounts");
        assert_eq!(removals.len(), 2);

        let (additions, removals) = target.changes_to(&target);
        assert!(additions.is_empty() && removals.is_empty());
    }
}
