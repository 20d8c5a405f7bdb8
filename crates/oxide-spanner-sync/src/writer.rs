//! Insert preparation.
//!
//! Fills the values Spanner cannot generate itself before a row is written.
//! Only inserts go through here; updates never get surrogate values.

use oxide_spanner::normalize::COMMIT_TIMESTAMP_SENTINEL;
use oxide_spanner::schema::{ColumnDefault, GenerationStrategy, TableSchema};
use oxide_spanner::surrogate::SurrogateGenerator;
use serde_json::Value;
use tracing::debug;

use crate::client::Row;
use crate::error::{Result, SyncError};

/// Completes `row` for insertion into `table`.
///
/// Absent `increment` and `uuid` columns get surrogate values and absent
/// commit-timestamp columns get the commit sentinel. Keys already present,
/// explicit nulls included, are left as they are. Returns the names of the
/// filled columns.
///
/// # Errors
///
/// [`SyncError::InvalidRow`] when `row` names a column `table` lacks, and
/// [`SyncError::Ddl`] when a surrogate value cannot be generated.
pub fn prepare_insert(table: &TableSchema, row: &mut Row) -> Result<Vec<String>> {
    if let Some(unknown) = row.keys().find(|name| !table.has_column(name)) {
        return Err(SyncError::invalid_row(
            &table.name,
            format!("unknown column '{unknown}'"),
        ));
    }

    let mut generator = SurrogateGenerator::new();
    let mut filled = Vec::new();
    for column in &table.columns {
        if row.contains_key(&column.name) {
            continue;
        }
        let value = match (&column.generation, &column.default) {
            (Some(strategy @ (GenerationStrategy::Increment | GenerationStrategy::Uuid)), _) => {
                generator.generate(strategy)?.map(Value::String)
            }
            (_, Some(ColumnDefault::CommitTimestamp)) => {
                Some(Value::from(COMMIT_TIMESTAMP_SENTINEL))
            }
            _ => None,
        };
        if let Some(value) = value {
            debug!(table = %table.name, column = %column.name, "Filled insert value");
            row.insert(column.name.clone(), value);
            filled.push(column.name.clone());
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_spanner::schema::{ColumnSchema, ColumnType};
    use serde_json::json;

    fn orders() -> TableSchema {
        TableSchema::new("orders")
            .column(
                ColumnSchema::new("id", ColumnType::Int64)
                    .not_null()
                    .generated(GenerationStrategy::Increment),
            )
            .column(
                ColumnSchema::new("token", ColumnType::String).generated(GenerationStrategy::Uuid),
            )
            .column(
                ColumnSchema::new("slug", ColumnType::String)
                    .generated(GenerationStrategy::Custom("slugger".into())),
            )
            .column(
                ColumnSchema::new("created_at", ColumnType::Timestamp)
                    .default(ColumnDefault::CommitTimestamp),
            )
            .column(ColumnSchema::new("note", ColumnType::String))
            .primary_key(&["id"])
    }

    #[test]
    fn test_fills_missing_values() {
        let mut row = Row::new();
        row.insert("note".into(), json!("hello"));
        let filled = prepare_insert(&orders(), &mut row).unwrap();
        assert_eq!(filled, vec!["id", "token", "created_at"]);

        let id = row["id"].as_str().unwrap();
        assert!(id.parse::<u64>().is_ok());
        let token = row["token"].as_str().unwrap();
        assert_eq!(token.len(), 36);
        assert_eq!(&token[14..15], "4");
        assert_eq!(row["created_at"], json!(COMMIT_TIMESTAMP_SENTINEL));
        assert!(!row.contains_key("slug"));
        assert_eq!(row["note"], json!("hello"));
    }

    #[test]
    fn test_keeps_supplied_values() {
        let mut row = Row::new();
        row.insert("id".into(), json!("42"));
        row.insert("token".into(), Value::Null);
        let filled = prepare_insert(&orders(), &mut row).unwrap();
        assert_eq!(filled, vec!["created_at"]);
        assert_eq!(row["id"], json!("42"));
        assert_eq!(row["token"], Value::Null);
    }

    #[test]
    fn test_unknown_column() {
        let mut row = Row::new();
        row.insert("bogus".into(), json!(1));
        let err = prepare_insert(&orders(), &mut row).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRow { .. }));
    }
}
