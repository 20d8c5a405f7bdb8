//! In-memory Spanner client.
//!
//! Keeps tables as parsed [`TableSchema`] values and rows keyed by primary
//! key. DDL is applied statement by statement with Spanner's validation
//! rules for the statement forms the transformer emits. Writes can be made
//! to fail after a given count to simulate a crash in the middle of a pass.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use oxide_spanner::ast::Statement;
use oxide_spanner::extended::ExtendedSchemaDelta;
use oxide_spanner::normalize::unquote_identifier;
use oxide_spanner::parser::{parse_column_definition, SchemaTextParser};
use oxide_spanner::schema::{ColumnDefault, TableSchema};
use oxide_spanner::transform_all;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Row, SpannerClient};
use crate::error::{Result, SyncError};

const IDENT: &str = r"(`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)";

fn statement_regex(pattern: &str) -> Regex {
    Regex::new(&pattern.replace("{IDENT}", IDENT)).expect("valid statement regex")
}

static CREATE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?{IDENT}"));
static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    statement_regex(r"(?is)^\s*CREATE\s+(?:UNIQUE\s+)?(?:NULL_FILTERED\s+)?INDEX\s+{IDENT}\s+ON\s+{IDENT}")
});
static DROP_TABLE: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?{IDENT}\s*$"));
static DROP_INDEX: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^\s*DROP\s+INDEX\s+{IDENT}\s*$"));
static ALTER_TABLE: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^\s*ALTER\s+TABLE\s+{IDENT}\s+(.+)$"));
static ADD_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^ADD\s+COLUMN\s+(.+)$"));
static DROP_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^DROP\s+COLUMN\s+{IDENT}\s*$"));
static SET_OPTIONS: LazyLock<Regex> = LazyLock::new(|| {
    statement_regex(
        r"(?is)^ALTER\s+COLUMN\s+{IDENT}\s+SET\s+OPTIONS\s*\(\s*allow_commit_timestamp\s*=\s*(true|false|null)\s*\)\s*$",
    )
});
static ALTER_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^ALTER\s+COLUMN\s+(.+)$"));
static RENAME_TO: LazyLock<Regex> =
    LazyLock::new(|| statement_regex(r"(?is)^RENAME\s+TO\s+{IDENT}\s*$"));

fn rejected(statement: &str, message: impl std::fmt::Display) -> SyncError {
    SyncError::client("update_ddl", format!("{message}: {}", statement.trim()))
}

/// Renders a table the way Spanner dumps it.
fn render(table: &TableSchema) -> Result<Vec<String>> {
    let mut delta = ExtendedSchemaDelta::new();
    Ok(transform_all(&Statement::for_table(table), &mut delta)?)
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, TableSchema>,
    rows: BTreeMap<String, BTreeMap<String, Row>>,
    applied_ddl: Vec<String>,
    writes: usize,
    write_limit: Option<usize>,
}

impl MemoryState {
    fn apply(&mut self, statement: &str) -> Result<()> {
        if let Some(captures) = CREATE_TABLE.captures(statement) {
            let if_not_exists = captures.get(1).is_some();
            let name = unquote_identifier(&captures[2]);
            self.create_table(statement, &name, if_not_exists)
        } else if let Some(captures) = CREATE_INDEX.captures(statement) {
            let index = unquote_identifier(&captures[1]);
            let table = unquote_identifier(&captures[2]);
            self.create_index(statement, &index, &table)
        } else if let Some(captures) = DROP_TABLE.captures(statement) {
            let if_exists = captures.get(1).is_some();
            let name = unquote_identifier(&captures[2]);
            self.drop_table(statement, &name, if_exists)
        } else if let Some(captures) = DROP_INDEX.captures(statement) {
            self.drop_index(statement, &unquote_identifier(&captures[1]))
        } else if let Some(captures) = ALTER_TABLE.captures(statement) {
            let table = unquote_identifier(&captures[1]);
            let action = captures.get(2).map_or("", |m| m.as_str()).trim();
            self.alter_table(statement, &table, action)
        } else {
            Err(rejected(statement, "unsupported statement"))
        }
    }

    fn table_mut(&mut self, statement: &str, name: &str) -> Result<&mut TableSchema> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| rejected(statement, format!("table '{name}' not found")))
    }

    fn create_table(&mut self, statement: &str, name: &str, if_not_exists: bool) -> Result<()> {
        if self.tables.contains_key(name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(rejected(statement, format!("table '{name}' already exists")));
        }
        let mut parsed = SchemaTextParser::new().parse(&[statement])?;
        let table = parsed
            .remove(name)
            .ok_or_else(|| rejected(statement, "no table in statement"))?;
        if let Some(interleave) = &table.interleave {
            if !self.tables.contains_key(&interleave.parent) {
                return Err(rejected(
                    statement,
                    format!("parent table '{}' not found", interleave.parent),
                ));
            }
        }
        self.tables.insert(name.to_string(), table);
        self.rows.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    fn create_index(&mut self, statement: &str, index: &str, table: &str) -> Result<()> {
        if self.index_owner(index).is_some() {
            return Err(rejected(statement, format!("index '{index}' already exists")));
        }
        let current = self
            .tables
            .get(table)
            .ok_or_else(|| rejected(statement, format!("table '{table}' not found")))?;
        let mut statements = render(current)?;
        statements.push(statement.to_string());
        let mut parsed = SchemaTextParser::new().parse(&statements)?;
        let updated = parsed
            .remove(table)
            .ok_or_else(|| rejected(statement, "table vanished while indexing"))?;
        self.tables.insert(table.to_string(), updated);
        Ok(())
    }

    fn drop_table(&mut self, statement: &str, name: &str, if_exists: bool) -> Result<()> {
        if !self.tables.contains_key(name) {
            if if_exists {
                return Ok(());
            }
            return Err(rejected(statement, format!("table '{name}' not found")));
        }
        let child = self
            .tables
            .values()
            .find(|t| t.interleave.as_ref().is_some_and(|i| i.parent == name));
        if let Some(child) = child {
            return Err(rejected(
                statement,
                format!("table '{}' is interleaved in '{name}'", child.name),
            ));
        }
        self.tables.remove(name);
        self.rows.remove(name);
        Ok(())
    }

    fn drop_index(&mut self, statement: &str, index: &str) -> Result<()> {
        let owner = self
            .index_owner(index)
            .ok_or_else(|| rejected(statement, format!("index '{index}' not found")))?;
        let table = self.table_mut(statement, &owner)?;
        table.indices.retain(|i| i.name != index);
        table.uniques.retain(|u| u.name != index);
        let still_unique: Vec<String> = table
            .uniques
            .iter()
            .flat_map(|u| u.columns.iter().cloned())
            .collect();
        for column in &mut table.columns {
            column.is_unique = still_unique.contains(&column.name);
        }
        Ok(())
    }

    fn index_owner(&self, index: &str) -> Option<String> {
        self.tables
            .values()
            .find(|t| t.get_index(index).is_some())
            .map(|t| t.name.clone())
    }

    fn alter_table(&mut self, statement: &str, name: &str, action: &str) -> Result<()> {
        if let Some(captures) = ADD_COLUMN.captures(action) {
            let column = parse_column_definition(&captures[1])?;
            let table = self.table_mut(statement, name)?;
            if table.has_column(&column.name) {
                return Err(rejected(statement, format!("column '{}' already exists", column.name)));
            }
            table.columns.push(column);
            Ok(())
        } else if let Some(captures) = DROP_COLUMN.captures(action) {
            let column = unquote_identifier(&captures[1]);
            let table = self.table_mut(statement, name)?;
            if !table.has_column(&column) {
                return Err(rejected(statement, format!("column '{column}' not found")));
            }
            if table.is_primary(&column) {
                return Err(rejected(statement, "cannot drop a primary key column"));
            }
            let indexed = table
                .indices
                .iter()
                .any(|i| i.column_names().any(|c| c == column) || i.storing.contains(&column));
            if indexed {
                return Err(rejected(statement, format!("column '{column}' is indexed")));
            }
            table.columns.retain(|c| c.name != column);
            if let Some(rows) = self.rows.get_mut(name) {
                for row in rows.values_mut() {
                    row.remove(&column);
                }
            }
            Ok(())
        } else if let Some(captures) = SET_OPTIONS.captures(action) {
            let column_name = unquote_identifier(&captures[1]);
            let allow = captures[2].eq_ignore_ascii_case("true");
            let table = self.table_mut(statement, name)?;
            let column = table
                .get_column_mut(&column_name)
                .ok_or_else(|| rejected(statement, format!("column '{column_name}' not found")))?;
            if allow {
                column.default = Some(ColumnDefault::CommitTimestamp);
            } else if column.default == Some(ColumnDefault::CommitTimestamp) {
                column.default = None;
            }
            Ok(())
        } else if let Some(captures) = ALTER_COLUMN.captures(action) {
            let altered = parse_column_definition(&captures[1])?;
            let table = self.table_mut(statement, name)?;
            let column = table
                .get_column_mut(&altered.name)
                .ok_or_else(|| rejected(statement, format!("column '{}' not found", altered.name)))?;
            column.column_type = altered.column_type;
            column.nullable = altered.nullable;
            column.length = altered.length;
            column.is_array = altered.is_array;
            column.default = altered.default;
            Ok(())
        } else if let Some(captures) = RENAME_TO.captures(action) {
            let new_name = unquote_identifier(&captures[1]);
            self.rename_table(statement, name, &new_name)
        } else {
            Err(rejected(statement, "unsupported ALTER TABLE action"))
        }
    }

    fn rename_table(&mut self, statement: &str, from: &str, to: &str) -> Result<()> {
        if self.tables.contains_key(to) {
            return Err(rejected(statement, format!("table '{to}' already exists")));
        }
        let mut table = self
            .tables
            .remove(from)
            .ok_or_else(|| rejected(statement, format!("table '{from}' not found")))?;
        table.name = to.to_string();
        for index in &mut table.indices {
            index.table = to.to_string();
        }
        for child in self.tables.values_mut() {
            if let Some(interleave) = child.interleave.as_mut().filter(|i| i.parent == from) {
                interleave.parent = to.to_string();
            }
        }
        self.tables.insert(to.to_string(), table);
        let rows = self.rows.remove(from).unwrap_or_default();
        self.rows.insert(to.to_string(), rows);
        Ok(())
    }

    fn record_write(&mut self, operation: &str) -> Result<()> {
        if self.write_limit.is_some_and(|limit| self.writes >= limit) {
            return Err(SyncError::client(operation, "injected write failure"));
        }
        self.writes += 1;
        Ok(())
    }

    fn table(&self, operation: &str, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| SyncError::client(operation, format!("table '{name}' not found")))
    }
}

/// Key of a row: its primary key values in key order.
fn encode_key(values: &[&Value]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

/// In-memory implementation of [`SpannerClient`].
#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<MemoryState>,
}

impl MemoryClient {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a database holding the tables of a schema dump.
    ///
    /// # Errors
    ///
    /// [`SyncError::Ddl`] when the dump does not parse.
    pub fn from_dump(dump: &str) -> Result<Self> {
        let tables = SchemaTextParser::new().parse_dump(dump)?;
        let rows = tables
            .keys()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        Ok(Self {
            state: Mutex::new(MemoryState {
                tables,
                rows,
                ..MemoryState::default()
            }),
        })
    }

    /// Makes every write after the next `writes` successful ones fail.
    pub async fn fail_writes_after(&self, writes: usize) {
        let mut state = self.state.lock().await;
        state.write_limit = Some(state.writes + writes);
    }

    /// Lets writes succeed again.
    pub async fn clear_write_failure(&self) {
        self.state.lock().await.write_limit = None;
    }

    /// Number of successful row writes so far.
    pub async fn writes(&self) -> usize {
        self.state.lock().await.writes
    }

    /// Every DDL statement applied so far, in order.
    pub async fn applied_ddl(&self) -> Vec<String> {
        self.state.lock().await.applied_ddl.clone()
    }

    /// The stored structure of `name`.
    pub async fn table(&self, name: &str) -> Option<TableSchema> {
        self.state.lock().await.tables.get(name).cloned()
    }

    /// Every row of `table` in key order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .await
            .rows
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl SpannerClient for MemoryClient {
    async fn update_ddl(&self, statements: Vec<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        for statement in statements {
            debug!(sql = %statement, "Applying DDL");
            state.apply(&statement)?;
            state.applied_ddl.push(statement);
        }
        Ok(())
    }

    async fn schema_ddl(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let depth = |table: &TableSchema| {
            let mut depth = 0usize;
            let mut parent = table.interleave.as_ref().map(|i| i.parent.as_str());
            while let Some(name) = parent {
                depth += 1;
                if depth > state.tables.len() {
                    break;
                }
                parent = state
                    .tables
                    .get(name)
                    .and_then(|t| t.interleave.as_ref())
                    .map(|i| i.parent.as_str());
            }
            depth
        };
        let mut tables: Vec<&TableSchema> = state.tables.values().collect();
        tables.sort_by_key(|t| depth(*t));

        let mut statements = Vec::new();
        for table in tables {
            statements.extend(render(table)?);
        }
        Ok(statements)
    }

    async fn read_rows(&self, table: &str, columns: &[&str]) -> Result<Vec<Vec<Value>>> {
        let state = self.state.lock().await;
        let schema = state.table("read_rows", table)?;
        if let Some(missing) = columns.iter().find(|c| !schema.has_column(c)) {
            return Err(SyncError::client(
                "read_rows",
                format!("column '{table}.{missing}' not found"),
            ));
        }
        let rows = state
            .rows
            .get(table)
            .map(|rows| {
                rows.values()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn upsert_row(&self, table: &str, columns: &[&str], values: Vec<Value>) -> Result<()> {
        if columns.len() != values.len() {
            return Err(SyncError::invalid_row(
                table,
                format!("{} columns but {} values", columns.len(), values.len()),
            ));
        }
        let mut state = self.state.lock().await;
        let schema = state.table("upsert_row", table)?;
        if let Some(missing) = columns.iter().find(|c| !schema.has_column(c)) {
            return Err(SyncError::invalid_row(table, format!("unknown column '{missing}'")));
        }
        let incoming: Row = columns
            .iter()
            .map(|c| (*c).to_string())
            .zip(values)
            .collect();
        let key_values = schema
            .primary_key
            .iter()
            .map(|pk| {
                incoming
                    .get(pk)
                    .ok_or_else(|| SyncError::invalid_row(table, format!("missing key column '{pk}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        let key = encode_key(&key_values)?;

        state.record_write("upsert_row")?;
        let rows = state.rows.entry(table.to_string()).or_default();
        rows.entry(key).or_default().extend(incoming);
        Ok(())
    }

    async fn delete_row(&self, table: &str, key: Vec<Value>) -> Result<()> {
        let mut state = self.state.lock().await;
        let schema = state.table("delete_row", table)?;
        if key.len() != schema.primary_key.len() {
            return Err(SyncError::invalid_row(
                table,
                format!("key has {} parts, expected {}", key.len(), schema.primary_key.len()),
            ));
        }
        let key = encode_key(&key.iter().collect::<Vec<_>>())?;

        state.record_write("delete_row")?;
        if let Some(rows) = state.rows.get_mut(table) {
            rows.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DUMP: &str = "CREATE TABLE users (\n  \
                        id INT64 NOT NULL,\n  \
                        email STRING(100),\n\
                        ) PRIMARY KEY (id);\n\
                        CREATE UNIQUE INDEX uq_users_email ON users (email)";

    #[tokio::test]
    async fn test_schema_ddl_round_trips() {
        let client = MemoryClient::from_dump(DUMP).unwrap();
        let ddl = client.schema_ddl().await.unwrap();
        assert_eq!(ddl.len(), 2);

        let tables = SchemaTextParser::new().parse(&ddl).unwrap();
        assert!(tables["users"].get_column("email").unwrap().is_unique);
    }

    #[tokio::test]
    async fn test_alter_statements() {
        let client = MemoryClient::from_dump(DUMP).unwrap();
        client
            .update_ddl(vec![
                "ALTER TABLE users ADD COLUMN created_at timestamp".to_string(),
                "ALTER TABLE users ALTER COLUMN created_at timestamp NOT NULL".to_string(),
                "ALTER TABLE users ALTER COLUMN created_at SET OPTIONS (allow_commit_timestamp=true)"
                    .to_string(),
                "CREATE INDEX idx_users_created_at ON users (created_at)".to_string(),
                "ALTER TABLE users RENAME TO accounts".to_string(),
            ])
            .await
            .unwrap();

        assert!(client.table("users").await.is_none());
        let accounts = client.table("accounts").await.unwrap();
        let created_at = accounts.get_column("created_at").unwrap();
        assert!(!created_at.nullable);
        assert_eq!(created_at.default, Some(ColumnDefault::CommitTimestamp));
        assert_eq!(accounts.indices.len(), 2);
        assert!(accounts.indices.iter().all(|i| i.table == "accounts"));
        assert_eq!(client.applied_ddl().await.len(), 5);
    }

    #[tokio::test]
    async fn test_rejected_statement_keeps_earlier_ones() {
        let client = MemoryClient::from_dump(DUMP).unwrap();
        let err = client
            .update_ddl(vec![
                "ALTER TABLE users ADD COLUMN age int64".to_string(),
                "ALTER TABLE users DROP COLUMN email".to_string(),
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("indexed"));
        assert!(client.table("users").await.unwrap().has_column("age"));
    }

    #[tokio::test]
    async fn test_rows_and_write_failures() {
        let client = MemoryClient::from_dump(DUMP).unwrap();
        client
            .upsert_row("users", &["id", "email"], vec![json!("1"), json!("a@example.com")])
            .await
            .unwrap();
        client
            .upsert_row("users", &["id", "email"], vec![json!("1"), json!("b@example.com")])
            .await
            .unwrap();
        let rows = client.read_rows("users", &["email"]).await.unwrap();
        assert_eq!(rows, vec![vec![json!("b@example.com")]]);

        client.fail_writes_after(0).await;
        let err = client.delete_row("users", vec![json!("1")]).await.unwrap_err();
        assert!(matches!(err, SyncError::Client { .. }));
        client.clear_write_failure().await;
        client.delete_row("users", vec![json!("1")]).await.unwrap();
        assert!(client.rows("users").await.is_empty());
        assert_eq!(client.writes().await, 3);
    }

    #[tokio::test]
    async fn test_upsert_requires_key() {
        let client = MemoryClient::from_dump(DUMP).unwrap();
        let err = client
            .upsert_row("users", &["email"], vec![json!("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRow { .. }));
    }
}
