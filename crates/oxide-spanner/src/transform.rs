//! Generic DDL to Spanner DDL.
//!
//! Spanner wants a single trailing `PRIMARY KEY (...)` clause, separate
//! `CREATE INDEX` statements, and has no notion of auto-increment or
//! client-side defaults. The transformer walks one statement, defers the key
//! and index clauses until every column has been scanned, and moves the
//! generation and default information into an [`ExtendedSchemaDelta`].
//!
//! Facts are staged while walking and only handed to the caller's delta once
//! the whole statement has been transformed, so a failed statement leaves the
//! delta as it was.

use tracing::debug;

use crate::ast::{
    AlterAction, AlterTable, ColumnDefinition, CreateDefinition, CreateIndex, CreateTable,
    DefaultExpr, DropIndex, DropTable, IndexDefinition, IndexKind, RenameTable, Statement,
    TableOption,
};
use crate::error::{DdlError, Result};
use crate::extended::{facts_for_column, DeltaOp, ExtendedSchemaDelta};
use crate::normalize::{self, index_name, quote_identifier, type_sql};
use crate::schema::{ColumnDefault, ColumnType, GenerationStrategy, IndexColumn, SortOrder};

/// Transforms one statement.
///
/// Returns the Spanner statements in execution order: the main statement(s)
/// first, index creations last. Facts are appended to `delta` only on
/// success.
///
/// # Errors
///
/// [`DdlError::UnsupportedConstruct`] for constructs Spanner cannot express,
/// and [`DdlError::DanglingReference`] when a key or index names an
/// undeclared column.
pub fn transform(statement: &Statement, delta: &mut ExtendedSchemaDelta) -> Result<Vec<String>> {
    let mut transformer = DdlTransformer::new();
    let sql = transformer.statement(statement)?;
    debug!(
        statements = sql.len(),
        facts = transformer.staged.len(),
        "Transformed statement"
    );
    delta.append(&mut transformer.staged);
    Ok(sql)
}

/// Transforms a batch of statements, all or nothing.
///
/// # Errors
///
/// The first error of any statement; `delta` is then left untouched.
pub fn transform_all(
    statements: &[Statement],
    delta: &mut ExtendedSchemaDelta,
) -> Result<Vec<String>> {
    let mut staged = ExtendedSchemaDelta::new();
    let mut sql = Vec::new();
    for statement in statements {
        sql.extend(transform(statement, &mut staged)?);
    }
    delta.append(&mut staged);
    Ok(sql)
}

/// Enclosing objects of the clause currently being transformed.
#[derive(Debug, Clone, Default)]
struct Scope {
    table: Option<String>,
    column: Option<String>,
    column_type: Option<ColumnType>,
    index: Option<String>,
}

impl Scope {
    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(table) = &self.table {
            parts.push(format!("table {table}"));
        }
        if let Some(column) = &self.column {
            parts.push(format!("column {column}"));
        }
        if let Some(index) = &self.index {
            parts.push(format!("index {index}"));
        }
        parts.join(", ")
    }
}

/// A rendered column definition.
struct RenderedColumn {
    /// `name type[ NOT NULL]`.
    definition: String,
    allow_commit_timestamp: bool,
}

impl RenderedColumn {
    const COMMIT_TIMESTAMP_OPTION: &'static str = "OPTIONS (allow_commit_timestamp=true)";

    fn sql(&self) -> String {
        if self.allow_commit_timestamp {
            format!("{} {}", self.definition, Self::COMMIT_TIMESTAMP_OPTION)
        } else {
            self.definition.clone()
        }
    }
}

/// Per-invocation transformer state.
#[derive(Debug, Default)]
struct DdlTransformer {
    scope: Scope,
    staged: ExtendedSchemaDelta,
}

impl DdlTransformer {
    fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with `scope` in place, restoring the enclosing scope after.
    fn scoped<T>(&mut self, scope: Scope, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let enclosing = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = enclosing;
        result
    }

    fn in_table<T>(&mut self, table: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let scope = Scope {
            table: Some(table.to_string()),
            ..Scope::default()
        };
        self.scoped(scope, f)
    }

    fn in_column<T>(&mut self, column: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let scope = Scope {
            column: Some(column.to_string()),
            column_type: None,
            index: None,
            ..self.scope.clone()
        };
        self.scoped(scope, f)
    }

    fn in_index<T>(&mut self, index: &str, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let scope = Scope {
            index: Some(index.to_string()),
            column: None,
            column_type: None,
            ..self.scope.clone()
        };
        self.scoped(scope, f)
    }

    fn table(&self) -> &str {
        self.scope.table.as_deref().unwrap_or_default()
    }

    fn unsupported(&self, construct: &str, detail: impl AsRef<str>) -> DdlError {
        let location = self.scope.describe();
        if location.is_empty() {
            DdlError::unsupported(construct, detail.as_ref())
        } else {
            DdlError::unsupported(construct, format!("{} ({location})", detail.as_ref()))
        }
    }

    fn statement(&mut self, statement: &Statement) -> Result<Vec<String>> {
        match statement {
            Statement::CreateTable(create) => self.create_table(create),
            Statement::AlterTable(alter) => self.alter_table(alter),
            Statement::CreateIndex(index) => self.create_index(index).map(|sql| vec![sql]),
            Statement::DropIndex(drop) => Ok(vec![Self::drop_index(drop)]),
            Statement::RenameTable(rename) => Ok(self.rename_table(rename)),
            Statement::DropTable(drop) => Ok(self.drop_table(drop)),
        }
    }

    fn create_table(&mut self, create: &CreateTable) -> Result<Vec<String>> {
        self.in_table(&create.table, |t| {
            let mut columns = Vec::new();
            let mut declared: Vec<&str> = Vec::new();
            let mut inline_key: Vec<&str> = Vec::new();
            let mut key_clause: Option<&[IndexColumn]> = None;
            let mut deferred_indices: Vec<(IndexKind, &IndexDefinition)> = Vec::new();
            let mut unique_columns: Vec<&str> = Vec::new();
            let mut auto_increment: Option<&str> = None;

            for definition in &create.definitions {
                match definition {
                    CreateDefinition::Column(column) => {
                        if column.auto_increment {
                            if let Some(first) = auto_increment {
                                return Err(t.unsupported(
                                    "auto increment",
                                    format!(
                                        "only one auto-increment column is allowed, found '{first}' and '{}'",
                                        column.name
                                    ),
                                ));
                            }
                            auto_increment = Some(column.name.as_str());
                        }
                        columns.push(t.column_definition(column)?.sql());
                        declared.push(&column.name);
                        if column.primary_key {
                            inline_key.push(&column.name);
                        } else if column.unique {
                            unique_columns.push(&column.name);
                        }
                    }
                    CreateDefinition::PrimaryKey(key) => {
                        if key_clause.is_some() {
                            return Err(t.unsupported(
                                "primary key",
                                "more than one PRIMARY KEY clause",
                            ));
                        }
                        key_clause = Some(key.columns.as_slice());
                    }
                    CreateDefinition::Index(index) => {
                        deferred_indices.push((IndexKind::Plain, index));
                    }
                    CreateDefinition::UniqueKey(index) => {
                        deferred_indices.push((IndexKind::Unique, index));
                    }
                    CreateDefinition::FulltextIndex(index) => {
                        deferred_indices.push((IndexKind::Fulltext, index));
                    }
                    CreateDefinition::SpatialIndex(index) => {
                        deferred_indices.push((IndexKind::Spatial, index));
                    }
                    CreateDefinition::ForeignKey(foreign_key) => {
                        return Err(t.unsupported(
                            "foreign key",
                            format!(
                                "foreign key to '{}' cannot be expressed; use an interleaved table",
                                foreign_key.references_table
                            ),
                        ));
                    }
                    CreateDefinition::Check(check) => {
                        return Err(t.unsupported(
                            "check constraint",
                            format!("CHECK ({}) is not supported", check.expression),
                        ));
                    }
                }
            }

            let primary_key = t.resolve_primary_key(&inline_key, key_clause, &declared)?;

            let mut sql = String::from("CREATE TABLE ");
            if create.if_not_exists {
                sql.push_str("IF NOT EXISTS ");
            }
            sql.push_str(&quote_identifier(&create.table));
            sql.push_str(" (\n  ");
            sql.push_str(&columns.join(",\n  "));
            sql.push_str("\n) PRIMARY KEY (");
            sql.push_str(&key_parts_sql(&primary_key));
            sql.push(')');
            for option in &create.options {
                match option {
                    TableOption::InterleaveInParent {
                        parent,
                        on_delete_cascade,
                    } => {
                        sql.push_str(",\n  INTERLEAVE IN PARENT ");
                        sql.push_str(&quote_identifier(parent));
                        if *on_delete_cascade {
                            sql.push_str(" ON DELETE CASCADE");
                        }
                    }
                    TableOption::Engine(_)
                    | TableOption::Charset(_)
                    | TableOption::Collate(_)
                    | TableOption::Comment(_) => {
                        debug!(table = %create.table, ?option, "Dropping table option");
                    }
                }
            }

            let mut statements = vec![sql];
            for column in unique_columns {
                let index = IndexDefinition::on(&[column]);
                let sql = t.index_sql(&index, IndexKind::Unique, None, Some(declared.as_slice()))?;
                statements.push(sql);
            }
            for (kind, index) in deferred_indices {
                statements.push(t.index_sql(index, kind, None, Some(&declared))?);
            }
            Ok(statements)
        })
    }

    /// Merges inline and clause-level key declarations into one key.
    fn resolve_primary_key(
        &self,
        inline_key: &[&str],
        key_clause: Option<&[IndexColumn]>,
        declared: &[&str],
    ) -> Result<Vec<IndexColumn>> {
        if inline_key.len() > 1 {
            return Err(self.unsupported(
                "primary key",
                format!(
                    "columns {} are each declared PRIMARY KEY",
                    inline_key.join(", ")
                ),
            ));
        }

        let key = match (inline_key.first(), key_clause) {
            (None, None) => Vec::new(),
            (Some(column), None) => vec![IndexColumn::asc(*column)],
            (None, Some(clause)) => clause.to_vec(),
            (Some(column), Some(clause)) => {
                if clause.len() != 1 || clause[0].name != *column {
                    return Err(self.unsupported(
                        "primary key",
                        format!("inline PRIMARY KEY on '{column}' conflicts with the PRIMARY KEY clause"),
                    ));
                }
                clause.to_vec()
            }
        };

        if let Some(missing) = key.iter().find(|part| !declared.contains(&part.name.as_str())) {
            return Err(DdlError::dangling(
                self.table(),
                Some(missing.name.as_str()),
                "primary key",
            ));
        }
        Ok(key)
    }

    fn column_definition(&mut self, column: &ColumnDefinition) -> Result<RenderedColumn> {
        self.in_column(&column.name, |t| {
            let (column_type, length) = normalize::column_type(&column.data_type).map_err(|err| {
                match err {
                    DdlError::UnsupportedConstruct { construct, detail } => {
                        t.unsupported(&construct, detail)
                    }
                    other => other,
                }
            })?;
            t.scope.column_type = Some(column_type);

            let mut definition = format!(
                "{} {}",
                quote_identifier(&column.name),
                type_sql(column_type, length, column.data_type.array)
            );
            if column.not_null || column.primary_key {
                definition.push_str(" NOT NULL");
            }

            let default = t.column_default(column)?;
            let allow_commit_timestamp = default == Some(ColumnDefault::CommitTimestamp);
            let generation = column.generation.clone().or_else(|| {
                column
                    .auto_increment
                    .then_some(GenerationStrategy::Increment)
            });

            let table = t.table().to_string();
            for fact in facts_for_column(&table, &column.name, generation.as_ref(), default.as_ref()) {
                t.staged.upsert(fact);
            }

            Ok(RenderedColumn {
                definition,
                allow_commit_timestamp,
            })
        })
    }

    /// Resolves the default a column should carry as a fact.
    fn column_default(&self, column: &ColumnDefinition) -> Result<Option<ColumnDefault>> {
        let default = column.default.as_ref().and_then(default_value);
        let on_update = column.on_update.as_ref().and_then(default_value);

        if let Some(on_update) = &on_update {
            if *on_update != ColumnDefault::CommitTimestamp {
                return Err(self.unsupported(
                    "on update",
                    "only ON UPDATE CURRENT_TIMESTAMP is supported",
                ));
            }
        }

        let resolved = if on_update.is_some() {
            on_update
        } else {
            default
        };
        if resolved == Some(ColumnDefault::CommitTimestamp)
            && self.scope.column_type != Some(ColumnType::Timestamp)
        {
            return Err(self.unsupported(
                "commit timestamp",
                "commit timestamp defaults require a timestamp column",
            ));
        }
        Ok(resolved)
    }

    fn alter_table(&mut self, alter: &AlterTable) -> Result<Vec<String>> {
        self.in_table(&alter.table, |t| {
            let table = quote_identifier(&alter.table);
            let mut statements = Vec::new();
            let mut indices = Vec::new();

            for action in &alter.actions {
                match action {
                    AlterAction::AddColumn(column) => {
                        if column.primary_key {
                            return Err(t.unsupported(
                                "primary key",
                                format!("cannot add primary key column '{}' to an existing table", column.name),
                            ));
                        }
                        let rendered = t.column_definition(column)?;
                        statements.push(format!("ALTER TABLE {table} ADD COLUMN {}", rendered.sql()));
                        if column.unique {
                            let index = IndexDefinition::on(&[column.name.as_str()]);
                            indices.push(t.index_sql(&index, IndexKind::Unique, None, None)?);
                        }
                    }
                    AlterAction::DropColumn { column } => {
                        statements.push(format!(
                            "ALTER TABLE {table} DROP COLUMN {}",
                            quote_identifier(column)
                        ));
                        t.staged.push(DeltaOp::RemoveColumn {
                            table: alter.table.clone(),
                            column: column.clone(),
                        });
                    }
                    AlterAction::ChangeColumn { old_name, column } => {
                        if *old_name != column.name {
                            return Err(t.unsupported(
                                "column rename",
                                format!("cannot rename column '{old_name}' to '{}'", column.name),
                            ));
                        }
                        if column.primary_key {
                            return Err(t.unsupported(
                                "primary key",
                                format!("cannot make '{}' part of the primary key", column.name),
                            ));
                        }
                        t.staged.push(DeltaOp::RemoveColumn {
                            table: alter.table.clone(),
                            column: column.name.clone(),
                        });
                        let rendered = t.column_definition(column)?;
                        statements.push(format!(
                            "ALTER TABLE {table} ALTER COLUMN {}",
                            rendered.definition
                        ));
                        if rendered.allow_commit_timestamp {
                            statements.push(format!(
                                "ALTER TABLE {table} ALTER COLUMN {} SET {}",
                                quote_identifier(&column.name),
                                RenderedColumn::COMMIT_TIMESTAMP_OPTION
                            ));
                        }
                    }
                    AlterAction::AddIndex(index) => {
                        indices.push(t.index_sql(index, IndexKind::Plain, None, None)?);
                    }
                    AlterAction::AddSpatialIndex(index) => {
                        indices.push(t.index_sql(index, IndexKind::Spatial, None, None)?);
                    }
                    AlterAction::AddUniqueKey(index) => {
                        indices.push(t.index_sql(index, IndexKind::Unique, None, None)?);
                    }
                    AlterAction::DropIndex { name } => {
                        statements.push(Self::drop_index(&DropIndex {
                            name: name.clone(),
                            table: Some(alter.table.clone()),
                        }));
                    }
                    AlterAction::AddForeignKey(foreign_key) => {
                        return Err(t.unsupported(
                            "foreign key",
                            format!(
                                "foreign key to '{}' cannot be added",
                                foreign_key.references_table
                            ),
                        ));
                    }
                    AlterAction::AddPrimaryKey(_) => {
                        return Err(t.unsupported(
                            "primary key",
                            "the primary key of an existing table cannot change",
                        ));
                    }
                }
            }

            statements.extend(indices);
            Ok(statements)
        })
    }

    fn create_index(&mut self, index: &CreateIndex) -> Result<String> {
        self.in_table(&index.table, |t| {
            let definition = IndexDefinition {
                name: index.name.clone(),
                columns: index.columns.clone(),
                null_filtered: index.null_filtered,
                storing: index.storing.clone(),
            };
            t.index_sql(&definition, index.kind, index.interleave_in.as_deref(), None)
        })
    }

    /// Renders `CREATE [UNIQUE ][NULL_FILTERED ]INDEX`.
    ///
    /// When `declared` is given, every key and storing column must be in it.
    fn index_sql(
        &mut self,
        index: &IndexDefinition,
        kind: IndexKind,
        interleave_in: Option<&str>,
        declared: Option<&[&str]>,
    ) -> Result<String> {
        let unique = kind == IndexKind::Unique;
        let table = self.table().to_string();
        let name = index.name.clone().unwrap_or_else(|| {
            let columns: Vec<&str> = index.columns.iter().map(|c| c.name.as_str()).collect();
            index_name(&table, &columns, unique)
        });

        self.in_index(&name, |t| {
            if index.columns.is_empty() {
                return Err(t.unsupported("index", "an index needs at least one column"));
            }
            if let Some(declared) = declared {
                let referenced = index
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .chain(index.storing.iter().map(String::as_str));
                for column in referenced {
                    if !declared.contains(&column) {
                        return Err(DdlError::dangling(&table, Some(column), format!("index {name}")));
                    }
                }
            }
            if matches!(kind, IndexKind::Fulltext | IndexKind::Spatial) {
                debug!(index = %name, ?kind, "Creating plain index for special index");
            }

            let mut sql = String::from("CREATE ");
            if unique {
                sql.push_str("UNIQUE ");
            }
            if index.null_filtered {
                sql.push_str("NULL_FILTERED ");
            }
            sql.push_str("INDEX ");
            sql.push_str(&quote_identifier(&name));
            sql.push_str(" ON ");
            sql.push_str(&quote_identifier(&table));
            sql.push_str(" (");
            sql.push_str(&key_parts_sql(&index.columns));
            sql.push(')');
            if !index.storing.is_empty() {
                let storing: Vec<String> = index.storing.iter().map(|c| quote_identifier(c)).collect();
                sql.push_str(" STORING (");
                sql.push_str(&storing.join(", "));
                sql.push(')');
            }
            if let Some(parent) = interleave_in {
                sql.push_str(", INTERLEAVE IN ");
                sql.push_str(&quote_identifier(parent));
            }
            Ok(sql)
        })
    }

    fn drop_index(drop: &DropIndex) -> String {
        format!("DROP INDEX {}", quote_identifier(&drop.name))
    }

    fn rename_table(&mut self, rename: &RenameTable) -> Vec<String> {
        rename
            .renames
            .iter()
            .map(|pair| {
                self.staged.push(DeltaOp::RenameTable {
                    from: pair.from.clone(),
                    to: pair.to.clone(),
                });
                format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_identifier(&pair.from),
                    quote_identifier(&pair.to)
                )
            })
            .collect()
    }

    fn drop_table(&mut self, drop: &DropTable) -> Vec<String> {
        drop.tables
            .iter()
            .map(|table| {
                self.staged.push(DeltaOp::RemoveTable {
                    table: table.clone(),
                });
                let if_exists = if drop.if_exists { "IF EXISTS " } else { "" };
                format!("DROP TABLE {if_exists}{}", quote_identifier(table))
            })
            .collect()
    }
}

/// Renders `a, b DESC`.
fn key_parts_sql(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|part| match part.order {
            SortOrder::Asc => quote_identifier(&part.name),
            SortOrder::Desc => format!("{} DESC", quote_identifier(&part.name)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves a source default to the fact it becomes; `NULL` becomes none.
fn default_value(default: &DefaultExpr) -> Option<ColumnDefault> {
    match default {
        DefaultExpr::Null => None,
        DefaultExpr::CurrentTimestamp => Some(ColumnDefault::CommitTimestamp),
        DefaultExpr::Literal(text) => Some(ColumnDefault::Expression(format!(
            "'{}'",
            text.replace('\\', "\\\\").replace('\'', "\\'")
        ))),
        DefaultExpr::Number(number) => Some(ColumnDefault::Expression(number.clone())),
        DefaultExpr::Bool(value) => Some(ColumnDefault::Expression(value.to_string())),
        DefaultExpr::Expression(expression) => Some(normalize::normalize_default(expression)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DataType, ForeignKeyDefinition, KeyDefinition, TableRename};
    use crate::extended::PropertyType;
    use crate::schema::ColumnLength;

    fn run(statement: &Statement) -> (Vec<String>, ExtendedSchemaDelta) {
        let mut delta = ExtendedSchemaDelta::new();
        let sql = transform(statement, &mut delta).unwrap();
        (sql, delta)
    }

    fn users() -> CreateTable {
        CreateTable::new("users")
            .column(
                ColumnDefinition::new("id", DataType::new("bigint"))
                    .primary_key()
                    .auto_increment(),
            )
            .column(
                ColumnDefinition::new("email", DataType::new("varchar").with_length(ColumnLength::Size(100)))
                    .not_null()
                    .unique(),
            )
            .column(
                ColumnDefinition::new("created_at", DataType::new("datetime"))
                    .default(DefaultExpr::CurrentTimestamp),
            )
            .column(
                ColumnDefinition::new("status", DataType::new("varchar"))
                    .default(DefaultExpr::Literal("draft".to_string())),
            )
            .definition(CreateDefinition::Index(IndexDefinition::on(&["status", "created_at"])))
    }

    #[test]
    fn test_create_table() {
        let (sql, delta) = run(&Statement::CreateTable(users()));

        assert_eq!(
            sql[0],
            "CREATE TABLE users (\n  \
             id int64 NOT NULL,\n  \
             email string(100) NOT NULL,\n  \
             created_at timestamp OPTIONS (allow_commit_timestamp=true),\n  \
             status string(255)\n\
             ) PRIMARY KEY (id)"
        );
        assert_eq!(sql[1], "CREATE UNIQUE INDEX uq_users_email ON users (email)");
        assert_eq!(
            sql[2],
            "CREATE INDEX idx_users_status_created_at ON users (status, created_at)"
        );
        assert_eq!(sql.len(), 3);

        let facts: Vec<_> = delta.upserts().collect();
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].column, "id");
        assert_eq!(facts[0].property, PropertyType::GeneratorStrategy);
        assert_eq!(facts[0].value, "increment");
        assert_eq!(facts[1].column, "created_at");
        assert_eq!(facts[1].value, normalize::COMMIT_TIMESTAMP_SENTINEL);
        assert_eq!(facts[2].value, "'draft'");
    }

    #[test]
    fn test_transform_is_idempotent() {
        let statement = Statement::CreateTable(users());
        assert_eq!(run(&statement), run(&statement));
    }

    #[test]
    fn test_auto_increment_yields_single_strategy_fact() {
        let statement = Statement::CreateTable(
            CreateTable::new("counters")
                .column(ColumnDefinition::new("id", DataType::new("int")).auto_increment())
                .primary_key(&["id"]),
        );
        let (sql, delta) = run(&statement);
        assert!(!sql[0].to_lowercase().contains("increment"));
        let facts: Vec<_> = delta.upserts().collect();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].property, PropertyType::GeneratorStrategy);
    }

    #[test]
    fn test_add_column_without_metadata() {
        let statement = Statement::alter(
            "t",
            AlterAction::AddColumn(ColumnDefinition::new("age", DataType::new("int"))),
        );
        let (sql, delta) = run(&statement);
        assert_eq!(sql, vec!["ALTER TABLE t ADD COLUMN age int64"]);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_alter_emits_indices_last() {
        let statement = Statement::AlterTable(AlterTable {
            table: "posts".to_string(),
            actions: vec![
                AlterAction::AddSpatialIndex(IndexDefinition::on(&["location"])),
                AlterAction::DropColumn {
                    column: "legacy".to_string(),
                },
                AlterAction::DropIndex {
                    name: "idx_posts_old".to_string(),
                },
            ],
        });
        let (sql, delta) = run(&statement);
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE posts DROP COLUMN legacy",
                "DROP INDEX idx_posts_old",
                "CREATE INDEX idx_posts_location ON posts (location)",
            ]
        );
        assert_eq!(
            delta.ops(),
            &[DeltaOp::RemoveColumn {
                table: "posts".to_string(),
                column: "legacy".to_string()
            }]
        );
    }

    #[test]
    fn test_change_column_replaces_facts() {
        let statement = Statement::alter(
            "posts",
            AlterAction::ChangeColumn {
                old_name: "published_at".to_string(),
                column: ColumnDefinition::new("published_at", DataType::new("timestamp"))
                    .not_null()
                    .default(DefaultExpr::Expression("NOW()".to_string())),
            },
        );
        let (sql, delta) = run(&statement);
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE posts ALTER COLUMN published_at timestamp NOT NULL",
                "ALTER TABLE posts ALTER COLUMN published_at SET OPTIONS (allow_commit_timestamp=true)",
            ]
        );
        assert!(matches!(delta.ops()[0], DeltaOp::RemoveColumn { .. }));
        assert!(matches!(delta.ops()[1], DeltaOp::Upsert(_)));
    }

    #[test]
    fn test_column_rename_is_unsupported() {
        let statement = Statement::alter(
            "posts",
            AlterAction::ChangeColumn {
                old_name: "title".to_string(),
                column: ColumnDefinition::new("headline", DataType::new("varchar")),
            },
        );
        let mut delta = ExtendedSchemaDelta::new();
        let err = transform(&statement, &mut delta).unwrap_err();
        assert!(matches!(err, DdlError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_failure_leaves_delta_untouched() {
        let statement = Statement::CreateTable(
            CreateTable::new("orders")
                .column(ColumnDefinition::new("id", DataType::new("int")).auto_increment())
                .column(ColumnDefinition::new("user_id", DataType::new("int")))
                .primary_key(&["id"])
                .definition(CreateDefinition::ForeignKey(ForeignKeyDefinition {
                    name: None,
                    columns: vec!["user_id".to_string()],
                    references_table: "users".to_string(),
                    references_columns: vec!["id".to_string()],
                })),
        );
        let mut delta = ExtendedSchemaDelta::new();
        let err = transform(&statement, &mut delta).unwrap_err();
        assert!(err.to_string().contains("foreign key"));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_two_auto_increment_columns() {
        let statement = Statement::CreateTable(
            CreateTable::new("t")
                .column(ColumnDefinition::new("a", DataType::new("int")).auto_increment())
                .column(ColumnDefinition::new("b", DataType::new("int")).auto_increment()),
        );
        let mut delta = ExtendedSchemaDelta::new();
        assert!(transform(&statement, &mut delta).is_err());
    }

    #[test]
    fn test_primary_key_rules() {
        let conflicting = Statement::CreateTable(
            CreateTable::new("t")
                .column(ColumnDefinition::new("a", DataType::new("int")).primary_key())
                .column(ColumnDefinition::new("b", DataType::new("int")))
                .primary_key(&["b"]),
        );
        let mut delta = ExtendedSchemaDelta::new();
        assert!(matches!(
            transform(&conflicting, &mut delta),
            Err(DdlError::UnsupportedConstruct { .. })
        ));

        let dangling = Statement::CreateTable(
            CreateTable::new("t")
                .column(ColumnDefinition::new("a", DataType::new("int")))
                .definition(CreateDefinition::PrimaryKey(KeyDefinition {
                    columns: vec![IndexColumn::asc("a"), IndexColumn::desc("z")],
                })),
        );
        let err = transform(&dangling, &mut delta).unwrap_err();
        assert!(err.is_dangling_reference());

        let add_key = Statement::alter(
            "t",
            AlterAction::AddPrimaryKey(KeyDefinition {
                columns: vec![IndexColumn::asc("a")],
            }),
        );
        assert!(transform(&add_key, &mut delta).is_err());
    }

    #[test]
    fn test_commit_timestamp_requires_timestamp() {
        let statement = Statement::CreateTable(
            CreateTable::new("t").column(
                ColumnDefinition::new("day", DataType::new("date"))
                    .default(DefaultExpr::CurrentTimestamp),
            ),
        );
        let mut delta = ExtendedSchemaDelta::new();
        let err = transform(&statement, &mut delta).unwrap_err();
        assert!(err.to_string().contains("column day"));
    }

    #[test]
    fn test_create_index_forms() {
        let statement = Statement::CreateIndex(CreateIndex {
            name: None,
            table: "songs".to_string(),
            kind: IndexKind::Unique,
            columns: vec![IndexColumn::asc("album_id"), IndexColumn::desc("track")],
            null_filtered: true,
            storing: vec!["title".to_string()],
            interleave_in: Some("albums".to_string()),
        });
        let (sql, _) = run(&statement);
        assert_eq!(
            sql,
            vec![
                "CREATE UNIQUE NULL_FILTERED INDEX uq_songs_album_id_track ON songs \
                 (album_id, track DESC) STORING (title), INTERLEAVE IN albums"
            ]
        );
    }

    #[test]
    fn test_rename_and_drop_tables() {
        let (sql, delta) = run(&Statement::RenameTable(RenameTable {
            renames: vec![
                TableRename {
                    from: "a".to_string(),
                    to: "b".to_string(),
                },
                TableRename {
                    from: "order".to_string(),
                    to: "orders".to_string(),
                },
            ],
        }));
        assert_eq!(
            sql,
            vec!["ALTER TABLE a RENAME TO b", "ALTER TABLE `order` RENAME TO orders"]
        );
        assert_eq!(delta.len(), 2);

        let (sql, delta) = run(&Statement::DropTable(DropTable {
            tables: vec!["a".to_string(), "b".to_string()],
            if_exists: true,
        }));
        assert_eq!(sql, vec!["DROP TABLE IF EXISTS a", "DROP TABLE IF EXISTS b"]);
        assert!(matches!(delta.ops()[1], DeltaOp::RemoveTable { .. }));
    }

    #[test]
    fn test_transform_all_is_all_or_nothing() {
        let good = Statement::alter(
            "t",
            AlterAction::AddColumn(
                ColumnDefinition::new("id2", DataType::new("uuid"))
                    .generated(GenerationStrategy::Uuid),
            ),
        );
        let bad = Statement::alter(
            "t",
            AlterAction::AddColumn(ColumnDefinition::new("shape", DataType::new("geometry"))),
        );
        let mut delta = ExtendedSchemaDelta::new();
        assert!(transform_all(&[good.clone(), bad], &mut delta).is_err());
        assert!(delta.is_empty());

        let sql = transform_all(&[good], &mut delta).unwrap();
        assert_eq!(sql, vec!["ALTER TABLE t ADD COLUMN id2 string(36)"]);
        assert_eq!(delta.len(), 1);
    }
}
