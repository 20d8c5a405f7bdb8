//! Generic DDL syntax tree.
//!
//! The external parser hands statements over in this shape (usually as
//! JSON). Every statement and clause kind the transformer understands is a
//! variant here, so `match` exhaustiveness keeps new constructs from slipping
//! through unhandled.

use serde::{Deserialize, Serialize};

use crate::schema::{
    ColumnDefault, ColumnLength, ColumnSchema, GenerationStrategy, IndexColumn, IndexSchema,
    TableSchema,
};

/// A generic type reference, e.g. `varchar(50)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    /// Type name as written in the source dialect.
    pub name: String,
    /// Length parameter, if any.
    #[serde(default)]
    pub length: Option<ColumnLength>,
    /// Whether the column holds an array of this type.
    #[serde(default)]
    pub array: bool,
}

impl DataType {
    /// Creates a scalar type reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            array: false,
        }
    }

    /// Sets the length parameter.
    #[must_use]
    pub fn with_length(mut self, length: ColumnLength) -> Self {
        self.length = Some(length);
        self
    }
}

/// A column default as the source dialect spells it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DefaultExpr {
    /// `DEFAULT NULL`.
    Null,
    /// A quoted string literal (unquoted text).
    Literal(String),
    /// A numeric literal.
    Number(String),
    /// A boolean literal.
    Bool(bool),
    /// `CURRENT_TIMESTAMP` and its spellings.
    CurrentTimestamp,
    /// Any other expression.
    Expression(String),
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub data_type: DataType,
    /// `NOT NULL`.
    #[serde(default)]
    pub not_null: bool,
    /// `DEFAULT ...`.
    #[serde(default)]
    pub default: Option<DefaultExpr>,
    /// `ON UPDATE ...`.
    #[serde(default)]
    pub on_update: Option<DefaultExpr>,
    /// `AUTO_INCREMENT`.
    #[serde(default)]
    pub auto_increment: bool,
    /// Generation strategy carried by the intermediate dialect.
    #[serde(default)]
    pub generation: Option<GenerationStrategy>,
    /// Inline `PRIMARY KEY`.
    #[serde(default)]
    pub primary_key: bool,
    /// Inline `UNIQUE`.
    #[serde(default)]
    pub unique: bool,
}

impl ColumnDefinition {
    /// Creates a nullable column definition.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            default: None,
            on_update: None,
            auto_increment: false,
            generation: None,
            primary_key: false,
            unique: false,
        }
    }

    /// Marks the column `NOT NULL`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Marks the column as an inline primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column `AUTO_INCREMENT`.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the default.
    #[must_use]
    pub fn default(mut self, default: DefaultExpr) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets the generation strategy.
    #[must_use]
    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generation = Some(strategy);
        self
    }

    /// Marks the column inline `UNIQUE`.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builds the definition that recreates a stored column.
    #[must_use]
    pub fn from_column(column: &ColumnSchema) -> Self {
        Self {
            name: column.name.clone(),
            data_type: DataType {
                name: column.column_type.as_str().to_string(),
                length: column.length,
                array: column.is_array,
            },
            not_null: !column.nullable,
            default: column.default.as_ref().map(|default| match default {
                ColumnDefault::CommitTimestamp => DefaultExpr::CurrentTimestamp,
                ColumnDefault::Expression(expression) => DefaultExpr::Expression(expression.clone()),
            }),
            on_update: None,
            auto_increment: false,
            generation: column.generation.clone(),
            primary_key: false,
            unique: false,
        }
    }
}

/// Key parts of a `PRIMARY KEY (...)` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    /// Key parts in order.
    pub columns: Vec<IndexColumn>,
}

/// An index or unique key clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Explicit name; derived from table and columns when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Key parts in order.
    pub columns: Vec<IndexColumn>,
    /// `NULL_FILTERED`.
    #[serde(default)]
    pub null_filtered: bool,
    /// `STORING (...)` columns.
    #[serde(default)]
    pub storing: Vec<String>,
}

impl IndexDefinition {
    /// Unnamed ascending index over `columns`.
    #[must_use]
    pub fn on(columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| IndexColumn::asc(*c)).collect(),
            null_filtered: false,
            storing: Vec::new(),
        }
    }

    /// Sets the index name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A `FOREIGN KEY` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    /// Constraint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
}

/// A `CHECK` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Constraint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Check expression.
    pub expression: String,
}

/// One entry of a `CREATE TABLE` definition list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "definition", rename_all = "snake_case")]
pub enum CreateDefinition {
    /// A column.
    Column(ColumnDefinition),
    /// `PRIMARY KEY (...)`.
    PrimaryKey(KeyDefinition),
    /// `INDEX ...`.
    Index(IndexDefinition),
    /// `UNIQUE KEY ...`.
    UniqueKey(IndexDefinition),
    /// `FULLTEXT INDEX ...`.
    FulltextIndex(IndexDefinition),
    /// `SPATIAL INDEX ...`.
    SpatialIndex(IndexDefinition),
    /// `FOREIGN KEY ...`.
    ForeignKey(ForeignKeyDefinition),
    /// `CHECK (...)`.
    Check(CheckDefinition),
}

/// Table options trailing a `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum TableOption {
    /// `INTERLEAVE IN PARENT ...`.
    InterleaveInParent {
        /// Parent table.
        parent: String,
        /// `ON DELETE CASCADE`.
        #[serde(default)]
        on_delete_cascade: bool,
    },
    /// Storage engine (no Spanner meaning).
    Engine(String),
    /// Character set (no Spanner meaning).
    Charset(String),
    /// Collation (no Spanner meaning).
    Collate(String),
    /// Table comment (no Spanner meaning).
    Comment(String),
}

/// `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTable {
    /// Table name.
    pub table: String,
    /// `IF NOT EXISTS`.
    #[serde(default)]
    pub if_not_exists: bool,
    /// Columns, keys and constraints in declaration order.
    pub definitions: Vec<CreateDefinition>,
    /// Table options.
    #[serde(default)]
    pub options: Vec<TableOption>,
}

impl CreateTable {
    /// Creates an empty `CREATE TABLE`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            if_not_exists: false,
            definitions: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.definitions.push(CreateDefinition::Column(column));
        self
    }

    /// Appends a definition.
    #[must_use]
    pub fn definition(mut self, definition: CreateDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Appends a `PRIMARY KEY` clause over ascending columns.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.definitions
            .push(CreateDefinition::PrimaryKey(KeyDefinition {
                columns: columns.iter().map(|c| IndexColumn::asc(*c)).collect(),
            }));
        self
    }

    /// Appends a table option.
    #[must_use]
    pub fn option(mut self, option: TableOption) -> Self {
        self.options.push(option);
        self
    }
}

/// One alteration of an `ALTER TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AlterAction {
    /// `ADD COLUMN`.
    AddColumn(ColumnDefinition),
    /// `DROP COLUMN`.
    DropColumn {
        /// Dropped column.
        column: String,
    },
    /// `CHANGE COLUMN old new_definition`.
    ChangeColumn {
        /// Current column name.
        old_name: String,
        /// New definition.
        column: ColumnDefinition,
    },
    /// `ADD INDEX`.
    AddIndex(IndexDefinition),
    /// `ADD SPATIAL INDEX`.
    AddSpatialIndex(IndexDefinition),
    /// `ADD UNIQUE KEY`.
    AddUniqueKey(IndexDefinition),
    /// `DROP INDEX`.
    DropIndex {
        /// Dropped index.
        name: String,
    },
    /// `ADD FOREIGN KEY`.
    AddForeignKey(ForeignKeyDefinition),
    /// `ADD PRIMARY KEY`.
    AddPrimaryKey(KeyDefinition),
}

/// `ALTER TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterTable {
    /// Altered table.
    pub table: String,
    /// Alterations in order.
    pub actions: Vec<AlterAction>,
}

/// Index kind of a standalone `CREATE INDEX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Plain index.
    #[default]
    Plain,
    /// `UNIQUE`.
    Unique,
    /// `FULLTEXT`.
    Fulltext,
    /// `SPATIAL`.
    Spatial,
}

/// `CREATE INDEX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndex {
    /// Explicit name; derived from table and columns when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed table.
    pub table: String,
    /// Index kind.
    #[serde(default)]
    pub kind: IndexKind,
    /// Key parts in order.
    pub columns: Vec<IndexColumn>,
    /// `NULL_FILTERED`.
    #[serde(default)]
    pub null_filtered: bool,
    /// `STORING (...)` columns.
    #[serde(default)]
    pub storing: Vec<String>,
    /// `INTERLEAVE IN ...`.
    #[serde(default)]
    pub interleave_in: Option<String>,
}

impl CreateIndex {
    /// Builds the statement that recreates a stored index.
    #[must_use]
    pub fn from_index(index: &IndexSchema) -> Self {
        let kind = if index.unique {
            IndexKind::Unique
        } else {
            IndexKind::Plain
        };
        Self {
            name: Some(index.name.clone()),
            table: index.table.clone(),
            kind,
            columns: index.columns.clone(),
            null_filtered: index.null_filtered,
            storing: index.storing.clone(),
            interleave_in: index.interleave_in.clone(),
        }
    }
}

/// `DROP INDEX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropIndex {
    /// Dropped index.
    pub name: String,
    /// Owning table, when the source dialect names it.
    #[serde(default)]
    pub table: Option<String>,
}

/// One `old TO new` pair of a `RENAME TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRename {
    /// Current name.
    pub from: String,
    /// New name.
    pub to: String,
}

/// `RENAME TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameTable {
    /// Renames in order.
    pub renames: Vec<TableRename>,
}

/// `DROP TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTable {
    /// Dropped tables.
    pub tables: Vec<String>,
    /// `IF EXISTS`.
    #[serde(default)]
    pub if_exists: bool,
}

/// A DDL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum Statement {
    /// `CREATE TABLE`.
    CreateTable(CreateTable),
    /// `ALTER TABLE`.
    AlterTable(AlterTable),
    /// `CREATE INDEX`.
    CreateIndex(CreateIndex),
    /// `DROP INDEX`.
    DropIndex(DropIndex),
    /// `RENAME TABLE`.
    RenameTable(RenameTable),
    /// `DROP TABLE`.
    DropTable(DropTable),
}

impl Statement {
    /// Single-table `DROP TABLE`.
    #[must_use]
    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable(DropTable {
            tables: vec![name.into()],
            if_exists: false,
        })
    }

    /// `ALTER TABLE` with one action.
    #[must_use]
    pub fn alter(table: impl Into<String>, action: AlterAction) -> Self {
        Self::AlterTable(AlterTable {
            table: table.into(),
            actions: vec![action],
        })
    }

    /// Statements that recreate `table`: the table itself, then one
    /// `CREATE INDEX` per index.
    #[must_use]
    pub fn for_table(table: &TableSchema) -> Vec<Self> {
        let mut create = CreateTable::new(table.name.clone());
        for column in &table.columns {
            create = create.column(ColumnDefinition::from_column(column));
        }
        let key: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
        create = create.primary_key(&key);
        if let Some(interleave) = &table.interleave {
            create = create.option(TableOption::InterleaveInParent {
                parent: interleave.parent.clone(),
                on_delete_cascade: interleave.on_delete_cascade,
            });
        }

        let mut statements = vec![Self::CreateTable(create)];
        statements.extend(
            table
                .indices
                .iter()
                .map(|index| Self::CreateIndex(CreateIndex::from_index(index))),
        );
        statements
    }

    /// Tables this statement creates, alters, renames or drops.
    #[must_use]
    pub fn touched_tables(&self) -> Vec<&str> {
        match self {
            Self::CreateTable(create) => vec![create.table.as_str()],
            Self::AlterTable(alter) => vec![alter.table.as_str()],
            Self::CreateIndex(index) => vec![index.table.as_str()],
            Self::DropIndex(drop) => drop.table.as_deref().into_iter().collect(),
            Self::RenameTable(rename) => rename
                .renames
                .iter()
                .flat_map(|r| [r.from.as_str(), r.to.as_str()])
                .collect(),
            Self::DropTable(drop) => drop.tables.iter().map(String::as_str).collect(),
        }
    }
}
