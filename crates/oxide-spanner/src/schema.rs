//! Schema representation types.
//!
//! These types describe tables the way Spanner stores them: the structural
//! part comes from the database's own DDL dump, the generation and default
//! facts Spanner cannot store come from the extended-schema side table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DdlError, Result};

/// Spanner column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit signed integer.
    Int64,
    /// Binary data.
    Bytes,
    /// Boolean.
    Bool,
    /// Calendar date.
    Date,
    /// Double precision float.
    Float64,
    /// Unicode string.
    String,
    /// Timestamp with nanosecond precision.
    Timestamp,
}

impl ColumnType {
    /// Returns the dialect token for this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Bytes => "bytes",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Timestamp => "timestamp",
        }
    }

    /// Resolves a dialect token (case-insensitive).
    #[must_use]
    pub fn from_dialect_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int64" => Some(Self::Int64),
            "bytes" => Some(Self::Bytes),
            "bool" => Some(Self::Bool),
            "date" => Some(Self::Date),
            "float64" => Some(Self::Float64),
            "string" => Some(Self::String),
            "timestamp" => Some(Self::Timestamp),
            _ => None,
        }
    }

    /// Whether the type takes a `(length)` parameter.
    #[must_use]
    pub const fn is_sized(&self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Length parameter of a `string` or `bytes` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnLength {
    /// `MAX`.
    Max,
    /// An explicit size.
    Size(u32),
}

impl ColumnLength {
    /// Parses `MAX` (any case) or a positive integer.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("max") {
            return Some(Self::Max);
        }
        text.parse::<u32>().ok().filter(|n| *n > 0).map(Self::Size)
    }
}

impl fmt::Display for ColumnLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("MAX"),
            Self::Size(n) => write!(f, "{n}"),
        }
    }
}

/// How values of a column are generated when the caller supplies none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    /// Surrogate integer (Spanner has no sequences, so values are random).
    Increment,
    /// Random v4 UUID.
    Uuid,
    /// A named generator owned by the application.
    Custom(String),
}

impl GenerationStrategy {
    /// Value stored in the `generatorStrategy` fact.
    #[must_use]
    pub const fn strategy_name(&self) -> &'static str {
        match self {
            Self::Increment => "increment",
            Self::Uuid => "uuid",
            Self::Custom(_) => "custom",
        }
    }

    /// Rebuilds a strategy from the stored `generatorStrategy` value and the
    /// optional `generator` value.
    #[must_use]
    pub fn from_facts(strategy: &str, generator: Option<&str>) -> Option<Self> {
        match strategy {
            "increment" => Some(Self::Increment),
            "uuid" => Some(Self::Uuid),
            "custom" => generator.map(|name| Self::Custom(name.to_string())),
            _ => None,
        }
    }
}

/// Default value of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// A default expression applied client-side.
    Expression(String),
    /// The row's commit timestamp.
    CommitTimestamp,
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Element type (for arrays, the type of each element).
    pub column_type: ColumnType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Length for `string`/`bytes`, `None` when it is the dialect default.
    pub length: Option<ColumnLength>,
    /// Whether this is an `array<...>` column.
    pub is_array: bool,
    /// Mirrors membership in [`TableSchema::primary_key`].
    pub is_primary: bool,
    /// Whether a unique index covers this column.
    pub is_unique: bool,
    /// Default value.
    pub default: Option<ColumnDefault>,
    /// Generation strategy.
    pub generation: Option<GenerationStrategy>,
}

impl ColumnSchema {
    /// Creates a new nullable, non-array column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            length: None,
            is_array: false,
            is_primary: false,
            is_unique: false,
            default: None,
            generation: None,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the length.
    #[must_use]
    pub fn length(mut self, length: ColumnLength) -> Self {
        self.length = Some(length);
        self
    }

    /// Turns the column into an array of its type.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets the generation strategy.
    #[must_use]
    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generation = Some(strategy);
        self
    }

    /// Reports whether `other` describes a different column.
    ///
    /// Columns generated as UUIDs get their values client-side whatever the
    /// stored metadata says, so their generation flag is not compared.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        let structural = self.name != other.name
            || self.column_type != other.column_type
            || self.nullable != other.nullable
            || self.length != other.length
            || self.is_array != other.is_array
            || self.is_primary != other.is_primary
            || self.is_unique != other.is_unique
            || self.default != other.default;
        if structural {
            return true;
        }
        let uuid = matches!(self.generation, Some(GenerationStrategy::Uuid))
            || matches!(other.generation, Some(GenerationStrategy::Uuid));
        !uuid && self.generation != other.generation
    }
}

/// Sort direction of an index key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Returns the SQL representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One key part of an index or primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexColumn {
    /// Column name.
    pub name: String,
    /// Sort direction.
    #[serde(default)]
    pub order: SortOrder,
}

impl IndexColumn {
    /// Ascending key part.
    #[must_use]
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending key part.
    #[must_use]
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Key parts in order.
    pub columns: Vec<IndexColumn>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Whether rows with NULL keys are left out (`NULL_FILTERED`).
    pub null_filtered: bool,
    /// Columns stored alongside the keys.
    pub storing: Vec<String>,
    /// Table the index is interleaved in.
    pub interleave_in: Option<String>,
}

impl IndexSchema {
    /// Creates a plain ascending index.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| IndexColumn::asc(*c)).collect(),
            unique: false,
            null_filtered: false,
            storing: Vec::new(),
            interleave_in: None,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index `NULL_FILTERED`.
    #[must_use]
    pub fn null_filtered(mut self) -> Self {
        self.null_filtered = true;
        self
    }

    /// Names of the key columns in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Foreign-key analogue synthesized from an interleave relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    /// Constraint name.
    pub name: String,
    /// Column(s) in the child table.
    pub columns: Vec<String>,
    /// Parent table.
    pub referenced_table: String,
    /// Referenced column(s); not recoverable from the dump, so empty.
    pub referenced_columns: Vec<String>,
    /// Whether parent deletion cascades.
    pub on_delete_cascade: bool,
}

/// Schema definition for a unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name (the backing index name).
    pub name: String,
    /// Columns that form the unique constraint.
    pub columns: Vec<String>,
}

/// Parent/child co-location of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interleave {
    /// Parent table.
    pub parent: String,
    /// `ON DELETE CASCADE` when true, `ON DELETE NO ACTION` otherwise.
    pub on_delete_cascade: bool,
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Column definitions in declaration order.
    pub columns: Vec<ColumnSchema>,
    /// Primary key column(s) in key order.
    pub primary_key: Vec<String>,
    /// Index definitions.
    pub indices: Vec<IndexSchema>,
    /// Foreign keys synthesized from interleaving.
    pub foreign_keys: Vec<ForeignKeySchema>,
    /// Unique constraint definitions.
    pub uniques: Vec<UniqueConstraint>,
    /// Interleave parent, if any.
    pub interleave: Option<Interleave>,
}

impl TableSchema {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
            interleave: None,
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self.sync_primary_flags();
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self.sync_primary_flags();
        self
    }

    /// Adds an index. Unique indices mark the columns they cover.
    #[must_use]
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.register_index(index);
        self
    }

    /// Adds an index after checking that every column it names exists.
    ///
    /// # Errors
    ///
    /// [`DdlError::DanglingReference`] when the index names a column the table
    /// does not have.
    pub fn add_index(&mut self, index: IndexSchema) -> Result<()> {
        let referenced = index
            .column_names()
            .chain(index.storing.iter().map(String::as_str));
        for column in referenced {
            if !self.has_column(column) {
                let kind = if index.unique { "unique index" } else { "index" };
                return Err(DdlError::dangling(
                    &self.name,
                    Some(column),
                    format!("{kind} {}", index.name),
                ));
            }
        }
        self.register_index(index);
        Ok(())
    }

    fn register_index(&mut self, index: IndexSchema) {
        if index.unique {
            for column in &mut self.columns {
                if index.columns.iter().any(|c| c.name == column.name) {
                    column.is_unique = true;
                }
            }
            self.uniques.push(UniqueConstraint {
                name: index.name.clone(),
                columns: index.column_names().map(str::to_string).collect(),
            });
        }
        self.indices.push(index);
    }

    /// Interleaves the table in `parent`.
    #[must_use]
    pub fn interleave_in(mut self, parent: impl Into<String>, on_delete_cascade: bool) -> Self {
        self.interleave = Some(Interleave {
            parent: parent.into(),
            on_delete_cascade,
        });
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Gets a mutable column by name.
    #[must_use]
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut ColumnSchema> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Whether the table has a column named `name`.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Whether `name` is part of the primary key.
    #[must_use]
    pub fn is_primary(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indices.iter().find(|i| i.name == name)
    }

    /// Re-derives every column's `is_primary` flag from
    /// [`TableSchema::primary_key`].
    pub fn sync_primary_flags(&mut self) {
        let primary_key = &self.primary_key;
        for column in &mut self.columns {
            column.is_primary = primary_key.iter().any(|pk| *pk == column.name);
        }
    }

    /// Reports whether any column, the key, or the index set differs.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.primary_key != other.primary_key
            || self.columns.len() != other.columns.len()
            || self.interleave != other.interleave
        {
            return true;
        }
        let columns_differ = self
            .columns
            .iter()
            .zip(&other.columns)
            .any(|(a, b)| a.differs_from(b));
        if columns_differ {
            return true;
        }
        let mut ours: Vec<&IndexSchema> = self.indices.iter().collect();
        let mut theirs: Vec<&IndexSchema> = other.indices.iter().collect();
        ours.sort_by(|a, b| a.name.cmp(&b.name));
        theirs.sort_by(|a, b| a.name.cmp(&b.name));
        ours != theirs
    }
}
