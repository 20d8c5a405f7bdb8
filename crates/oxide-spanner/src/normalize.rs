//! Type and naming normalization.
//!
//! Maps the generic model's type names, lengths, index names and default
//! expressions onto Spanner tokens. Everything here is a pure function.

use sha2::{Digest, Sha256};

use crate::ast::DataType;
use crate::error::{DdlError, Result};
use crate::schema::{ColumnDefault, ColumnLength, ColumnType};

/// Token stored for defaults resolved to the row's commit timestamp.
pub const COMMIT_TIMESTAMP_SENTINEL: &str = "PENDING_COMMIT_TIMESTAMP()";

/// Longest identifier Spanner accepts.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Default `string` length.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

const RESERVED: &[&str] = &[
    "ALL", "AND", "ANY", "ARRAY", "AS", "ASC", "ASSERT_ROWS_MODIFIED", "AT", "BETWEEN", "BY",
    "CASE", "CAST", "COLLATE", "CONTAINS", "CREATE", "CROSS", "CUBE", "CURRENT", "DEFAULT",
    "DEFINE", "DESC", "DISTINCT", "ELSE", "END", "ENUM", "ESCAPE", "EXCEPT", "EXCLUDE", "EXISTS",
    "EXTRACT", "FALSE", "FETCH", "FOLLOWING", "FOR", "FROM", "FULL", "GROUP", "GROUPING",
    "GROUPS", "HASH", "HAVING", "IF", "IGNORE", "IN", "INNER", "INTERSECT", "INTERVAL", "INTO",
    "IS", "JOIN", "LATERAL", "LEFT", "LIKE", "LIMIT", "LOOKUP", "MERGE", "NATURAL", "NEW", "NO",
    "NOT", "NULL", "NULLS", "OF", "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "PRECEDING",
    "PROTO", "RANGE", "RECURSIVE", "RESPECT", "RIGHT", "ROLLUP", "ROWS", "SELECT", "SET", "SOME",
    "STRUCT", "TABLESAMPLE", "THEN", "TO", "TREAT", "TRUE", "UNBOUNDED", "UNION", "UNNEST",
    "USING", "WHEN", "WHERE", "WINDOW", "WITH", "WITHIN",
];

/// Resolves a generic type to a Spanner type and its effective length.
///
/// Text and blob families imply `MAX`; `uuid` implies 36 characters. An
/// explicit length always wins for sized types and is dropped otherwise.
///
/// # Errors
///
/// [`DdlError::UnsupportedConstruct`] for a type Spanner has no
/// counterpart for.
pub fn column_type(data_type: &DataType) -> Result<(ColumnType, Option<ColumnLength>)> {
    let name = data_type.name.trim().to_ascii_lowercase();
    let (column_type, implied) = match name.as_str() {
        "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "int64" => {
            (ColumnType::Int64, None)
        }
        "float" | "double" | "double precision" | "real" | "decimal" | "numeric" | "float64" => {
            (ColumnType::Float64, None)
        }
        "char" | "varchar" | "nvarchar" | "character varying" | "string" | "enum" => {
            (ColumnType::String, None)
        }
        "uuid" => (ColumnType::String, Some(ColumnLength::Size(36))),
        "text" | "tinytext" | "mediumtext" | "longtext" | "json" | "simple-json" => {
            (ColumnType::String, Some(ColumnLength::Max))
        }
        "binary" | "varbinary" | "bytes" => (ColumnType::Bytes, None),
        "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            (ColumnType::Bytes, Some(ColumnLength::Max))
        }
        "bool" | "boolean" => (ColumnType::Bool, None),
        "date" => (ColumnType::Date, None),
        "datetime" | "timestamp" => (ColumnType::Timestamp, None),
        _ => {
            return Err(DdlError::unsupported(
                "column type",
                format!("'{}' has no Spanner equivalent", data_type.name),
            ))
        }
    };

    if !column_type.is_sized() {
        return Ok((column_type, None));
    }
    let length = data_type.length.or(implied);
    Ok((column_type, effective_length(column_type, length)))
}

/// Length Spanner assumes when none is given.
#[must_use]
pub const fn default_length(column_type: ColumnType) -> Option<ColumnLength> {
    match column_type {
        ColumnType::String => Some(ColumnLength::Size(DEFAULT_STRING_LENGTH)),
        ColumnType::Bytes => Some(ColumnLength::Max),
        _ => None,
    }
}

/// The length to render: the given one, else the dialect default.
#[must_use]
pub fn effective_length(
    column_type: ColumnType,
    length: Option<ColumnLength>,
) -> Option<ColumnLength> {
    if column_type.is_sized() {
        length.or_else(|| default_length(column_type))
    } else {
        None
    }
}

/// The length to store: `None` when it equals the dialect default, so that
/// dumps and declarations compare equal.
#[must_use]
pub fn normalize_length(
    column_type: ColumnType,
    length: Option<ColumnLength>,
) -> Option<ColumnLength> {
    if !column_type.is_sized() || length == default_length(column_type) {
        None
    } else {
        length
    }
}

/// Renders a column type, e.g. `string(50)` or `array<int64>`.
#[must_use]
pub fn type_sql(column_type: ColumnType, length: Option<ColumnLength>, array: bool) -> String {
    let base = match effective_length(column_type, length) {
        Some(length) => format!("{column_type}({length})"),
        None => column_type.to_string(),
    };
    if array {
        format!("array<{base}>")
    } else {
        base
    }
}

/// Deterministic name for an unnamed index.
#[must_use]
pub fn index_name<S: AsRef<str>>(table: &str, columns: &[S], unique: bool) -> String {
    let prefix = if unique { "uq" } else { "idx" };
    let joined: Vec<&str> = columns.iter().map(AsRef::as_ref).collect();
    let name = format!("{prefix}_{table}_{}", joined.join("_"));
    if name.len() <= MAX_IDENTIFIER_LENGTH {
        return name;
    }

    let digest = Sha256::digest(name.as_bytes());
    let hash: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    let mut head = format!("{prefix}_{table}");
    let room = MAX_IDENTIFIER_LENGTH - hash.len() - 1;
    if head.len() > room {
        let end = head
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|&end| end <= room)
            .last()
            .unwrap_or(0);
        head.truncate(end);
    }
    format!("{head}_{hash}")
}

/// Whether `name` can be written without backticks.
#[must_use]
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_ok
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name.to_ascii_uppercase().as_str())
}

/// Quotes an identifier with backticks when needed.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "\\`"))
    }
}

/// Strips backticks from a dumped identifier.
#[must_use]
pub fn unquote_identifier(name: &str) -> String {
    let name = name.trim();
    name.strip_prefix('`')
        .and_then(|n| n.strip_suffix('`'))
        .map_or_else(|| name.to_string(), |n| n.replace("\\`", "`"))
}

/// English singular of a table name, used to name interleave foreign keys.
#[must_use]
pub fn singularize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with("ies") && name.len() > 3 {
        return format!("{}y", &name[..name.len() - 3]);
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if lower.ends_with(suffix) {
            return name[..name.len() - 2].to_string();
        }
    }
    if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        return name.to_string();
    }
    match name.strip_suffix('s').or_else(|| name.strip_suffix('S')) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Normalizes a default expression; every spelling of "now" becomes
/// [`ColumnDefault::CommitTimestamp`].
#[must_use]
pub fn normalize_default(expression: &str) -> ColumnDefault {
    let trimmed = expression.trim();
    let upper = trimmed.to_ascii_uppercase();
    let head = upper
        .split(" ON UPDATE ")
        .next()
        .unwrap_or_default()
        .trim();
    let commit = matches!(
        head,
        "CURRENT_TIMESTAMP"
            | "CURRENT_TIMESTAMP()"
            | "NOW()"
            | "PENDING_COMMIT_TIMESTAMP()"
            | "SPANNER.COMMIT_TIMESTAMP()"
    ) || head.starts_with("CURRENT_TIMESTAMP(");
    if commit {
        ColumnDefault::CommitTimestamp
    } else {
        ColumnDefault::Expression(trimmed.to_string())
    }
}

/// Text stored in a `default` fact.
#[must_use]
pub fn default_fact_value(default: &ColumnDefault) -> String {
    match default {
        ColumnDefault::CommitTimestamp => COMMIT_TIMESTAMP_SENTINEL.to_string(),
        ColumnDefault::Expression(expression) => expression.clone(),
    }
}
