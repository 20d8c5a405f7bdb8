//! Schema-text parser.
//!
//! Rebuilds [`TableSchema`] values from the DDL Spanner returns for a
//! database. The dump is untrusted text: every statement must match one of
//! the known shapes completely, anything else is a
//! [`DdlError::MalformedSchemaText`].
//!
//! Each shape has its own matcher returning a typed result. Statements are
//! classified first, then every table is built before any index is applied.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{DdlError, Result};
use crate::normalize::{normalize_default, normalize_length, singularize, unquote_identifier};
use crate::schema::{
    ColumnDefault, ColumnLength, ColumnSchema, ColumnType, ForeignKeySchema, IndexColumn,
    IndexSchema, Interleave, SortOrder, TableSchema,
};

static CREATE_TABLE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)\s*\(")
        .expect("valid create table regex")
});

static INDEX_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:CREATE\s+)?(?:UNIQUE\s+)?(?:NULL_FILTERED\s+)?INDEX\b")
        .expect("valid index head regex")
});

static INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*(?:CREATE\s+)?(?P<unique>UNIQUE\s+)?(?P<null_filtered>NULL_FILTERED\s+)?INDEX\s+(?P<name>`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)\s+ON\s+(?P<table>`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)\s*\((?P<columns>[^)]*)\)(?:\s*STORING\s*\((?P<storing>[^)]*)\))?(?:\s*,\s*INTERLEAVE\s+IN\s+(?P<parent>`[^`]+`|[A-Za-z_][A-Za-z0-9_]*))?\s*$",
    )
    .expect("valid index regex")
});

static PRIMARY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*PRIMARY\s+KEY\s*\((?P<columns>[^)]*)\)(?:\s*,\s*INTERLEAVE\s+IN\s+PARENT\s+(?P<parent>`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)(?:\s+ON\s+DELETE\s+(?P<action>CASCADE|NO\s+ACTION))?)?\s*$",
    )
    .expect("valid primary key regex")
});

static KEY_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)(?:\s+(ASC|DESC))?\s*$")
        .expect("valid key part regex")
});

static COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*(?P<name>`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)\s+(?P<type>ARRAY\s*<[^>]*>|[A-Za-z0-9_]+(?:\s*\([^)]*\))?)(?P<rest>.*)$",
    )
    .expect("valid column regex")
});

static COLUMN_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z0-9_]+)\s*(?:\(\s*([0-9]+|MAX)\s*\))?\s*$")
        .expect("valid column type regex")
});

static ARRAY_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*ARRAY\s*<(.*)>\s*$").expect("valid array type regex")
});

static NOT_NULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^NOT\s+NULL\b").expect("valid not null regex"));

static COMMIT_TIMESTAMP_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^OPTIONS\s*\(\s*allow_commit_timestamp\s*=\s*(true|false|null)\s*\)")
        .expect("valid options regex")
});

static DEFAULT_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^DEFAULT\s*\(").expect("valid default regex"));

static CONSTRAINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:CONSTRAINT\s+\S+\s+)?FOREIGN\s+KEY\b").expect("valid constraint regex")
});

static PRIMARY_KEY_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*PRIMARY\s+KEY\b").expect("valid primary key head regex"));

/// A `CREATE TABLE` statement cut into its parts.
#[derive(Debug)]
struct CreateTableMatch<'a> {
    name: String,
    /// Top-level elements of the parenthesized body.
    elements: Vec<&'a str>,
    /// Text after the body: key and interleave clauses.
    trailer: &'a str,
}

/// A `CREATE INDEX` statement.
#[derive(Debug)]
struct IndexMatch {
    name: String,
    table: String,
    unique: bool,
    null_filtered: bool,
    columns: Vec<IndexColumn>,
    storing: Vec<String>,
    interleave_in: Option<String>,
}

/// A `PRIMARY KEY (...)` clause with its optional interleave suffix.
#[derive(Debug, Default)]
struct PrimaryKeyMatch {
    columns: Vec<String>,
    interleave: Option<Interleave>,
}

/// A column type string such as `STRING(50)` or `ARRAY<INT64>`.
#[derive(Debug, PartialEq, Eq)]
struct ColumnTypeMatch {
    column_type: ColumnType,
    length: Option<ColumnLength>,
    array: bool,
}

/// Parser for Spanner schema dumps.
#[derive(Debug, Clone, Default)]
pub struct SchemaTextParser;

impl SchemaTextParser {
    /// Creates a parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parses one DDL string per table or index into tables keyed by name.
    ///
    /// # Errors
    ///
    /// [`DdlError::MalformedSchemaText`] for a statement that does not parse,
    /// and [`DdlError::DanglingReference`] for an index, key or interleave naming
    /// an unknown table or column.
    pub fn parse<S: AsRef<str>>(&self, statements: &[S]) -> Result<BTreeMap<String, TableSchema>> {
        let mut creates = Vec::new();
        let mut indices = Vec::new();
        for statement in statements {
            let statement = statement.as_ref();
            if statement.trim().is_empty() {
                continue;
            }
            if CREATE_TABLE_HEAD.is_match(statement) {
                creates.push(match_create_table(statement)?);
            } else if INDEX_HEAD.is_match(statement) {
                indices.push(match_index(statement)?);
            } else {
                return Err(DdlError::malformed(statement, "no known statement shape"));
            }
        }

        let mut tables = BTreeMap::new();
        for create in creates {
            let table = build_table(create)?;
            if tables.contains_key(&table.name) {
                return Err(DdlError::malformed(&table.name, "table defined twice"));
            }
            tables.insert(table.name.clone(), table);
        }

        let index_count = indices.len();
        for index in indices {
            let Some(table) = tables.get_mut(&index.table) else {
                return Err(DdlError::dangling(
                    &index.table,
                    None,
                    format!("index {}", index.name),
                ));
            };
            let mut schema = IndexSchema::new(index.name, index.table, &[]);
            schema.columns = index.columns;
            schema.unique = index.unique;
            schema.null_filtered = index.null_filtered;
            schema.storing = index.storing;
            schema.interleave_in = index.interleave_in;
            table.add_index(schema)?;
        }

        debug!(tables = tables.len(), indices = index_count, "Parsed schema dump");
        Ok(tables)
    }

    /// Parses a `;`-separated dump.
    ///
    /// # Errors
    ///
    /// Same as [`SchemaTextParser::parse`].
    pub fn parse_dump(&self, dump: &str) -> Result<BTreeMap<String, TableSchema>> {
        self.parse(&split_statements(dump))
    }
}

/// Parses one column definition such as `name STRING(50) NOT NULL`.
///
/// # Errors
///
/// [`DdlError::MalformedSchemaText`] when `text` is not a column definition.
pub fn parse_column_definition(text: &str) -> Result<ColumnSchema> {
    let captures = COLUMN
        .captures(text)
        .ok_or_else(|| DdlError::malformed(text, "expected a column definition"))?;
    let name = unquote_identifier(&captures["name"]);
    let column_type = match_column_type(&captures["type"]).map_err(|err| match err {
        DdlError::MalformedSchemaText { reason, .. } => DdlError::malformed(text, reason),
        other => other,
    })?;

    let mut column = ColumnSchema::new(name, column_type.column_type);
    column.length = column_type.length;
    column.is_array = column_type.array;

    let mut rest = captures["rest"].trim();
    while !rest.is_empty() {
        if let Some(found) = NOT_NULL.find(rest) {
            column.nullable = false;
            rest = rest[found.end()..].trim_start();
        } else if let Some(found) = COMMIT_TIMESTAMP_OPTION.captures(rest) {
            if found[1].eq_ignore_ascii_case("true") {
                column.default = Some(ColumnDefault::CommitTimestamp);
            }
            let end = found.get(0).map_or(rest.len(), |m| m.end());
            rest = rest[end..].trim_start();
        } else if let Some(found) = DEFAULT_HEAD.find(rest) {
            let open = found.end() - 1;
            let close = closing_paren(rest, open)
                .ok_or_else(|| DdlError::malformed(text, "unbalanced DEFAULT expression"))?;
            column.default = Some(normalize_default(&rest[open + 1..close]));
            rest = rest[close + 1..].trim_start();
        } else {
            return Err(DdlError::malformed(text, "unexpected column attribute"));
        }
    }
    Ok(column)
}

/// Splits a dump on `;` outside quotes, dropping `--` comment lines.
#[must_use]
pub fn split_statements(dump: &str) -> Vec<String> {
    let cleaned: String = dump
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quotes = QuoteState::default();
    for c in cleaned.chars() {
        if !quotes.consume(c) && c == ';' {
            if !current.trim().is_empty() {
                statements.push(current.trim().to_string());
            }
            current.clear();
            continue;
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

fn match_create_table(statement: &str) -> Result<CreateTableMatch<'_>> {
    let head = CREATE_TABLE_HEAD
        .captures(statement)
        .ok_or_else(|| DdlError::malformed(statement, "expected CREATE TABLE"))?;
    let name = unquote_identifier(&head[1]);
    let open = head.get(0).map_or(0, |m| m.end()) - 1;
    let close = closing_paren(statement, open)
        .ok_or_else(|| DdlError::malformed(statement, "unbalanced table body"))?;

    let elements = split_top_level(&statement[open + 1..close])
        .into_iter()
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .collect();
    Ok(CreateTableMatch {
        name,
        elements,
        trailer: statement[close + 1..].trim(),
    })
}

fn match_index(statement: &str) -> Result<IndexMatch> {
    let captures = INDEX
        .captures(statement)
        .ok_or_else(|| DdlError::malformed(statement, "incomplete INDEX statement"))?;
    let columns = split_top_level(&captures["columns"])
        .into_iter()
        .map(|part| match_key_part(part, statement))
        .collect::<Result<Vec<_>>>()?;
    let storing = match captures.name("storing") {
        Some(storing) => split_top_level(storing.as_str())
            .into_iter()
            .map(unquote_identifier)
            .filter(|c| !c.is_empty())
            .collect(),
        None => Vec::new(),
    };
    Ok(IndexMatch {
        name: unquote_identifier(&captures["name"]),
        table: unquote_identifier(&captures["table"]),
        unique: captures.name("unique").is_some(),
        null_filtered: captures.name("null_filtered").is_some(),
        columns,
        storing,
        interleave_in: captures.name("parent").map(|p| unquote_identifier(p.as_str())),
    })
}

fn match_primary_key_clause(clause: &str) -> Result<PrimaryKeyMatch> {
    let captures = PRIMARY_KEY
        .captures(clause)
        .ok_or_else(|| DdlError::malformed(clause, "expected PRIMARY KEY clause"))?;
    let columns_text = captures["columns"].trim();
    let columns = if columns_text.is_empty() {
        Vec::new()
    } else {
        split_top_level(columns_text)
            .into_iter()
            .map(|part| match_key_part(part, clause).map(|key| key.name))
            .collect::<Result<Vec<_>>>()?
    };
    let interleave = captures.name("parent").map(|parent| Interleave {
        parent: unquote_identifier(parent.as_str()),
        on_delete_cascade: captures
            .name("action")
            .is_some_and(|action| action.as_str().eq_ignore_ascii_case("cascade")),
    });
    Ok(PrimaryKeyMatch {
        columns,
        interleave,
    })
}

fn match_column_type(text: &str) -> Result<ColumnTypeMatch> {
    let (inner, array) = match ARRAY_TYPE.captures(text) {
        Some(captures) => (captures.get(1).map_or("", |m| m.as_str()), true),
        None => (text, false),
    };
    let captures = COLUMN_TYPE
        .captures(inner)
        .ok_or_else(|| DdlError::malformed(text, "expected a column type"))?;
    let column_type = ColumnType::from_dialect_name(&captures[1])
        .ok_or_else(|| DdlError::malformed(text, "unknown column type"))?;
    let length = match captures.get(2) {
        Some(length) => Some(
            ColumnLength::parse(length.as_str())
                .ok_or_else(|| DdlError::malformed(text, "invalid length"))?,
        ),
        None => None,
    };
    Ok(ColumnTypeMatch {
        column_type,
        length: normalize_length(column_type, length),
        array,
    })
}

fn match_key_part(part: &str, statement: &str) -> Result<IndexColumn> {
    let captures = KEY_PART
        .captures(part)
        .ok_or_else(|| DdlError::malformed(statement, "invalid key column"))?;
    let order = match captures.get(2) {
        Some(order) if order.as_str().eq_ignore_ascii_case("desc") => SortOrder::Desc,
        _ => SortOrder::Asc,
    };
    Ok(IndexColumn {
        name: unquote_identifier(&captures[1]),
        order,
    })
}

fn build_table(create: CreateTableMatch<'_>) -> Result<TableSchema> {
    let mut table = TableSchema::new(create.name);
    let mut body_key: Option<PrimaryKeyMatch> = None;

    for element in create.elements {
        if PRIMARY_KEY_HEAD.is_match(element) {
            if body_key.is_some() {
                return Err(DdlError::malformed(element, "second PRIMARY KEY clause"));
            }
            body_key = Some(match_primary_key_clause(element)?);
        } else if CONSTRAINT.is_match(element) {
            debug!(table = %table.name, "Skipping foreign key constraint");
        } else {
            let column = parse_column_definition(element)?;
            if table.has_column(&column.name) {
                return Err(DdlError::malformed(element, "duplicate column"));
            }
            table.columns.push(column);
        }
    }

    let trailer = if create.trailer.is_empty() {
        None
    } else {
        Some(match_primary_key_clause(create.trailer)?)
    };
    let key = match (body_key, trailer) {
        (Some(_), Some(_)) => {
            return Err(DdlError::malformed(create.trailer, "second PRIMARY KEY clause"));
        }
        (Some(key), None) | (None, Some(key)) => key,
        (None, None) => PrimaryKeyMatch::default(),
    };

    if let Some(missing) = key.columns.iter().find(|c| !table.has_column(c)) {
        return Err(DdlError::dangling(&table.name, Some(missing.as_str()), "primary key"));
    }
    table.primary_key = key.columns;
    table.sync_primary_flags();

    if let Some(interleave) = key.interleave {
        table.foreign_keys.push(ForeignKeySchema {
            name: format!("fk_{}_{}", table.name, interleave.parent),
            columns: vec![format!("{}_id", singularize(&interleave.parent))],
            referenced_table: interleave.parent.clone(),
            referenced_columns: Vec::new(),
            on_delete_cascade: interleave.on_delete_cascade,
        });
        table.interleave = Some(interleave);
    }
    Ok(table)
}

/// Tracks whether a scan is inside a quoted literal.
///
/// A backslash inside quotes escapes the next character, as in `'it\'s'`.
#[derive(Debug, Default)]
struct QuoteState {
    quote: Option<char>,
    escaped: bool,
}

impl QuoteState {
    /// Feeds `c`; returns whether it is part of a quoted literal, delimiters
    /// included.
    fn consume(&mut self, c: char) -> bool {
        match self.quote {
            Some(_) if self.escaped => self.escaped = false,
            Some(_) if c == '\\' => self.escaped = true,
            Some(q) if c == q => self.quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => self.quote = Some(c),
            None => return false,
        }
        true
    }
}

/// Byte index of the `)` closing the `(` at `open`, skipping quoted text.
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quotes = QuoteState::default();
    for (i, c) in text[open..].char_indices() {
        if quotes.consume(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas that are outside parentheses and quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quotes = QuoteState::default();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if quotes.consume(c) {
            continue;
        }
        match c {
            '(' | '<' => depth += 1,
            ')' | '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
