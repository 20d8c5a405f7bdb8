//! Error types for DDL transformation, schema-text parsing and surrogate
//! generation.

/// Errors raised by the Spanner DDL core.
#[derive(Debug, thiserror::Error)]
pub enum DdlError {
    /// The statement uses a construct Spanner cannot express.
    #[error("Unsupported construct '{construct}': {detail}")]
    UnsupportedConstruct {
        /// Short name of the construct (e.g. "foreign key").
        construct: String,
        /// Where and why it was rejected.
        detail: String,
    },

    /// A schema dump statement matched no known shape, or matched one
    /// only partially.
    #[error("Malformed schema text ({reason}): {fragment}")]
    MalformedSchemaText {
        /// The offending statement fragment.
        fragment: String,
        /// What the parser expected.
        reason: String,
    },

    /// A fact or index refers to a table or column that does not exist
    /// in the structural model.
    #[error("Dangling reference to {}: {context}", target(.table, .column.as_deref()))]
    DanglingReference {
        /// Referenced table.
        table: String,
        /// Referenced column, when the reference is column-level.
        column: Option<String>,
        /// Which object holds the reference.
        context: String,
    },

    /// The surrogate value source is unavailable.
    #[error("Surrogate value generation failed: {0}")]
    GenerationFailure(String),
}

fn target(table: &str, column: Option<&str>) -> String {
    match column {
        Some(column) => format!("column '{table}.{column}'"),
        None => format!("table '{table}'"),
    }
}

impl DdlError {
    #[must_use]
    pub(crate) fn unsupported(construct: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            construct: construct.into(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub(crate) fn malformed(fragment: impl AsRef<str>, reason: impl Into<String>) -> Self {
        Self::MalformedSchemaText {
            fragment: excerpt(fragment.as_ref()),
            reason: reason.into(),
        }
    }

    /// Builds a [`DdlError::DanglingReference`].
    #[must_use]
    pub fn dangling(
        table: impl Into<String>,
        column: Option<&str>,
        context: impl Into<String>,
    ) -> Self {
        Self::DanglingReference {
            table: table.into(),
            column: column.map(str::to_string),
            context: context.into(),
        }
    }

    /// Returns true for [`DdlError::DanglingReference`].
    #[must_use]
    pub const fn is_dangling_reference(&self) -> bool {
        matches!(self, Self::DanglingReference { .. })
    }
}

/// Keeps error messages readable for very long dump statements.
fn excerpt(text: &str) -> String {
    const MAX: usize = 160;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX).collect();
    format!("{head}...")
}

/// Result type for DDL core operations.
pub type Result<T> = std::result::Result<T, DdlError>;
