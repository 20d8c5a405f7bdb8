//! Entity metadata as seen by the reconciler.
//!
//! The ORM layer describes each mapped table by its columns' generation
//! strategy, default expression and create/update-date markers. Only those
//! properties end up in the extended schema.

use oxide_spanner::extended::{facts_for_column, ExtendedSchemaEntry};
use oxide_spanner::normalize::normalize_default;
use oxide_spanner::schema::{ColumnDefault, GenerationStrategy};
use serde::{Deserialize, Serialize};

/// Metadata of one entity column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Value generation strategy.
    #[serde(default)]
    pub generation: Option<GenerationStrategy>,
    /// Default expression as written on the entity.
    #[serde(default)]
    pub default: Option<String>,
    /// Set to the commit timestamp when the row is created.
    #[serde(default)]
    pub create_date: bool,
    /// Set to the commit timestamp whenever the row is written.
    #[serde(default)]
    pub update_date: bool,
}

impl ColumnMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generation: None,
            default: None,
            create_date: false,
            update_date: false,
        }
    }

    #[must_use]
    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generation = Some(strategy);
        self
    }

    #[must_use]
    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    #[must_use]
    pub fn create_date(mut self) -> Self {
        self.create_date = true;
        self
    }

    #[must_use]
    pub fn update_date(mut self) -> Self {
        self.update_date = true;
        self
    }

    /// The default this column should carry in the extended schema.
    ///
    /// Create and update date columns always want the commit timestamp.
    #[must_use]
    pub fn desired_default(&self) -> Option<ColumnDefault> {
        if self.create_date || self.update_date {
            return Some(ColumnDefault::CommitTimestamp);
        }
        self.default.as_deref().map(normalize_default)
    }
}

/// Metadata of one mapped table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Table name.
    pub table_name: String,
    /// Mapped columns.
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

impl EntityMetadata {
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    /// Every fact this entity wants stored, column by column.
    #[must_use]
    pub fn desired_facts(&self) -> Vec<ExtendedSchemaEntry> {
        self.columns
            .iter()
            .flat_map(|column| {
                let default = column.desired_default();
                facts_for_column(
                    &self.table_name,
                    &column.name,
                    column.generation.as_ref(),
                    default.as_ref(),
                )
            })
            .collect()
    }
}
