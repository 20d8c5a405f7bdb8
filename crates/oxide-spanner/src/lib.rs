//! Cloud Spanner DDL support for generic relational schemas.
//!
//! `oxide-spanner` translates the DDL of a generic relational model into
//! Spanner's dialect and back:
//!
//! - **Transform** - Rewrites `CREATE/ALTER/DROP TABLE`, `CREATE/DROP INDEX`
//!   and `RENAME TABLE` statements into Spanner DDL, extracting what Spanner
//!   cannot store (generation strategies, defaults) as extended-schema facts
//! - **Parser** - Rebuilds tables from the DDL dump Spanner returns
//! - **Extended schema** - The side-table model holding those facts, and the
//!   code that attaches them to parsed tables
//! - **Surrogate** - Client-side key generation for `increment` and `uuid`
//!   columns
//!
//! Everything here is synchronous and free of I/O; the
//! `oxide-spanner-sync` crate drives it against a database.
//!
//! # Example
//!
//! ```rust
//! use oxide_spanner::prelude::*;
//!
//! let statement = Statement::alter(
//!     "t",
//!     AlterAction::AddColumn(ColumnDefinition::new("age", DataType::new("int"))),
//! );
//! let mut delta = ExtendedSchemaDelta::new();
//! let sql = transform(&statement, &mut delta).unwrap();
//!
//! assert_eq!(sql, vec!["ALTER TABLE t ADD COLUMN age int64"]);
//! assert!(delta.is_empty());
//! ```

pub mod ast;
pub mod error;
pub mod extended;
pub mod normalize;
pub mod parser;
pub mod schema;
pub mod surrogate;
pub mod transform;

pub use error::{DdlError, Result};
pub use parser::SchemaTextParser;
pub use transform::{transform, transform_all};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::ast::{
        AlterAction, AlterTable, CheckDefinition, ColumnDefinition, CreateDefinition,
        CreateIndex, CreateTable, DataType, DefaultExpr, DropIndex, DropTable,
        ForeignKeyDefinition, IndexDefinition, IndexKind, KeyDefinition, RenameTable, Statement,
        TableOption, TableRename,
    };
    pub use crate::error::{DdlError, Result};
    pub use crate::extended::{
        facts_for_column, DeltaOp, ExtendedSchemaDelta, ExtendedSchemaEntry, ExtendedSchemaMap,
        PropertyType,
    };
    pub use crate::normalize::COMMIT_TIMESTAMP_SENTINEL;
    pub use crate::parser::{parse_column_definition, SchemaTextParser};
    pub use crate::schema::{
        ColumnDefault, ColumnLength, ColumnSchema, ColumnType, ForeignKeySchema,
        GenerationStrategy, IndexColumn, IndexSchema, Interleave, SortOrder, TableSchema,
        UniqueConstraint,
    };
    pub use crate::surrogate::SurrogateGenerator;
    pub use crate::transform::{transform, transform_all};
}
