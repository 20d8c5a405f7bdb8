//! oxide-spanner CLI
//!
//! Command-line tool for Spanner DDL translation and offline schema
//! synchronization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_spanner::prelude::*;
use oxide_spanner_sync::prelude::*;

/// Cloud Spanner DDL translation and extended schema synchronization.
#[derive(Parser)]
#[command(name = "oxide-spanner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extended schema side table.
    #[arg(long, env = "OXIDE_SPANNER_SCHEMA_TABLE", default_value = DEFAULT_SCHEMA_TABLE)]
    schema_table: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a JSON DDL AST into Spanner DDL.
    Transform {
        /// JSON file holding one statement or an array of statements.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Parse a Spanner schema dump and print its tables as JSON.
    ParseSchema {
        /// Schema dump (`;`-separated DDL).
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Run a synchronization pass against an in-memory copy of a schema.
    Sync {
        /// Schema dump to start from.
        #[arg(short, long)]
        schema: PathBuf,

        /// JSON file with entity metadata.
        #[arg(short, long)]
        entities: PathBuf,

        /// JSON DDL AST to apply during the pass.
        #[arg(long)]
        ddl: Option<PathBuf>,

        /// Tolerate facts naming missing columns (first pass after a deploy).
        #[arg(long)]
        bootstrap: bool,

        /// Show DDL and fact changes without applying them.
        #[arg(long)]
        dry_run: bool,
    },
}

fn read_statements(path: &Path) -> anyhow::Result<Vec<Statement>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let statements = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(statements)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Transform { input } => {
            let statements = read_statements(&input)?;
            let mut delta = ExtendedSchemaDelta::new();
            let ddl = transform_all(&statements, &mut delta)?;
            for sql in &ddl {
                println!("{};", sql);
            }
            for op in delta.ops() {
                info!(op = %serde_json::to_string(op)?, "Extended schema change");
            }
        }

        Commands::ParseSchema { input } => {
            let dump = std::fs::read_to_string(&input)?;
            let tables = SchemaTextParser::new().parse_dump(&dump)?;
            info!(tables = tables.len(), "Parsed schema");
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }

        Commands::Sync {
            schema,
            entities,
            ddl,
            bootstrap,
            dry_run,
        } => {
            let dump = std::fs::read_to_string(&schema)?;
            let entities: Vec<EntityMetadata> =
                serde_json::from_str(&std::fs::read_to_string(&entities)?)?;
            let statements = match ddl {
                Some(path) => read_statements(&path)?,
                None => Vec::new(),
            };

            if dry_run {
                info!("Dry run mode - changes will be printed but not applied.");
            }

            let client = Arc::new(MemoryClient::from_dump(&dump)?);
            let options = SyncOptions::new()
                .schema_table(cli.schema_table)
                .dry_run(dry_run);
            let synchronizer = SchemaSynchronizer::new(Arc::clone(&client), options);
            let report = synchronizer
                .synchronize(&entities, &statements, bootstrap)
                .await?;

            for sql in &report.ddl {
                println!("{};", sql);
            }
            for fact in report.delta.additions.iter().chain(&report.extended.additions) {
                println!(
                    "+ {}.{} {} = {}",
                    fact.table, fact.column, fact.property, fact.value
                );
            }
            for fact in report.delta.removals.iter().chain(&report.extended.removals) {
                println!("- {}.{} {}", fact.table, fact.column, fact.property);
            }
            info!(
                tables = report.tables,
                ddl = report.ddl.len(),
                "Synchronization complete"
            );

            if !dry_run {
                println!();
                for sql in client.schema_ddl().await? {
                    println!("{};", sql);
                }
            }
        }
    }

    Ok(())
}
