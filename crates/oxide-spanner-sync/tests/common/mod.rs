#![allow(dead_code)]

use std::sync::Arc;

use oxide_spanner::prelude::*;
use oxide_spanner_sync::prelude::*;

/// Two tables, one interleaved in the other, as Spanner dumps them.
pub const DUMP: &str = "\
CREATE TABLE users (
  id INT64 NOT NULL,
  email STRING(100),
  created_at TIMESTAMP OPTIONS (allow_commit_timestamp=true),
) PRIMARY KEY (id);
CREATE UNIQUE INDEX uq_users_email ON users (email);
CREATE TABLE posts (
  user_id INT64 NOT NULL,
  id INT64 NOT NULL,
  title STRING(MAX),
  updated_at TIMESTAMP,
) PRIMARY KEY (user_id, id),
  INTERLEAVE IN PARENT users ON DELETE CASCADE;
";

pub fn client() -> Arc<MemoryClient> {
    Arc::new(MemoryClient::from_dump(DUMP).unwrap())
}

pub fn synchronizer(client: &Arc<MemoryClient>) -> SchemaSynchronizer<MemoryClient> {
    SchemaSynchronizer::new(Arc::clone(client), SyncOptions::new())
}

pub fn users_entity() -> EntityMetadata {
    EntityMetadata::new("users")
        .column(ColumnMetadata::new("id").generated(GenerationStrategy::Increment))
        .column(ColumnMetadata::new("email"))
        .column(ColumnMetadata::new("created_at").create_date())
}

pub fn posts_entity() -> EntityMetadata {
    EntityMetadata::new("posts")
        .column(ColumnMetadata::new("id").generated(GenerationStrategy::Increment))
        .column(ColumnMetadata::new("title").default("'untitled'"))
        .column(ColumnMetadata::new("updated_at").update_date())
}

pub fn entities() -> Vec<EntityMetadata> {
    vec![users_entity(), posts_entity()]
}

/// Side-table rows as `(table, column, type, value)`.
pub async fn side_rows(client: &MemoryClient) -> Vec<(String, String, String, String)> {
    let text = |row: &Row, key: &str| row[key].as_str().unwrap_or_default().to_string();
    client
        .rows(DEFAULT_SCHEMA_TABLE)
        .await
        .iter()
        .map(|row| {
            (
                text(row, "table"),
                text(row, "column"),
                text(row, "type"),
                text(row, "value"),
            )
        })
        .collect()
}

pub fn fact(table: &str, column: &str, property: &str, value: &str) -> (String, String, String, String) {
    (
        table.to_string(),
        column.to_string(),
        property.to_string(),
        value.to_string(),
    )
}
