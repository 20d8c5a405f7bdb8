#![allow(dead_code)]

use oxide_spanner::prelude::*;

/// A table touching every column feature the dialect stores.
pub fn users_table() -> TableSchema {
    TableSchema::new("users")
        .column(
            ColumnSchema::new("id", ColumnType::Int64)
                .not_null()
                .generated(GenerationStrategy::Increment),
        )
        .column(
            ColumnSchema::new("email", ColumnType::String)
                .not_null()
                .length(ColumnLength::Size(100)),
        )
        .column(ColumnSchema::new("bio", ColumnType::String).length(ColumnLength::Max))
        .column(ColumnSchema::new("avatar", ColumnType::Bytes))
        .column(ColumnSchema::new("tags", ColumnType::String).array())
        .column(ColumnSchema::new("score", ColumnType::Float64))
        .column(ColumnSchema::new("active", ColumnType::Bool).default(ColumnDefault::Expression("true".into())))
        .column(ColumnSchema::new("born_on", ColumnType::Date))
        .column(
            ColumnSchema::new("created_at", ColumnType::Timestamp)
                .not_null()
                .default(ColumnDefault::CommitTimestamp),
        )
        .primary_key(&["id"])
        .index(IndexSchema::new("uq_users_email", "users", &["email"]).unique())
        .index(IndexSchema::new("idx_users_score", "users", &["score"]).null_filtered())
}

/// A table keyed by a UUID and a custom generator.
pub fn sessions_table() -> TableSchema {
    let mut by_user = IndexSchema::new("sessions_by_user", "sessions", &["user_id"]);
    by_user.columns.push(IndexColumn::desc("issued_at"));
    by_user.storing.push("token".to_string());

    TableSchema::new("sessions")
        .column(
            ColumnSchema::new("id", ColumnType::String)
                .not_null()
                .length(ColumnLength::Size(36))
                .generated(GenerationStrategy::Uuid),
        )
        .column(
            ColumnSchema::new("token", ColumnType::String)
                .generated(GenerationStrategy::Custom("token_generator".into())),
        )
        .column(ColumnSchema::new("user_id", ColumnType::Int64).not_null())
        .column(ColumnSchema::new("issued_at", ColumnType::Timestamp))
        .primary_key(&["id"])
        .index(by_user)
}

/// Renders `table` to Spanner DDL, parses the DDL back and attaches the
/// facts the transformation produced.
pub fn round_trip(table: &TableSchema) -> TableSchema {
    let mut delta = ExtendedSchemaDelta::new();
    let sql = transform_all(&Statement::for_table(table), &mut delta)
        .unwrap_or_else(|e| panic!("Failed to transform {}: {e}", table.name));
    let parsed = SchemaTextParser::new()
        .parse(&sql)
        .unwrap_or_else(|e| panic!("Failed to parse {sql:?}: {e}"));
    let facts = delta.applied_to(&ExtendedSchemaMap::new());
    facts
        .decorate(&parsed[&table.name], false)
        .unwrap_or_else(|e| panic!("Failed to decorate {}: {e}", table.name))
}
