//! Integration tests for synchronization passes against the in-memory client.

mod common;

use std::sync::Arc;

use common::{client, entities, fact, posts_entity, side_rows, synchronizer, users_entity};
use oxide_spanner::prelude::*;
use oxide_spanner_sync::prelude::*;
use serde_json::json;

fn sorted(mut rows: Vec<(String, String, String, String)>) -> Vec<(String, String, String, String)> {
    rows.sort();
    rows
}

#[tokio::test]
async fn test_bootstrap_persists_facts() {
    let client = client();
    let sync = synchronizer(&client);

    let report = sync.synchronize(&entities(), &[], true).await.unwrap();
    assert!(report.ddl.is_empty());
    assert_eq!(report.extended.additions.len(), 5);
    assert!(report.extended.removals.is_empty());
    assert_eq!(report.tables, 3);

    assert_eq!(
        sorted(side_rows(&client).await),
        sorted(vec![
            fact("posts", "id", "generatorStrategy", "increment"),
            fact("posts", "title", "default", "'untitled'"),
            fact("posts", "updated_at", "default", COMMIT_TIMESTAMP_SENTINEL),
            fact("users", "created_at", "default", COMMIT_TIMESTAMP_SENTINEL),
            fact("users", "id", "generatorStrategy", "increment"),
        ])
    );

    let users = sync.cache().table("users").unwrap();
    assert_eq!(
        users.get_column("id").unwrap().generation,
        Some(GenerationStrategy::Increment)
    );
    let posts = sync.cache().table("posts").unwrap();
    assert_eq!(
        posts.get_column("updated_at").unwrap().default,
        Some(ColumnDefault::CommitTimestamp)
    );
}

#[tokio::test]
async fn test_second_pass_is_empty() {
    let client = client();
    let sync = synchronizer(&client);
    sync.synchronize(&entities(), &[], true).await.unwrap();
    let writes = client.writes().await;

    let report = sync.synchronize(&entities(), &[], false).await.unwrap();
    assert!(report.extended.is_empty());
    assert_eq!(client.writes().await, writes);
}

#[tokio::test]
async fn test_changed_metadata_rewrites_only_the_difference() {
    let client = client();
    let sync = synchronizer(&client);
    sync.synchronize(&entities(), &[], true).await.unwrap();

    let users = EntityMetadata::new("users")
        .column(ColumnMetadata::new("id").generated(GenerationStrategy::Uuid))
        .column(ColumnMetadata::new("created_at").create_date());
    let report = sync
        .synchronize(&[users, posts_entity()], &[], false)
        .await
        .unwrap();
    assert_eq!(report.extended.additions.len(), 1);
    assert_eq!(report.extended.additions[0].value, "uuid");
    assert!(report.extended.removals.is_empty());
}

#[tokio::test]
async fn test_missing_columns_tolerated_only_on_bootstrap() {
    let client = client();
    let sync = synchronizer(&client);
    let with_missing =
        vec![users_entity().column(ColumnMetadata::new("nickname").default("'anon'"))];

    let err = sync.synchronize(&with_missing, &[], false).await.unwrap_err();
    assert!(err.is_dangling_reference(), "{err}");
    assert!(side_rows(&client).await.is_empty());

    let report = sync.synchronize(&with_missing, &[], true).await.unwrap();
    assert_eq!(report.extended.additions.len(), 2);
    assert!(side_rows(&client)
        .await
        .iter()
        .all(|(_, column, _, _)| column != "nickname"));
}

#[tokio::test]
async fn test_interrupted_pass_heals_on_next_pass() {
    let client = client();
    let sync = synchronizer(&client);

    client.fail_writes_after(2).await;
    let err = sync.synchronize(&entities(), &[], true).await.unwrap_err();
    assert!(matches!(err, SyncError::Client { .. }), "{err}");
    assert_eq!(side_rows(&client).await.len(), 2);
    assert!(!sync.cache().is_extended_loaded());

    client.clear_write_failure().await;
    let report = sync.synchronize(&entities(), &[], true).await.unwrap();
    assert_eq!(report.extended.additions.len(), 3);
    assert_eq!(side_rows(&client).await.len(), 5);
}

#[tokio::test]
async fn test_missing_generator_row_is_rewritten() {
    let client = client();
    let sync = synchronizer(&client);
    let mailer = vec![
        EntityMetadata::new("users").column(
            ColumnMetadata::new("email").generated(GenerationStrategy::Custom("mailer".to_string())),
        ),
    ];
    sync.synchronize(&mailer, &[], true).await.unwrap();
    assert!(side_rows(&client)
        .await
        .contains(&fact("users", "email", "generator", "mailer")));

    client
        .delete_row(
            DEFAULT_SCHEMA_TABLE,
            vec![json!("users"), json!("email"), json!("generator")],
        )
        .await
        .unwrap();

    let report = sync.synchronize(&mailer, &[], true).await.unwrap();
    assert_eq!(report.extended.additions.len(), 1);
    assert_eq!(report.extended.additions[0].property, PropertyType::Generator);
    assert_eq!(report.extended.additions[0].value, "mailer");
    assert!(report.extended.removals.is_empty());
    assert_eq!(
        sorted(side_rows(&client).await),
        sorted(vec![
            fact("users", "email", "generator", "mailer"),
            fact("users", "email", "generatorStrategy", "custom"),
        ])
    );
    assert_eq!(
        sync.cache().table("users").unwrap().get_column("email").unwrap().generation,
        Some(GenerationStrategy::Custom("mailer".to_string()))
    );
}

#[tokio::test]
async fn test_ddl_facts_follow_drop_and_rename() {
    let client = client();
    let sync = synchronizer(&client);
    sync.synchronize(&entities(), &[], true).await.unwrap();

    let add_code = Statement::alter(
        "users",
        AlterAction::AddColumn(
            ColumnDefinition::new("code", DataType::new("uuid")).generated(GenerationStrategy::Uuid),
        ),
    );
    let (ddl, diff) = sync.execute_ddl(&[add_code], false).await.unwrap();
    assert_eq!(ddl, vec!["ALTER TABLE users ADD COLUMN code string(36)"]);
    assert_eq!(diff.additions.len(), 1);
    assert_eq!(
        sync.cache().table("users").unwrap().get_column("code").unwrap().generation,
        Some(GenerationStrategy::Uuid)
    );

    let statements = vec![
        Statement::drop_table("posts"),
        Statement::RenameTable(RenameTable {
            renames: vec![TableRename {
                from: "users".to_string(),
                to: "members".to_string(),
            }],
        }),
    ];
    let (ddl, diff) = sync.execute_ddl(&statements, false).await.unwrap();
    assert_eq!(
        ddl,
        vec!["DROP TABLE posts", "ALTER TABLE users RENAME TO members"]
    );
    assert_eq!(diff.additions.len(), 3);
    assert_eq!(diff.removals.len(), 6);

    let rows = side_rows(&client).await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(table, _, _, _)| table == "members"));
    assert!(sync.cache().table("users").is_none());
    assert!(sync.cache().table("posts").is_none());
    assert_eq!(
        sync.cache().table("members").unwrap().get_column("id").unwrap().generation,
        Some(GenerationStrategy::Increment)
    );
}

#[tokio::test]
async fn test_unsupported_statement_applies_nothing() {
    let client = client();
    let sync = synchronizer(&client);

    let statements = vec![
        Statement::alter(
            "users",
            AlterAction::AddColumn(ColumnDefinition::new("age", DataType::new("int"))),
        ),
        Statement::alter(
            "users",
            AlterAction::AddForeignKey(ForeignKeyDefinition {
                name: None,
                columns: vec!["age".to_string()],
                references_table: "ages".to_string(),
                references_columns: vec!["id".to_string()],
            }),
        ),
    ];
    let err = sync.execute_ddl(&statements, false).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Ddl(DdlError::UnsupportedConstruct { .. })
    ));
    assert!(client.applied_ddl().await.is_empty());
}

#[tokio::test]
async fn test_side_table_drop_invalidates_extended_schema() {
    let client = client();
    let sync = synchronizer(&client);
    sync.synchronize(&entities(), &[], true).await.unwrap();
    assert!(sync.cache().is_extended_loaded());

    sync.execute_ddl(&[Statement::drop_table(DEFAULT_SCHEMA_TABLE)], false)
        .await
        .unwrap();
    assert!(!sync.cache().is_extended_loaded());
    assert!(sync.cache().table(DEFAULT_SCHEMA_TABLE).is_none());

    let report = sync.synchronize(&entities(), &[], false).await.unwrap();
    assert_eq!(report.extended.additions.len(), 5);
    assert_eq!(side_rows(&client).await.len(), 5);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let client = client();
    let sync = SchemaSynchronizer::new(Arc::clone(&client), SyncOptions::new().dry_run(true));

    let add_age = Statement::alter(
        "users",
        AlterAction::AddColumn(ColumnDefinition::new("age", DataType::new("int")).auto_increment()),
    );
    let report = sync.synchronize(&entities(), &[add_age], false).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.ddl, vec!["ALTER TABLE users ADD COLUMN age int64"]);
    assert_eq!(report.delta.additions.len(), 1);
    assert_eq!(report.extended.additions.len(), 5);

    assert!(client.applied_ddl().await.is_empty());
    assert_eq!(client.writes().await, 0);
    assert!(client.table(DEFAULT_SCHEMA_TABLE).await.is_none());
    assert!(!client.table("users").await.unwrap().has_column("age"));
}

#[tokio::test]
async fn test_prepare_insert_with_cached_table() {
    let client = client();
    let sync = synchronizer(&client);
    sync.synchronize(&entities(), &[], true).await.unwrap();
    let users = sync.cache().table("users").unwrap();

    let mut row = Row::new();
    row.insert("email".to_string(), json!("ada@example.com"));
    let filled = prepare_insert(&users, &mut row).unwrap();
    assert_eq!(filled, vec!["id", "created_at"]);

    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    let values = row.values().cloned().collect();
    client.upsert_row("users", &columns, values).await.unwrap();

    let stored = client.read_rows("users", &["id", "created_at"]).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0][0].as_str().unwrap().parse::<u64>().is_ok());
    assert_eq!(stored[0][1], json!(COMMIT_TIMESTAMP_SENTINEL));
}
