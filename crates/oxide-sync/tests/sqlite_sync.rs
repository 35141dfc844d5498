//! Round-trip tests against an in-memory SQLite database.
//!
//! Each test plans a change, applies it, introspects the result and
//! diffs it again. A correct plan leaves nothing to diff.

mod common;

use common::{execute_all, live_table, memory_sync};
use oxide_sync::prelude::*;

fn author() -> Table {
    Table::new("author")
        .column(Column::new("id", "integer").primary().increment())
        .column(Column::new("name", "varchar").length(100).not_null())
}

fn post_v1() -> Table {
    Table::new("post")
        .column(Column::new("id", "integer").primary().increment())
        .column(Column::new("author_id", "integer").not_null())
        .column(Column::new("title", "varchar").length(50).not_null())
        .column(Column::new("views", "integer").not_null().default("0"))
        .foreign_key(
            ForeignKey::new("fk_post_author", vec!["author_id".into()], "author", vec!["id".into()])
                .on_delete(ForeignKeyAction::Cascade),
        )
        .check(Check::new("ck_post_views", "views >= 0"))
}

fn post_v2() -> Table {
    post_v1()
        .column(Column::new("body", "text"))
        .column(Column::new("rating", "numeric").precision(3, 1))
        .index(Index::new("idx_post_title", vec!["title".into()]))
        .index(
            Index::new("idx_post_popular", vec!["views".into()]).where_clause("views > 100"),
        )
}

async fn assert_in_sync(sync: &SchemaSync, desired: &[Table]) {
    let plan = sync.diff_only(desired).await.unwrap();
    assert!(
        plan.is_empty(),
        "expected no changes, got: {:?}",
        plan.up_queries()
    );
}

#[tokio::test]
async fn created_tables_introspect_back_unchanged() {
    let sync = memory_sync(SyncConfig::default()).await;
    let desired = vec![post_v1(), author()];

    let plan = sync.diff_only(&desired).await.unwrap();
    // Referenced table first.
    assert!(matches!(&plan.steps[0].delta, Delta::AddTable(t) if t.name.name == "author"));
    execute_all(sync.executor(), &plan.up_queries()).await;

    assert_in_sync(&sync, &desired).await;
    let post = live_table(sync.executor(), "post").await.unwrap();
    assert_eq!(post.foreign_keys[0].on_delete, ForeignKeyAction::Cascade);
}

#[tokio::test]
async fn up_then_down_restores_structure() {
    let sync = memory_sync(SyncConfig::default()).await;
    let v1 = vec![author(), post_v1()];
    let v2 = vec![author(), post_v2()];
    sync.synchronize(&v1).await.unwrap();

    let plan = sync.diff_only(&v2).await.unwrap();
    assert!(!plan.is_empty());
    execute_all(sync.executor(), &plan.up_queries()).await;
    assert_in_sync(&sync, &v2).await;

    execute_all(sync.executor(), &plan.down_queries()).await;
    assert_in_sync(&sync, &v1).await;
}

#[tokio::test]
async fn column_change_rebuilds_table_on_sqlite() {
    let sync = memory_sync(SyncConfig::default()).await;
    let live = Table::new("note")
        .column(Column::new("id", "integer").primary())
        .column(Column::new("summary", "varchar").length(50));
    sync.synchronize(&[live.clone()]).await.unwrap();

    let desired = Table::new("note")
        .column(Column::new("id", "integer").primary())
        .column(Column::new("summary", "varchar").length(200));
    let plan = sync.diff_only(&[desired.clone()]).await.unwrap();
    assert_eq!(
        plan.steps[0].alteration,
        Some(Alteration::Destructive(oxide_sync::policy::Destructive::Rebuild))
    );
    assert!(matches!(plan.steps[0].delta, Delta::RebuildTable { .. }));
    // The widened values are copied across, only the way back truncates.
    assert!(!plan.has_unsafe_changes());
    assert!(plan.up_queries()[0].starts_with("CREATE TABLE \"_new_note\""));

    execute_all(sync.executor(), &plan.up_queries()).await;
    assert_in_sync(&sync, &[desired]).await;
    execute_all(sync.executor(), &plan.down_queries()).await;
    assert_in_sync(&sync, &[live]).await;
}

fn article(title: Column, slug: Column) -> Table {
    Table::new("article")
        .column(Column::new("id", "integer").primary().increment())
        .column(title)
        .column(slug)
        .unique(Unique::new("uq_article_slug", vec!["slug".into()]))
}

fn title(length: u32) -> Column {
    Column::new("title", "varchar").length(length).not_null()
}

fn slug(length: u32) -> Column {
    Column::new("slug", "varchar").length(length).not_null()
}

async fn seed_articles(sync: &SchemaSync) {
    execute_all(
        sync.executor(),
        &[r#"INSERT INTO "article" ("title", "slug") VALUES ('First', 'first'), ('Second', 'second')"#
            .to_string()],
    )
    .await;
}

async fn column_values(sync: &SchemaSync, table: &str, column: &str) -> Vec<Value> {
    sync.executor()
        .query(&format!(r#"SELECT "{column}" FROM "{table}" ORDER BY "id""#), &[])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}

fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::Text((*v).to_string())).collect()
}

#[tokio::test]
async fn rebuild_keeps_rows_of_not_null_column() {
    let sync = memory_sync(SyncConfig::default()).await;
    sync.synchronize(&[article(title(50), slug(80))]).await.unwrap();
    seed_articles(&sync).await;

    let desired = article(title(100), slug(80));
    let plan = sync.synchronize(&[desired.clone()]).await.unwrap();
    assert!(matches!(plan.steps[0].delta, Delta::RebuildTable { .. }));

    assert_in_sync(&sync, &[desired]).await;
    assert_eq!(
        column_values(&sync, "article", "title").await,
        texts(&["First", "Second"])
    );
}

#[tokio::test]
async fn rebuild_recreates_index_on_column() {
    let indexed = |length| {
        article(title(length), slug(80)).index(Index::new("idx_article_title", vec!["title".into()]))
    };
    let sync = memory_sync(SyncConfig::default()).await;
    sync.synchronize(&[indexed(50)]).await.unwrap();
    seed_articles(&sync).await;

    sync.synchronize(&[indexed(100)]).await.unwrap();

    assert_in_sync(&sync, &[indexed(100)]).await;
    let live = live_table(sync.executor(), "article").await.unwrap();
    assert_eq!(live.indices.len(), 1);
    assert_eq!(live.indices[0].name, "idx_article_title");
    assert_eq!(
        column_values(&sync, "article", "title").await,
        texts(&["First", "Second"])
    );
}

#[tokio::test]
async fn rebuild_keeps_unique_constraint_on_column() {
    let sync = memory_sync(SyncConfig::default()).await;
    sync.synchronize(&[article(title(50), slug(80))]).await.unwrap();
    seed_articles(&sync).await;

    let desired = article(title(50), slug(120));
    sync.synchronize(&[desired.clone()]).await.unwrap();

    assert_in_sync(&sync, &[desired]).await;
    assert_eq!(
        column_values(&sync, "article", "slug").await,
        texts(&["first", "second"])
    );
    let duplicate = sync
        .executor()
        .execute(
            r#"INSERT INTO "article" ("title", "slug") VALUES ('Third', 'first')"#,
            &[],
        )
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn rebuild_keeps_foreign_key_column() {
    let sync = memory_sync(SyncConfig::default()).await;
    sync.synchronize(&[author(), post_v1()]).await.unwrap();
    execute_all(
        sync.executor(),
        &[
            r#"INSERT INTO "author" ("name") VALUES ('Ada')"#.to_string(),
            r#"INSERT INTO "post" ("author_id", "title") VALUES (1, 'Hello')"#.to_string(),
        ],
    )
    .await;

    let mut post = post_v1();
    post.columns[1] = Column::new("author_id", "bigint").not_null();
    let desired = vec![author(), post];
    sync.synchronize(&desired).await.unwrap();

    assert_in_sync(&sync, &desired).await;
    assert_eq!(column_values(&sync, "post", "author_id").await, vec![Value::Int(1)]);
    assert_eq!(column_values(&sync, "post", "views").await, vec![Value::Int(0)]);
    let live = live_table(sync.executor(), "post").await.unwrap();
    assert_eq!(live.foreign_keys.len(), 1);
    assert_eq!(live.checks.len(), 1);

    let orphan = sync
        .executor()
        .execute(r#"INSERT INTO "post" ("author_id", "title") VALUES (99, 'Lost')"#, &[])
        .await;
    assert!(orphan.is_err());
}

#[tokio::test]
async fn incompatible_change_fills_not_null_column() {
    let sync = memory_sync(SyncConfig::default()).await;
    sync.synchronize(&[article(title(50), slug(80))]).await.unwrap();
    seed_articles(&sync).await;

    let desired = article(Column::new("title", "integer").not_null(), slug(80));
    let plan = sync.diff_only(&[desired.clone()]).await.unwrap();
    assert!(plan.has_unsafe_changes());
    sync.synchronize(&[desired.clone()]).await.unwrap();

    assert_in_sync(&sync, &[desired]).await;
    assert_eq!(
        column_values(&sync, "article", "title").await,
        vec![Value::Int(0), Value::Int(0)]
    );
    assert_eq!(
        column_values(&sync, "article", "slug").await,
        texts(&["first", "second"])
    );
}

#[tokio::test]
async fn unsupported_change_fails_before_any_statement() {
    let sync = memory_sync(SyncConfig::default()).await;
    sync.synchronize(&[author(), post_v1()]).await.unwrap();

    let desired = post_v1().foreign_key(ForeignKey::new(
        "fk_post_editor",
        vec!["views".into()],
        "author",
        vec!["id".into()],
    ));
    let err = sync.synchronize(&[author(), desired]).await.unwrap_err();
    assert!(matches!(err, SyncError::UnsupportedOperation { dialect: "sqlite", .. }));
}

#[tokio::test]
async fn orphan_tables_are_dropped_only_when_enabled() {
    let keep = SyncConfig::default();
    let sync = memory_sync(keep).await;
    sync.synchronize(&[author()]).await.unwrap();
    assert!(sync.diff_only(&[]).await.unwrap().is_empty());

    let prune = SyncConfig {
        drop_orphans: true,
        ..SyncConfig::default()
    };
    let sync = memory_sync(prune).await;
    sync.synchronize(&[author()]).await.unwrap();
    let plan = sync.diff_only(&[]).await.unwrap();
    assert_eq!(plan.steps.len(), 1);
    assert!(matches!(&plan.steps[0].delta, Delta::DropTable(t) if t.name.name == "author"));
    assert!(plan.has_unsafe_changes());
}

#[tokio::test]
async fn generate_run_and_revert_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        migrations_dir: dir.path().to_path_buf(),
        ..SyncConfig::default()
    };
    let sync = memory_sync(config).await;
    let desired = vec![author(), post_v1()];

    assert_eq!(sync.check(&desired).await.unwrap(), CheckStatus::ChangesPending);
    let path = sync
        .generate_migration(&desired, "initial", dir.path())
        .await
        .unwrap()
        .expect("a migration is written");
    assert!(path.to_string_lossy().ends_with("_initial.toml"));
    // Generating only reads the database.
    assert_eq!(sync.check(&desired).await.unwrap(), CheckStatus::ChangesPending);

    let units = sync.load_migrations().unwrap();
    assert_eq!(units.len(), 1);
    let report = sync
        .run_migrations(&units, &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.applied, vec![units[0].identifier()]);
    assert_eq!(sync.check(&desired).await.unwrap(), CheckStatus::UpToDate);

    let reverted = sync.revert_last_migration(&units).await.unwrap();
    assert_eq!(reverted, Some(units[0].identifier()));
    assert!(live_table(sync.executor(), "post").await.is_none());
    assert_eq!(sync.revert_last_migration(&units).await.unwrap(), None);
}
