#![allow(dead_code)]

use oxide_sync::prelude::*;

pub async fn memory_executor() -> SqliteExecutor {
    SqliteExecutor::connect("sqlite::memory:")
        .await
        .unwrap_or_else(|e| panic!("Failed to open in-memory database: {e}"))
}

pub async fn memory_sync(config: SyncConfig) -> SchemaSync {
    SchemaSync::new(Box::new(memory_executor().await), config)
        .unwrap_or_else(|e| panic!("Failed to build sync context: {e}"))
}

pub async fn execute_all(executor: &dyn Executor, statements: &[String]) {
    for sql in statements {
        executor
            .execute(sql, &[])
            .await
            .unwrap_or_else(|e| panic!("Failed to execute: {sql}\nError: {e}"));
    }
}

pub async fn live_table(executor: &dyn Executor, name: &str) -> Option<Table> {
    introspector_for(executor.dialect_name())
        .unwrap()
        .introspect_table(executor, &TablePath::new(name))
        .await
        .unwrap_or_else(|e| panic!("Failed to introspect {name}: {e}"))
}

pub async fn table_exists(executor: &dyn Executor, name: &str) -> bool {
    live_table(executor, name).await.is_some()
}

pub fn sql_migration(timestamp: i64, name: &str, up: &[&str], down: &[&str]) -> Box<dyn Migration> {
    let mut migration = SqlMigration::new(name, timestamp);
    migration.up = up.iter().map(ToString::to_string).collect();
    migration.down = down.iter().map(ToString::to_string).collect();
    Box::new(migration)
}

pub fn create_table_migration(timestamp: i64, table: &str) -> Box<dyn Migration> {
    sql_migration(
        timestamp,
        &format!("create_{table}"),
        &[&format!("CREATE TABLE \"{table}\" (\"id\" integer PRIMARY KEY)")],
        &[&format!("DROP TABLE \"{table}\"")],
    )
}
