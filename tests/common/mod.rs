#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use accesscontrol::db::BUSY_TIMEOUT;
use accesscontrol::models::rbac::Subject;
use accesscontrol::models::resource_permission::SetResourcePermissionCommand;

/// A migrated SQLite database in a temp dir; keep the `TempDir` alive for the test.
pub async fn setup_db() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub fn dashboard_command(uid: &str, actions: &[&str]) -> SetResourcePermissionCommand {
    SetResourcePermissionCommand {
        actions: actions.iter().map(|a| a.to_string()).collect(),
        resource: "dashboards".into(),
        resource_id: uid.into(),
        resource_attribute: "uid".into(),
    }
}

pub async fn binding_count(pool: &SqlitePool, subject: &Subject) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM role_binding WHERE subject_kind = ? AND subject_identifier = ?",
    )
    .bind(subject.kind().as_str())
    .bind(subject.identifier())
    .fetch_one(pool)
    .await?;
    Ok(count)
}
