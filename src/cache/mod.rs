//! Local cache store backed by SQLite.
//!
//! The cache is versioned: opening it with a higher schema version than the
//! one on disk creates the missing partitions and keeps existing data.

mod store;

pub use store::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::errors::AppError;

/// Schema version the running binary expects.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Ordered schema steps; a step runs only when its version is above the
/// stored version and not above the requested one.
const MIGRATIONS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS section_content (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
        ],
    ),
    (
        2,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS backups (
                timestamp INTEGER PRIMARY KEY,
                member_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_backups_member_id ON backups(member_id)",
            r#"
            CREATE TABLE IF NOT EXISTS backup_meta (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                cached_at TEXT NOT NULL
            )
            "#,
        ],
    ),
];

/// Open (or create) the cache file and bring its schema up to `version`.
pub async fn open_cache(cache_path: &Path, version: i64) -> Result<LocalCache, AppError> {
    // Ensure the parent directory exists
    if let Some(parent) = cache_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", cache_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool, version).await?;

    Ok(LocalCache::new(pool))
}

/// Apply every migration step between the stored and the requested version.
async fn run_migrations(pool: &SqlitePool, target: i64) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 0,
            migrated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO meta (id, schema_version) VALUES (1, 0)")
        .execute(pool)
        .await?;

    let stored: i64 = sqlx::query("SELECT schema_version FROM meta WHERE id = 1")
        .fetch_one(pool)
        .await?
        .get("schema_version");

    if target <= stored {
        tracing::debug!(stored, target, "Cache schema already up to date");
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for (version, statements) in MIGRATIONS {
        if *version <= stored || *version > target {
            continue;
        }
        tracing::info!("Applying cache schema version {}", version);
        for statement in *statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
    }
    sqlx::query("UPDATE meta SET schema_version = ?, migrated_at = datetime('now') WHERE id = 1")
        .bind(target)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}
