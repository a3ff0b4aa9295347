//! Partitioned key-value access to the cache file.
//!
//! Every operation touches a single partition; there is no cross-partition
//! transaction.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{BackupSnapshot, BackupStats, MemberRecord};

/// String-keyed partitions of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Member records, keyed by member id
    Records,
    /// Rendered section content, keyed by section name
    SectionContent,
    /// Sync bookkeeping, keyed by member id
    SyncMeta,
    /// Backup counters, keyed by member id
    BackupMeta,
}

impl Partition {
    fn table(&self) -> &'static str {
        match self {
            Partition::Records => "records",
            Partition::SectionContent => "section_content",
            Partition::SyncMeta => "sync_meta",
            Partition::BackupMeta => "backup_meta",
        }
    }
}

/// A cached payload with the time it was written.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub cached_at: String,
}

/// Records that know their own primary key in a partition.
pub trait Keyed {
    const PARTITION: Partition;

    fn cache_key(&self) -> String;
}

impl Keyed for MemberRecord {
    const PARTITION: Partition = Partition::Records;

    fn cache_key(&self) -> String {
        self.id.clone()
    }
}

impl Keyed for BackupStats {
    const PARTITION: Partition = Partition::BackupMeta;

    fn cache_key(&self) -> String {
        self.member_id.clone()
    }
}

/// Where the last reconciled record of a member came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub member_id: String,
    pub last_sync: String,
    pub source: SyncSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Remote,
    Cache,
    Local,
}

impl Keyed for SyncMetadata {
    const PARTITION: Partition = Partition::SyncMeta;

    fn cache_key(&self) -> String {
        self.member_id.clone()
    }
}

/// Handle to the local cache store.
#[derive(Clone)]
pub struct LocalCache {
    pool: SqlitePool,
}

impl LocalCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the stored schema version.
    pub async fn schema_version(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT schema_version FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("schema_version"))
    }

    // ==================== KEYED PARTITIONS ====================

    /// Read one entry.
    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: Partition,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>, AppError> {
        let sql = format!(
            "SELECT key, payload, cached_at FROM {} WHERE key = ?",
            partition.table()
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let payload = serde_json::from_str(&payload)
            .map_err(|e| AppError::Cache(format!("Corrupt {} entry {}: {}", partition.table(), key, e)))?;

        Ok(Some(CacheEntry {
            key: row.get("key"),
            payload,
            cached_at: row.get("cached_at"),
        }))
    }

    /// Upsert one entry by primary key.
    pub async fn put<T: Serialize>(
        &self,
        partition: Partition,
        key: &str,
        payload: &T,
    ) -> Result<(), AppError> {
        let json = serde_json::to_string(payload)
            .map_err(|e| AppError::Cache(format!("Unserializable cache payload: {}", e)))?;
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (key, payload, cached_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, cached_at = excluded.cached_at",
            partition.table()
        );

        sqlx::query(&sql)
            .bind(key)
            .bind(&json)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Upsert a record under its own key and partition.
    pub async fn put_keyed<T: Keyed + Serialize>(&self, record: &T) -> Result<(), AppError> {
        self.put(T::PARTITION, &record.cache_key(), record).await
    }

    /// Read a keyed record by key.
    pub async fn get_keyed<T: Keyed + DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>, AppError> {
        self.get(T::PARTITION, key).await
    }

    /// Soft read: failures are logged and reported as a miss.
    pub async fn lookup<T: Keyed + DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get_keyed::<T>(key).await {
            Ok(entry) => entry.map(|e| e.payload),
            Err(e) => {
                tracing::warn!("Cache read failed for {:?}/{}: {}", T::PARTITION, key, e);
                None
            }
        }
    }

    /// Soft write: failures are logged and swallowed.
    pub async fn store<T: Keyed + Serialize>(&self, record: &T) {
        if let Err(e) = self.put_keyed(record).await {
            tracing::warn!(
                "Cache write failed for {:?}/{}: {}",
                T::PARTITION,
                record.cache_key(),
                e
            );
        }
    }

    // ==================== BACKUPS ====================

    /// Upsert a backup snapshot by timestamp.
    pub async fn put_backup(&self, snapshot: &BackupSnapshot) -> Result<(), AppError> {
        let json = serde_json::to_string(snapshot)
            .map_err(|e| AppError::Cache(format!("Unserializable backup: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO backups (timestamp, member_id, payload, cached_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(timestamp) DO UPDATE SET member_id = excluded.member_id, \
             payload = excluded.payload, cached_at = excluded.cached_at",
        )
        .bind(snapshot.timestamp)
        .bind(&snapshot.member_id)
        .bind(&json)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a backup snapshot by timestamp.
    pub async fn get_backup(&self, timestamp: i64) -> Result<Option<BackupSnapshot>, AppError> {
        let row = sqlx::query("SELECT payload FROM backups WHERE timestamp = ?")
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| backup_from_row(&row)).transpose()
    }

    /// All snapshots of a member, most recent first.
    pub async fn list_backups(&self, member_id: &str) -> Result<Vec<BackupSnapshot>, AppError> {
        let rows = sqlx::query(
            "SELECT payload FROM backups WHERE member_id = ? ORDER BY timestamp DESC",
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(backup_from_row).collect()
    }

    /// Delete a backup snapshot.
    pub async fn delete_backup(&self, timestamp: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM backups WHERE timestamp = ?")
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// Helper functions for row conversion

fn backup_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BackupSnapshot, AppError> {
    let payload: String = row.get("payload");
    serde_json::from_str(&payload).map_err(|e| AppError::Cache(format!("Corrupt backup: {}", e)))
}
