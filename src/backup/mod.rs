//! Point-in-time backups of the in-memory member record.
//!
//! Snapshots are keyed by a process-wide strictly increasing millisecond
//! timestamp. After every new snapshot the member's older ones beyond the
//! retention count are deleted.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::cache::{LocalCache, SyncMetadata, SyncSource};
use crate::errors::AppError;
use crate::models::{BackupMetadata, BackupSnapshot, BackupStats, MemberRecord, NotificationKind};
use crate::notify::Notifier;
use crate::sync::SessionContext;

/// Retention and timer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupPolicy {
    pub max_backups: usize,
    pub interval: Duration,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            max_backups: 5,
            interval: Duration::from_secs(30 * 60),
        }
    }
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Current time in milliseconds, bumped past the last issued value.
fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_TIMESTAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

pub struct BackupManager {
    ctx: Arc<SessionContext>,
    cache: LocalCache,
    notifier: Arc<dyn Notifier>,
    policy: BackupPolicy,
}

impl BackupManager {
    pub fn new(
        ctx: Arc<SessionContext>,
        cache: LocalCache,
        notifier: Arc<dyn Notifier>,
        policy: BackupPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            cache,
            notifier,
            policy,
        })
    }

    /// Snapshot the in-memory record of `member_id`, then prune.
    pub async fn create_backup(&self, member_id: &str) -> Result<BackupSnapshot, AppError> {
        let (data, metadata) = {
            let state = self.ctx.state.read().await;
            match &state.record {
                Some(record) if record.id == member_id => (
                    record.clone(),
                    BackupMetadata {
                        last_update: record.last_update.clone().or_else(|| state.last_sync.clone()),
                        current_section: state.active_section,
                    },
                ),
                _ => {
                    return Err(AppError::NotFound(format!(
                        "No loaded record for member {} to back up",
                        member_id
                    )))
                }
            }
        };

        let snapshot = BackupSnapshot {
            timestamp: next_timestamp(),
            member_id: member_id.to_string(),
            data,
            metadata,
        };
        self.cache.put_backup(&snapshot).await?;
        tracing::info!(member_id, timestamp = snapshot.timestamp, "Backup created");

        let mut stats = self
            .cache
            .lookup::<BackupStats>(member_id)
            .await
            .unwrap_or_else(|| BackupStats {
                member_id: member_id.to_string(),
                ..BackupStats::default()
            });
        stats.backup_count += 1;
        stats.last_backup = Some(snapshot.timestamp);
        self.cache.store(&stats).await;

        self.prune(member_id).await;

        Ok(snapshot)
    }

    /// Delete every snapshot of the member beyond the retention count.
    async fn prune(&self, member_id: &str) {
        let snapshots = match self.cache.list_backups(member_id).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::warn!(member_id, "Backup pruning skipped: {}", e);
                return;
            }
        };

        for stale in snapshots.iter().skip(self.policy.max_backups) {
            match self.cache.delete_backup(stale.timestamp).await {
                Ok(()) => tracing::debug!(member_id, timestamp = stale.timestamp, "Pruned backup"),
                Err(e) => tracing::warn!(member_id, timestamp = stale.timestamp, "Pruning failed: {}", e),
            }
        }
    }

    /// Replace the session's record and active section with a snapshot.
    pub async fn restore_from_backup(&self, timestamp: i64) -> Result<BackupSnapshot, AppError> {
        let snapshot = self
            .cache
            .get_backup(timestamp)
            .await?
            .filter(|s| s.member_id == self.ctx.member_id)
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", timestamp)))?;

        {
            let mut state = self.ctx.state.write().await;
            state.record = Some(snapshot.data.clone());
            state.active_section = snapshot.metadata.current_section;
            state.from_cache = true;
        }
        self.cache.store::<MemberRecord>(&snapshot.data).await;
        self.cache
            .store(&SyncMetadata {
                member_id: snapshot.member_id.clone(),
                last_sync: Utc::now().to_rfc3339(),
                source: SyncSource::Local,
            })
            .await;

        tracing::info!(member_id = %snapshot.member_id, timestamp, "Backup restored");
        self.notifier.notify(
            "Backup ripristinato",
            &format!("Dati ripristinati al backup {}", timestamp),
            NotificationKind::Success,
        );
        self.ctx.request_render();

        Ok(snapshot)
    }

    /// Snapshots of a member, most recent first.
    pub async fn list_backups(&self, member_id: &str) -> Result<Vec<BackupSnapshot>, AppError> {
        self.cache.list_backups(member_id).await
    }

    /// Back up the session every `policy.interval` until the handle is aborted.
    pub fn start_auto_backup(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        // tokio panics on a zero period
        let period = manager.policy.interval.max(MIN_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let member_id = manager.ctx.member_id.clone();
                if let Err(e) = manager.create_backup(&member_id).await {
                    tracing::warn!(member_id = %member_id, "Scheduled backup failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{open_cache, CURRENT_SCHEMA_VERSION};
    use crate::models::Section;
    use crate::notify::NotificationFeed;
    use crate::sync::SectionRenderer;
    use serde_json::json;
    use tempfile::TempDir;

    struct NoopRenderer;

    impl SectionRenderer for NoopRenderer {
        fn render(&self, _section: Section, _record: &MemberRecord) {}
    }

    fn record(name: &str) -> MemberRecord {
        serde_json::from_value(json!({ "id": "m1", "nome": name, "cognome": "Rossi" })).unwrap()
    }

    async fn manager(policy: BackupPolicy) -> (Arc<BackupManager>, LocalCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir.path().join("cache.sqlite"), CURRENT_SCHEMA_VERSION)
            .await
            .unwrap();
        let ctx = SessionContext::new("m1", Arc::new(NoopRenderer));
        let manager = BackupManager::new(ctx, cache.clone(), Arc::new(NotificationFeed::new()), policy);
        (manager, cache, dir)
    }

    #[tokio::test]
    async fn test_backup_requires_loaded_record() {
        let (manager, _cache, _dir) = manager(BackupPolicy::default()).await;
        assert!(matches!(
            manager.create_backup("m1").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_six_backups_keep_five_most_recent() {
        let (manager, cache, _dir) = manager(BackupPolicy::default()).await;
        manager.ctx.state.write().await.record = Some(record("Mario"));

        let mut created = Vec::new();
        for _ in 0..6 {
            created.push(manager.create_backup("m1").await.unwrap().timestamp);
        }

        let remaining: Vec<i64> = manager
            .list_backups("m1")
            .await
            .unwrap()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        let mut expected: Vec<i64> = created[1..].to_vec();
        expected.reverse();
        assert_eq!(remaining, expected);

        let stats = cache.lookup::<BackupStats>("m1").await.unwrap();
        assert_eq!(stats.backup_count, 6);
        assert_eq!(stats.last_backup, Some(created[5]));
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let a = next_timestamp();
        let b = next_timestamp();
        let c = next_timestamp();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_restore_missing_backup_leaves_state() {
        let (manager, _cache, _dir) = manager(BackupPolicy::default()).await;
        {
            let mut state = manager.ctx.state.write().await;
            state.record = Some(record("Mario"));
            state.active_section = Some(Section::Contacts);
        }

        assert!(matches!(
            manager.restore_from_backup(42).await,
            Err(AppError::NotFound(_))
        ));

        let state = manager.ctx.snapshot().await;
        assert_eq!(state.record.unwrap().name, "Mario");
        assert_eq!(state.active_section, Some(Section::Contacts));
        assert!(!state.from_cache);
    }

    #[tokio::test]
    async fn test_restore_overwrites_record_and_section() {
        let (manager, _cache, _dir) = manager(BackupPolicy::default()).await;
        {
            let mut state = manager.ctx.state.write().await;
            state.record = Some(record("Mario"));
            state.active_section = Some(Section::Medical);
        }
        let backup = manager.create_backup("m1").await.unwrap();

        {
            let mut state = manager.ctx.state.write().await;
            state.record = Some(record("Marco"));
            state.active_section = Some(Section::Progression);
        }

        let restored = manager.restore_from_backup(backup.timestamp).await.unwrap();
        assert_eq!(restored.metadata.current_section, Some(Section::Medical));

        let state = manager.ctx.snapshot().await;
        assert_eq!(state.record.unwrap().name, "Mario");
        assert_eq!(state.active_section, Some(Section::Medical));
    }

    #[tokio::test]
    async fn test_scheduled_backups_run_on_interval() {
        let (manager, _cache, _dir) = manager(BackupPolicy {
            max_backups: 5,
            interval: Duration::from_millis(20),
        })
        .await;
        manager.ctx.state.write().await.record = Some(record("Mario"));

        let timer = manager.start_auto_backup();
        tokio::time::sleep(Duration::from_millis(110)).await;
        timer.abort();

        let count = manager.list_backups("m1").await.unwrap().len();
        assert!(count >= 2, "only {} scheduled backups", count);
        assert!(count <= 5);
    }

    #[tokio::test]
    async fn test_zero_interval_keeps_timer_alive() {
        let (manager, _cache, _dir) = manager(BackupPolicy {
            max_backups: 5,
            interval: Duration::ZERO,
        })
        .await;
        manager.ctx.state.write().await.record = Some(record("Mario"));

        let timer = manager.start_auto_backup();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!timer.is_finished());
        timer.abort();

        assert!(!manager.list_backups("m1").await.unwrap().is_empty());
    }
}
