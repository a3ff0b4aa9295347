//! Member-detail sessions.
//!
//! A session is opened when a member's detail page is shown and closed when
//! the viewer navigates away. It owns the sync state, the live subscription,
//! the backup timer and the field editor of that one member.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::backup::{BackupManager, BackupPolicy};
use crate::cache::{SyncMetadata, SyncSource};
use crate::edit::FieldEditor;
use crate::errors::AppError;
use crate::models::{BackupSnapshot, MemberRecord, NotificationKind, Section};
use crate::retry::execute_with_retry;
use crate::sections::{populate_section, SectionRegistry, SectionTemplates, SectionView};
use crate::sync::{
    SectionRenderer, SessionContext, SyncEngine, SyncHandle, SyncPhase, SyncServices, SyncState,
};

/// Keeps the most recently painted section.
pub struct LatestView {
    registry: Arc<SectionRegistry>,
    latest: Mutex<Option<SectionView>>,
}

impl LatestView {
    pub fn new(registry: Arc<SectionRegistry>) -> Self {
        Self {
            registry,
            latest: Mutex::new(None),
        }
    }

    pub fn latest(&self) -> Option<SectionView> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SectionRenderer for LatestView {
    fn render(&self, section: Section, record: &MemberRecord) {
        let Some(spec) = self.registry.get(section) else {
            tracing::warn!(%section, "No spec registered for section");
            return;
        };
        let view = populate_section(spec, record, None, false);
        tracing::debug!(member_id = %record.id, %section, "Section repainted");
        *self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(view);
    }
}

pub struct Session {
    ctx: Arc<SessionContext>,
    view: Arc<LatestView>,
    registry: Arc<SectionRegistry>,
    templates: SectionTemplates,
    editor: FieldEditor,
    backups: Arc<BackupManager>,
    sync: Mutex<Option<SyncHandle>>,
    backup_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Load the member and start live sync.
    ///
    /// A member that does not exist is fatal. An unreachable store falls back
    /// to the cached copy when there is one, otherwise the open fails.
    pub async fn open(
        member_id: &str,
        services: SyncServices,
        registry: Arc<SectionRegistry>,
        templates: SectionTemplates,
        backup_policy: BackupPolicy,
    ) -> Result<Arc<Self>, AppError> {
        let view = Arc::new(LatestView::new(Arc::clone(&registry)));
        let ctx = SessionContext::new(member_id, view.clone());
        ctx.state.write().await.loading = true;

        let live = Self::initial_load(&ctx, &services).await?;

        let backups = BackupManager::new(
            Arc::clone(&ctx),
            services.cache.clone(),
            Arc::clone(&services.notifier),
            backup_policy,
        );
        let editor = FieldEditor::new(
            Arc::clone(&ctx),
            services.clone(),
            Arc::clone(&registry),
            Arc::clone(&backups),
        );

        let sync = if live {
            Some(SyncEngine::new(Arc::clone(&ctx), services).start())
        } else {
            None
        };
        let backup_timer = backups.start_auto_backup();

        tracing::info!(member_id, live, "Session opened");
        Ok(Arc::new(Self {
            ctx,
            view,
            registry,
            templates,
            editor,
            backups,
            sync: Mutex::new(sync),
            backup_timer: Mutex::new(Some(backup_timer)),
        }))
    }

    /// Returns whether the record came from the remote store.
    async fn initial_load(ctx: &Arc<SessionContext>, services: &SyncServices) -> Result<bool, AppError> {
        let member_id = ctx.member_id.clone();
        let label = format!("load {}", member_id);
        let remote = Arc::clone(&services.remote);

        let loaded =
            execute_with_retry(&services.retry, &label, || remote.get_record(&member_id)).await;

        match loaded {
            Ok(Some(mut record)) => {
                if record.id.is_empty() {
                    record.id = member_id.clone();
                }
                let now = Utc::now().to_rfc3339();
                services.cache.store(&record).await;
                services
                    .cache
                    .store(&SyncMetadata {
                        member_id: member_id.clone(),
                        last_sync: now.clone(),
                        source: SyncSource::Remote,
                    })
                    .await;
                let mut state = ctx.state.write().await;
                state.record = Some(record);
                state.last_sync = Some(now);
                state.loading = false;
                Ok(true)
            }
            Ok(None) => {
                tracing::error!(member_id = %member_id, "Member not found");
                Err(AppError::NotFound(format!("Member {} not found", member_id)))
            }
            Err(err) if err.root().is_transient() => {
                let Some(cached) = services.cache.lookup::<MemberRecord>(&member_id).await else {
                    tracing::error!(member_id = %member_id, "Initial load failed with no cached copy: {}", err);
                    services.notifier.notify(
                        "Errore",
                        "Impossibile caricare i dati dell'esploratore",
                        NotificationKind::Error,
                    );
                    return Err(err);
                };
                tracing::warn!(member_id = %member_id, "Initial load failed, using cached copy: {}", err);
                services.notifier.notify(
                    "Modalità offline",
                    "Connessione non disponibile, vengono mostrati i dati salvati in cache",
                    NotificationKind::Cache,
                );
                let last_sync = services
                    .cache
                    .lookup::<SyncMetadata>(&member_id)
                    .await
                    .map(|meta| meta.last_sync);
                let mut state = ctx.state.write().await;
                state.record = Some(cached);
                state.last_sync = last_sync;
                state.from_cache = true;
                state.phase = SyncPhase::Degraded;
                state.last_error = Some(err.to_string());
                state.loading = false;
                Ok(false)
            }
            Err(err) => {
                tracing::error!(member_id = %member_id, "Initial load failed: {}", err);
                Err(err)
            }
        }
    }

    pub async fn state(&self) -> SyncState {
        self.ctx.snapshot().await
    }

    /// Last section painted by the live sync, if any.
    pub fn latest_view(&self) -> Option<SectionView> {
        self.view.latest()
    }

    /// Make `section` the active one and populate it for the viewer.
    pub async fn show_section(&self, section: Section, editable: bool) -> Result<SectionView, AppError> {
        let spec = self
            .registry
            .get(section)
            .ok_or_else(|| AppError::NotFound(format!("Section {} not found", section)))?;

        let record = {
            let mut state = self.ctx.state.write().await;
            state.active_section = Some(section);
            state.record.clone()
        };
        let record = record.ok_or_else(|| {
            AppError::NotFound(format!("Member {} is not loaded", self.ctx.member_id))
        })?;

        let template = match self.templates.get(spec.template).await {
            Ok(markup) => Some(markup),
            Err(e) => {
                tracing::warn!(template = spec.template, "Section template unavailable: {}", e);
                None
            }
        };

        Ok(populate_section(spec, &record, template, editable))
    }

    pub async fn save_field(
        &self,
        section: Section,
        field_id: &str,
        value: &str,
    ) -> Result<MemberRecord, AppError> {
        self.editor.save_field(section, field_id, value).await
    }

    pub async fn create_backup(&self) -> Result<BackupSnapshot, AppError> {
        self.backups.create_backup(&self.ctx.member_id).await
    }

    pub async fn restore_from_backup(&self, timestamp: i64) -> Result<BackupSnapshot, AppError> {
        self.backups.restore_from_backup(timestamp).await
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupSnapshot>, AppError> {
        self.backups.list_backups(&self.ctx.member_id).await
    }

    /// Stop live sync and the backup timer.
    pub async fn close(&self) {
        self.stop();
        self.ctx.set_phase(SyncPhase::Closed).await;
        tracing::info!(member_id = %self.ctx.member_id, "Session closed");
    }

    fn stop(&self) {
        if let Some(sync) = self
            .sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            sync.unsubscribe();
        }
        if let Some(timer) = self
            .backup_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            timer.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open sessions by member id.
pub struct SessionManager {
    services: SyncServices,
    registry: Arc<SectionRegistry>,
    templates: SectionTemplates,
    backup_policy: BackupPolicy,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        services: SyncServices,
        registry: Arc<SectionRegistry>,
        templates: SectionTemplates,
        backup_policy: BackupPolicy,
    ) -> Self {
        Self {
            services,
            registry,
            templates,
            backup_policy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a fresh session, closing any previous one for the same member.
    pub async fn open(&self, member_id: &str) -> Result<Arc<Session>, AppError> {
        let session = Session::open(
            member_id,
            self.services.clone(),
            Arc::clone(&self.registry),
            self.templates.clone(),
            self.backup_policy.clone(),
        )
        .await?;

        let previous = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.insert(member_id.to_string(), Arc::clone(&session));
            tracing::debug!(open_sessions = sessions.len(), "Session registered");
            previous
        };
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(session)
    }

    pub async fn get(&self, member_id: &str) -> Result<Arc<Session>, AppError> {
        self.sessions
            .read()
            .await
            .get(member_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No open session for member {}", member_id)))
    }

    pub async fn close(&self, member_id: &str) -> Result<(), AppError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(member_id)
            .ok_or_else(|| AppError::NotFound(format!("No open session for member {}", member_id)))?;
        session.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{open_cache, LocalCache, CURRENT_SCHEMA_VERSION};
    use crate::notify::NotificationFeed;
    use crate::remote::MemoryRecordStore;
    use crate::retry::RetryPolicy;
    use crate::sections::{TemplateSource, PLACEHOLDER};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct StaticTemplates;

    #[async_trait]
    impl TemplateSource for StaticTemplates {
        async fn fetch_section_template(&self, template: &str) -> Result<String, AppError> {
            Ok(format!("<section id=\"{}\"></section>", template))
        }
    }

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        cache: LocalCache,
        manager: SessionManager,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir.path().join("cache.sqlite"), CURRENT_SCHEMA_VERSION)
            .await
            .unwrap();
        let store = Arc::new(MemoryRecordStore::new());
        let services = SyncServices {
            remote: store.clone(),
            cache: cache.clone(),
            notifier: Arc::new(NotificationFeed::new()),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                backoff_factor: 2.0,
                max_delay: Duration::from_millis(2),
                max_jitter: Duration::ZERO,
            },
        };
        let templates = SectionTemplates::new(Arc::new(StaticTemplates), cache.clone());
        let manager = SessionManager::new(
            services,
            Arc::new(SectionRegistry::standard()),
            templates,
            BackupPolicy::default(),
        );
        Fixture {
            store,
            cache,
            manager,
            _dir: dir,
        }
    }

    fn mario() -> MemberRecord {
        serde_json::from_value(json!({
            "id": "m1",
            "nome": "Mario",
            "cognome": "Rossi",
            "sectionData": { "medical": { "allergie": "none" } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_member_is_fatal() {
        let f = fixture().await;
        assert!(matches!(
            f.manager.open("ghost").await,
            Err(AppError::NotFound(_))
        ));
        assert!(f.manager.get("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_store_without_cache_is_fatal() {
        let f = fixture().await;
        f.store.put(mario());
        f.store.set_offline(true);
        assert!(matches!(
            f.manager.open("m1").await,
            Err(AppError::RetryExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_uses_cached_copy() {
        let f = fixture().await;
        f.cache.store(&mario()).await;
        f.store.set_offline(true);

        let session = f.manager.open("m1").await.unwrap();
        let state = session.state().await;
        assert_eq!(state.phase, SyncPhase::Degraded);
        assert!(state.from_cache);
        assert_eq!(state.record.unwrap().name, "Mario");
    }

    #[tokio::test]
    async fn test_show_section_sets_active_and_populates() {
        let f = fixture().await;
        f.store.put(mario());
        let session = f.manager.open("m1").await.unwrap();

        let view = session.show_section(Section::Medical, true).await.unwrap();
        assert!(view.editable);
        assert_eq!(
            view.template.as_deref(),
            Some("<section id=\"sanitarie\"></section>")
        );
        let farmaci = view.fields.iter().find(|f| f.id == "farmaci").unwrap();
        assert_eq!(farmaci.display, PLACEHOLDER);
        assert_eq!(session.state().await.active_section, Some(Section::Medical));
    }

    #[tokio::test]
    async fn test_live_update_repaints_active_section() {
        let f = fixture().await;
        f.store.put(mario());
        let session = f.manager.open("m1").await.unwrap();
        session.show_section(Section::Medical, false).await.unwrap();

        let mut changed = mario();
        changed.set_field(
            Section::Medical,
            crate::models::FieldKey::flat("allergie"),
            "pollen".to_string(),
        );
        f.store.put(changed);

        for _ in 0..100 {
            let painted = session
                .latest_view()
                .and_then(|v| v.fields.into_iter().find(|f| f.id == "allergie"))
                .map(|f| f.display);
            if painted.as_deref() == Some("pollen") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("active section was not repainted");
    }

    #[tokio::test]
    async fn test_close_removes_session() {
        let f = fixture().await;
        f.store.put(mario());
        let session = f.manager.open("m1").await.unwrap();
        assert!(f.manager.get("m1").await.is_ok());

        f.manager.close("m1").await.unwrap();
        assert_eq!(session.state().await.phase, SyncPhase::Closed);
        assert!(matches!(f.manager.get("m1").await, Err(AppError::NotFound(_))));
        assert!(matches!(f.manager.close("m1").await, Err(AppError::NotFound(_))));
    }
}
