//! Validated single-field saves.
//!
//! A save is validated first, then pushed to the remote store with retries.
//! Only a confirmed remote write touches the session state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::backup::BackupManager;
use crate::errors::AppError;
use crate::models::{MemberRecord, NotificationKind, Section};
use crate::remote::PartialUpdate;
use crate::retry::execute_with_retry;
use crate::sections::SectionRegistry;
use crate::sync::{SessionContext, SyncServices};

pub struct FieldEditor {
    ctx: Arc<SessionContext>,
    services: SyncServices,
    registry: Arc<SectionRegistry>,
    backups: Arc<BackupManager>,
}

impl FieldEditor {
    pub fn new(
        ctx: Arc<SessionContext>,
        services: SyncServices,
        registry: Arc<SectionRegistry>,
        backups: Arc<BackupManager>,
    ) -> Self {
        Self {
            ctx,
            services,
            registry,
            backups,
        }
    }

    /// Validate and persist one field of the session's member.
    ///
    /// On any failure the in-memory record is left as it was.
    pub async fn save_field(
        &self,
        section: Section,
        field_id: &str,
        value: &str,
    ) -> Result<MemberRecord, AppError> {
        let field = self.registry.field(section, field_id)?;
        field.validate(value)?;

        if self.ctx.state.read().await.record.is_none() {
            return Err(AppError::NotFound(format!(
                "Member {} is not loaded",
                self.ctx.member_id
            )));
        }

        let path = field.remote_path(section);
        let now = Utc::now().to_rfc3339();
        let mut update = PartialUpdate::new();
        update.insert(path.clone(), Value::String(value.to_string()));
        update.insert("lastUpdate".to_string(), Value::String(now.clone()));

        let member_id = self.ctx.member_id.clone();
        let label = format!("saveField {} {}", member_id, path);
        let remote = Arc::clone(&self.services.remote);
        let pushed = execute_with_retry(&self.services.retry, &label, || {
            remote.update_fields(&member_id, &update)
        })
        .await;
        if let Err(err) = pushed {
            tracing::error!(member_id = %member_id, field = field_id, "Save failed: {}", err);
            self.services.notifier.notify(
                "Errore",
                "Impossibile salvare i dati. Riprova.",
                NotificationKind::Error,
            );
            return Err(err);
        }

        let saved = {
            let mut state = self.ctx.state.write().await;
            let Some(record) = state.record.as_mut() else {
                return Err(AppError::NotFound(format!("Member {} is not loaded", member_id)));
            };
            record.set_field(section, field.key, value.to_string());
            record.last_update = Some(now.clone());
            let saved = record.clone();
            state.last_sync = Some(now);
            saved
        };

        tracing::info!(member_id = %member_id, path = %path, "Field saved");
        self.services.cache.store(&saved).await;
        self.services.notifier.notify(
            "Successo",
            "Dati salvati con successo",
            NotificationKind::Success,
        );

        if let Err(e) = self.backups.create_backup(&member_id).await {
            tracing::warn!(member_id = %member_id, "Post-save backup failed: {}", e);
        }
        self.ctx.request_render();

        Ok(saved)
    }
}
