//! Live sync of one member record.
//!
//! Subscription callbacks are turned into [`SyncEvent`] messages and fed,
//! in arrival order, to [`SyncEngine::handle`]. Snapshots go through
//! [`SyncEngine::reconcile`]; transport errors trigger a retried
//! reconnect, then a fall back to the cached copy.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::{SessionContext, SyncPhase, SyncServices};
use crate::cache::{SyncMetadata, SyncSource};
use crate::errors::AppError;
use crate::models::{MemberRecord, NotificationKind};
use crate::remote::Subscription;

/// Paths whose change is worth telling the user about.
pub const SIGNIFICANT_PATHS: &[&str] = &[
    "nome",
    "cognome",
    "email",
    "staff",
    "approvato",
    "sectionData.personalInfo",
    "sectionData.contacts",
    "sectionData.medical",
    "sectionData.progression",
];

/// Input to the engine.
#[derive(Debug)]
pub enum SyncEvent {
    Snapshot(MemberRecord),
    TransportError(AppError),
}

/// Result of feeding one snapshot to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Serialized equal to the known record; nothing happened
    Unchanged,
    /// State and cache now hold the snapshot
    Applied { significant: Vec<&'static str> },
}

/// Paths from [`SIGNIFICANT_PATHS`] that differ between two records.
pub fn significant_changes(old: &MemberRecord, new: &MemberRecord) -> Vec<&'static str> {
    let (Ok(old), Ok(new)) = (serde_json::to_value(old), serde_json::to_value(new)) else {
        return Vec::new();
    };

    SIGNIFICANT_PATHS
        .iter()
        .copied()
        .filter(|path| {
            let pointer = format!("/{}", path.replace('.', "/"));
            old.pointer(&pointer) != new.pointer(&pointer)
        })
        .collect()
}

fn same_serialized(a: &MemberRecord, b: &MemberRecord) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub struct SyncEngine {
    ctx: Arc<SessionContext>,
    services: SyncServices,
}

impl SyncEngine {
    pub fn new(ctx: Arc<SessionContext>, services: SyncServices) -> Arc<Self> {
        Arc::new(Self { ctx, services })
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Open the live subscription in the background. Dropping or
    /// unsubscribing the returned handle stops all further reconciliation.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let engine = Arc::clone(self);
        SyncHandle {
            task: Some(tokio::spawn(async move { engine.run().await })),
        }
    }

    async fn run(&self) {
        self.ctx.set_phase(SyncPhase::Subscribing).await;
        loop {
            let Some(subscription) = self.connect().await else {
                return;
            };
            let Subscription {
                mut snapshots,
                handle,
            } = subscription;

            let mut failure = None;
            while let Some(item) = snapshots.recv().await {
                match item {
                    Ok(record) => {
                        self.handle(SyncEvent::Snapshot(record)).await;
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            drop(handle);

            let err = failure
                .unwrap_or_else(|| AppError::Transient("Subscription closed by remote".to_string()));
            self.handle(SyncEvent::TransportError(err)).await;
        }
    }

    /// Apply one event. Transport errors only update the state here; the
    /// reconnect itself is driven by the subscription loop.
    pub async fn handle(&self, event: SyncEvent) -> ReconcileOutcome {
        match event {
            SyncEvent::Snapshot(record) => self.reconcile(record).await,
            SyncEvent::TransportError(err) => {
                tracing::warn!(
                    member_id = %self.ctx.member_id,
                    "Live sync interrupted: {}",
                    err
                );
                let mut state = self.ctx.state.write().await;
                state.phase = SyncPhase::Reconnecting;
                state.last_error = Some(err.to_string());
                ReconcileOutcome::Unchanged
            }
        }
    }

    /// Bring state and cache in line with a pushed snapshot.
    pub async fn reconcile(&self, incoming: MemberRecord) -> ReconcileOutcome {
        let previous = {
            let mut state = self.ctx.state.write().await;
            if let Some(known) = &state.record {
                if same_serialized(known, &incoming) {
                    tracing::trace!(member_id = %self.ctx.member_id, "Snapshot unchanged");
                    return ReconcileOutcome::Unchanged;
                }
            }
            state.phase = SyncPhase::Reconciling;
            state.last_sync = Some(Utc::now().to_rfc3339());
            state.from_cache = false;
            state.last_error = None;
            state.record.replace(incoming.clone())
        };

        tracing::debug!(member_id = %self.ctx.member_id, "Reconciling pushed snapshot");

        self.services.cache.store(&incoming).await;
        self.services
            .cache
            .store(&SyncMetadata {
                member_id: self.ctx.member_id.clone(),
                last_sync: Utc::now().to_rfc3339(),
                source: SyncSource::Remote,
            })
            .await;

        let significant = previous
            .as_ref()
            .map(|old| significant_changes(old, &incoming))
            .unwrap_or_default();
        if !significant.is_empty() {
            self.services.notifier.notify(
                "Aggiornamento",
                &format!(
                    "I dati di {} sono stati aggiornati ({})",
                    incoming.full_name(),
                    significant.join(", ")
                ),
                NotificationKind::Update,
            );
        }

        self.ctx.request_render();
        self.ctx.set_phase(SyncPhase::Subscribing).await;

        ReconcileOutcome::Applied { significant }
    }

    /// Subscribe with retries; on failure fall back to the cache and return `None`.
    async fn connect(&self) -> Option<Subscription> {
        let member_id = self.ctx.member_id.clone();
        let label = format!("subscribe {}", member_id);
        let remote = Arc::clone(&self.services.remote);

        match self
            .services
            .retry
            .execute(&label, || remote.subscribe(&member_id))
            .await
        {
            Ok(subscription) => {
                let recovered = {
                    let mut state = self.ctx.state.write().await;
                    state.phase = SyncPhase::Subscribing;
                    state.last_error.take().is_some()
                };
                tracing::info!(member_id = %member_id, "Live sync connected");
                if recovered {
                    self.services.notifier.notify(
                        "Sincronizzazione",
                        "Connessione ripristinata",
                        NotificationKind::Sync,
                    );
                }
                Some(subscription)
            }
            Err(err) => {
                self.fall_back(err).await;
                None
            }
        }
    }

    async fn fall_back(&self, err: AppError) {
        let member_id = &self.ctx.member_id;
        tracing::error!(member_id = %member_id, "Live sync unavailable: {}", err);

        match self.services.cache.lookup::<MemberRecord>(member_id).await {
            Some(cached) => {
                let last_sync = self
                    .services
                    .cache
                    .lookup::<SyncMetadata>(member_id)
                    .await
                    .map(|meta| meta.last_sync)
                    .unwrap_or_else(|| Utc::now().to_rfc3339());
                self.services
                    .cache
                    .store(&SyncMetadata {
                        member_id: member_id.clone(),
                        last_sync,
                        source: SyncSource::Cache,
                    })
                    .await;
                {
                    let mut state = self.ctx.state.write().await;
                    state.record = Some(cached);
                    state.from_cache = true;
                    state.phase = SyncPhase::Degraded;
                    state.last_error = Some(err.to_string());
                }
                self.services.notifier.notify(
                    "Modalità offline",
                    "Connessione non disponibile, vengono mostrati i dati salvati in cache",
                    NotificationKind::Cache,
                );
                self.ctx.request_render();
            }
            None => {
                {
                    let mut state = self.ctx.state.write().await;
                    state.phase = SyncPhase::Failed;
                    state.last_error = Some(err.to_string());
                }
                self.services.notifier.notify(
                    "Errore di sincronizzazione",
                    "Impossibile sincronizzare i dati. Riprova più tardi.",
                    NotificationKind::Error,
                );
            }
        }
    }
}

/// Running live sync; revoking it stops the subscription.
#[derive(Debug)]
pub struct SyncHandle {
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
