//! Per-session sync state and the live sync engine.
//!
//! A [`SessionContext`] is created when a member-detail session opens and
//! dropped when it closes; nothing here is process-global.

mod engine;
mod render;

pub use engine::*;
pub use render::*;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::cache::LocalCache;
use crate::models::{MemberRecord, Section};
use crate::notify::Notifier;
use crate::remote::RemoteRecordStore;
use crate::retry::RetryPolicy;

/// Where the live sync of a session currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Subscribing,
    Reconciling,
    Reconnecting,
    /// Reconnection gave up; the last cached snapshot is shown
    Degraded,
    /// Reconnection gave up and nothing was cached
    Failed,
    Closed,
}

/// What the views read: the last known record and where the session is.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub member_id: String,
    pub record: Option<MemberRecord>,
    pub last_sync: Option<String>,
    pub active_section: Option<Section>,
    pub loading: bool,
    pub last_error: Option<String>,
    pub phase: SyncPhase,
    /// The record came from the local cache rather than the remote store
    pub from_cache: bool,
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SyncServices {
    pub remote: Arc<dyn RemoteRecordStore>,
    pub cache: LocalCache,
    pub notifier: Arc<dyn Notifier>,
    pub retry: RetryPolicy,
}

/// State owned by one member-detail session.
pub struct SessionContext {
    pub member_id: String,
    pub state: RwLock<SyncState>,
    render: RenderCoalescer,
}

impl SessionContext {
    pub fn new(member_id: impl Into<String>, renderer: Arc<dyn SectionRenderer>) -> Arc<Self> {
        let member_id = member_id.into();
        Arc::new(Self {
            state: RwLock::new(SyncState {
                member_id: member_id.clone(),
                ..SyncState::default()
            }),
            member_id,
            render: RenderCoalescer::new(renderer),
        })
    }

    pub async fn snapshot(&self) -> SyncState {
        self.state.read().await.clone()
    }

    pub async fn set_phase(&self, phase: SyncPhase) {
        self.state.write().await.phase = phase;
    }

    /// Ask for a re-render of the active section on the next paint.
    /// Returns `false` when the request was merged into a render already scheduled.
    pub fn request_render(self: &Arc<Self>) -> bool {
        let ctx = Arc::clone(self);
        self.render.request(move || {
            let ctx = Arc::clone(&ctx);
            async move {
                let state = ctx.state.read().await;
                let target = match (&state.record, state.active_section) {
                    (Some(record), Some(section)) => Some((section, record.clone())),
                    _ => None,
                };
                target
            }
        })
    }

    pub fn render_count(&self) -> u64 {
        self.render.count()
    }
}
