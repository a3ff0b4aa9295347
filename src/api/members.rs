//! Member API endpoints.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::auth::Viewer;
use crate::models::MemberSummary;
use crate::sections::SectionView;
use crate::sync::SyncState;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryQuery {
    /// Case-insensitive filter on name, surname and email.
    pub q: Option<String>,
    /// Wait this long for a newer search from the same viewer before answering.
    #[serde(default)]
    pub debounce_ms: u64,
}

/// GET /api/members - Staff dashboard listing.
///
/// With `debounceMs`, a search superseded by a later one from the same
/// viewer answers with `data: null`.
pub async fn list_members(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(params): Query<DirectoryQuery>,
) -> ApiResult<Option<Vec<MemberSummary>>> {
    viewer.require_privileged()?;
    let members = state
        .directory
        .search_debounced(
            viewer.id.as_deref().unwrap_or_default(),
            params.q.as_deref(),
            Duration::from_millis(params.debounce_ms),
        )
        .await?;
    success(members)
}

/// POST /api/members/:id/session - Open the member-detail session.
pub async fn open_session(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<SyncState> {
    viewer.require_access(&id)?;
    let session = state.sessions.open(&id).await?;
    success(session.state().await)
}

/// DELETE /api/members/:id/session - Leave the member-detail page.
pub async fn close_session(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<()> {
    viewer.require_access(&id)?;
    state.sessions.close(&id).await?;
    success(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetail {
    pub sync: SyncState,
    /// Active section as last repainted by the live sync
    pub painted: Option<SectionView>,
}

/// GET /api/members/:id - Current sync state of an open session.
pub async fn get_member(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<MemberDetail> {
    viewer.require_access(&id)?;
    let session = state.sessions.get(&id).await?;
    success(MemberDetail {
        sync: session.state().await,
        painted: session.latest_view(),
    })
}
