//! Backup API endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::auth::Viewer;
use crate::models::BackupSnapshot;
use crate::AppState;

/// GET /api/members/:id/backups - Snapshots, most recent first.
pub async fn list_backups(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<Vec<BackupSnapshot>> {
    viewer.require_privileged()?;
    let session = state.sessions.get(&id).await?;
    success(session.list_backups().await?)
}

/// POST /api/members/:id/backups - Snapshot the current record.
pub async fn create_backup(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> ApiResult<BackupSnapshot> {
    viewer.require_privileged()?;
    let session = state.sessions.get(&id).await?;
    success(session.create_backup().await?)
}

/// POST /api/members/:id/backups/:timestamp/restore - Roll back to a snapshot.
pub async fn restore_backup(
    State(state): State<AppState>,
    viewer: Viewer,
    Path((id, timestamp)): Path<(String, i64)>,
) -> ApiResult<BackupSnapshot> {
    viewer.require_privileged()?;
    let session = state.sessions.get(&id).await?;
    success(session.restore_from_backup(timestamp).await?)
}
