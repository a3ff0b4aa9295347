//! Notification feed endpoint.

use axum::extract::State;

use super::{success, ApiResult};
use crate::models::Notification;
use crate::AppState;

/// GET /api/notifications - Recent notifications, newest first.
pub async fn list_notifications(State(state): State<AppState>) -> ApiResult<Vec<Notification>> {
    success(state.feed.recent())
}
