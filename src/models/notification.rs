//! User-facing notification model.

use serde::{Deserialize, Serialize};

/// Category of a notification, mirroring the toast styles of the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Update,
    Sync,
    Cache,
}

/// A notification delivered to the views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub created_at: String,
}
