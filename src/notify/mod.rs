//! User-facing notifications.
//!
//! Fire-and-forget: callers never wait for, or learn about, delivery.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;

use crate::models::{Notification, NotificationKind};

/// How many notifications the feed keeps.
pub const FEED_CAPACITY: usize = 50;

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, kind: NotificationKind);
}

/// Logs every notification and keeps the most recent ones for the views.
#[derive(Default)]
pub struct NotificationFeed {
    entries: Mutex<VecDeque<Notification>>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<Notification> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().rev().cloned().collect()
    }
}

impl Notifier for NotificationFeed {
    fn notify(&self, title: &str, message: &str, kind: NotificationKind) {
        match kind {
            NotificationKind::Error => tracing::error!(title, "{}", message),
            _ => tracing::info!(title, ?kind, "{}", message),
        }

        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            kind,
            created_at: Utc::now().to_rfc3339(),
        };

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == FEED_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_keeps_most_recent_first() {
        let feed = NotificationFeed::new();
        feed.notify("Sync", "first", NotificationKind::Sync);
        feed.notify("Errore", "second", NotificationKind::Error);

        let recent = feed.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[0].kind, NotificationKind::Error);
        assert_ne!(recent[0].id, recent[1].id);
    }

    #[test]
    fn test_feed_is_bounded() {
        let feed = NotificationFeed::new();
        for i in 0..(FEED_CAPACITY + 5) {
            feed.notify("Backup", &format!("n{}", i), NotificationKind::Success);
        }

        let recent = feed.recent();
        assert_eq!(recent.len(), FEED_CAPACITY);
        assert_eq!(recent[0].message, format!("n{}", FEED_CAPACITY + 4));
        assert_eq!(recent[FEED_CAPACITY - 1].message, "n5");
    }
}
