//! Remote record store port.
//!
//! The hosted document database is an opaque dependency: point reads,
//! partial updates addressed by dotted path, and a change subscription that
//! pushes the whole document.

mod http;
mod memory;

pub use http::*;
pub use memory::*;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::errors::AppError;
use crate::models::MemberRecord;

/// Dotted-path keys (`sectionData.medical.allergie`) to new values.
pub type PartialUpdate = BTreeMap<String, serde_json::Value>;

/// One item pushed by a live subscription.
pub type SnapshotResult = Result<MemberRecord, AppError>;

/// Revokes a live subscription; dropping it has the same effect.
#[derive(Debug)]
pub struct UnsubscribeHandle {
    abort: Option<AbortHandle>,
}

impl UnsubscribeHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

impl Drop for UnsubscribeHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Snapshots of one document in arrival order. The stream ends after a
/// transport error.
pub struct Subscription {
    pub snapshots: mpsc::Receiver<SnapshotResult>,
    pub handle: UnsubscribeHandle,
}

/// Operations the sync layer needs from the hosted database.
#[async_trait]
pub trait RemoteRecordStore: Send + Sync {
    /// Point read; `None` when no document has this id.
    async fn get_record(&self, id: &str) -> Result<Option<MemberRecord>, AppError>;

    /// Every member document, for the directory listing.
    async fn list_records(&self) -> Result<Vec<MemberRecord>, AppError>;

    /// Set the given paths without overwriting sibling data.
    async fn update_fields(&self, id: &str, update: &PartialUpdate) -> Result<(), AppError>;

    /// Open a live subscription; the current document is pushed first.
    async fn subscribe(&self, id: &str) -> Result<Subscription, AppError>;
}

/// Set every dotted path of `update` inside `doc`, creating intermediate
/// objects and replacing non-object intermediates.
pub fn apply_partial_update(doc: &mut serde_json::Value, update: &PartialUpdate) {
    for (path, value) in update {
        let mut cursor = &mut *doc;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !cursor.is_object() {
                *cursor = serde_json::Value::Object(serde_json::Map::new());
            }
            let Some(object) = cursor.as_object_mut() else {
                break;
            };
            if segments.peek().is_none() {
                object.insert(segment.to_string(), value.clone());
                break;
            }
            cursor = object
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_update_touches_only_named_paths() {
        let mut doc = json!({
            "nome": "Mario",
            "sectionData": { "medical": { "allergie": "none", "farmaci": "no" } }
        });
        let mut update = PartialUpdate::new();
        update.insert("sectionData.medical.allergie".to_string(), json!("pollen"));
        update.insert("sectionData.contacts.genitore1.nome".to_string(), json!("Anna"));
        update.insert("lastUpdate".to_string(), json!("2026-01-01T00:00:00Z"));

        apply_partial_update(&mut doc, &update);

        assert_eq!(doc["nome"], "Mario");
        assert_eq!(doc["sectionData"]["medical"]["allergie"], "pollen");
        assert_eq!(doc["sectionData"]["medical"]["farmaci"], "no");
        assert_eq!(doc["sectionData"]["contacts"]["genitore1"]["nome"], "Anna");
        assert_eq!(doc["lastUpdate"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_partial_update_replaces_scalar_intermediate() {
        let mut doc = json!({ "sectionData": "legacy" });
        let mut update = PartialUpdate::new();
        update.insert("sectionData.medical.farmaci".to_string(), json!("none"));

        apply_partial_update(&mut doc, &update);
        assert_eq!(doc["sectionData"]["medical"]["farmaci"], "none");
    }
}
