//! Backup snapshot models stored in the local cache.

use serde::{Deserialize, Serialize};

use super::{MemberRecord, Section};

/// Context captured alongside the record copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_section: Option<Section>,
}

/// A point-in-time copy of a member record, keyed by creation timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    /// Milliseconds since the epoch; unique across all snapshots
    pub timestamp: i64,
    pub member_id: String,
    pub data: MemberRecord,
    pub metadata: BackupMetadata,
}

/// Per-member backup bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub member_id: String,
    pub backup_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<i64>,
}
