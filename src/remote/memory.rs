//! In-process record store used by tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{apply_partial_update, PartialUpdate, RemoteRecordStore, Subscription, UnsubscribeHandle};
use crate::errors::AppError;
use crate::models::MemberRecord;

#[derive(Debug, Clone)]
enum Push {
    Snapshot(MemberRecord),
    Dropped(String),
}

/// A document store held in memory, with knobs to simulate outages.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, MemberRecord>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Push>>>,
    updates: Mutex<Vec<(String, PartialUpdate)>>,
    offline: AtomicBool,
    failing_calls: AtomicU32,
    subscribe_calls: AtomicU32,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and push it to subscribers.
    pub fn put(&self, record: MemberRecord) {
        lock(&self.records).insert(record.id.clone(), record.clone());
        self.publish(&record.id, Push::Snapshot(record.clone()));
    }

    /// Current document, bypassing outage simulation.
    pub fn peek(&self, id: &str) -> Option<MemberRecord> {
        lock(&self.records).get(id).cloned()
    }

    /// Every partial update received so far.
    pub fn update_calls(&self) -> Vec<(String, PartialUpdate)> {
        lock(&self.updates).clone()
    }

    /// Number of subscriptions opened so far.
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// While offline every call fails with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failing_calls.store(n, Ordering::SeqCst);
    }

    /// Break every live subscription on `id` with a transport error.
    pub fn drop_subscribers(&self, id: &str, reason: &str) {
        self.publish(id, Push::Dropped(reason.to_string()));
    }

    fn publish(&self, id: &str, push: Push) {
        if let Some(sender) = lock(&self.channels).get(id) {
            // No receivers is fine.
            let _ = sender.send(push);
        }
    }

    fn check_online(&self, operation: &str) -> Result<(), AppError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Transient(format!("{}: store unreachable", operation)));
        }
        let consumed = self
            .failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(AppError::Transient(format!("{}: simulated failure", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteRecordStore for MemoryRecordStore {
    async fn get_record(&self, id: &str) -> Result<Option<MemberRecord>, AppError> {
        self.check_online("get_record")?;
        Ok(self.peek(id))
    }

    async fn list_records(&self) -> Result<Vec<MemberRecord>, AppError> {
        self.check_online("list_records")?;
        Ok(lock(&self.records).values().cloned().collect())
    }

    async fn update_fields(&self, id: &str, update: &PartialUpdate) -> Result<(), AppError> {
        self.check_online("update_fields")?;
        lock(&self.updates).push((id.to_string(), update.clone()));

        let updated = {
            let mut records = lock(&self.records);
            let current = records
                .get(id)
                .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;
            let mut doc = serde_json::to_value(current)?;
            apply_partial_update(&mut doc, update);
            let mut record: MemberRecord = serde_json::from_value(doc)?;
            record.id = id.to_string();
            records.insert(id.to_string(), record.clone());
            record
        };

        self.publish(id, Push::Snapshot(updated));
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription, AppError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online("subscribe")?;

        let initial = self
            .peek(id)
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;

        let mut pushes = lock(&self.channels)
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe();

        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                match pushes.recv().await {
                    Ok(Push::Snapshot(record)) => {
                        if tx.send(Ok(record)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Push::Dropped(reason)) => {
                        let _ = tx.send(Err(AppError::Transient(reason))).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber lagged, skipped {} snapshots", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Subscription {
            snapshots: rx,
            handle: UnsubscribeHandle::new(task.abort_handle()),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
