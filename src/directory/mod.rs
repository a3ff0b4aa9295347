//! Member directory for the staff dashboard.
//!
//! The list is refreshed from the remote store at most once per refresh
//! interval; in between, searches filter the last fetched list. Searches
//! can be debounced per caller so a burst of keystrokes yields one result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::{MemberRecord, MemberSummary};
use crate::pacing::{Debounce, Throttle};
use crate::remote::RemoteRecordStore;
use crate::retry::RetryPolicy;

pub struct MemberDirectory {
    remote: Arc<dyn RemoteRecordStore>,
    retry: RetryPolicy,
    refresh: Throttle,
    debounce: Debounce,
    members: RwLock<Option<Vec<MemberSummary>>>,
}

impl MemberDirectory {
    pub fn new(remote: Arc<dyn RemoteRecordStore>, retry: RetryPolicy, refresh_every: Duration) -> Self {
        Self {
            remote,
            retry,
            refresh: Throttle::new(refresh_every),
            debounce: Debounce::new(),
            members: RwLock::new(None),
        }
    }

    /// Members matching `query` (case-insensitive on name, surname and
    /// email), ordered by surname then name.
    pub async fn search(&self, query: Option<&str>) -> Result<Vec<MemberSummary>, AppError> {
        if self.refresh.try_pass() {
            if let Err(e) = self.reload().await {
                if self.members.read().await.is_none() {
                    self.refresh.reset();
                    return Err(e);
                }
                tracing::warn!("Directory refresh failed, serving previous list: {}", e);
            }
        }

        let members = self.members.read().await;
        let all = members.as_deref().unwrap_or_default();
        let needle = query.map(|q| q.trim().to_lowercase()).unwrap_or_default();

        Ok(all
            .iter()
            .filter(|m| {
                needle.is_empty()
                    || m.full_name.to_lowercase().contains(&needle)
                    || m.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    /// [`search`](Self::search) after `delay` of quiet from `caller`.
    /// `None` when a later search by the same caller superseded this one.
    pub async fn search_debounced(
        &self,
        caller: &str,
        query: Option<&str>,
        delay: Duration,
    ) -> Result<Option<Vec<MemberSummary>>, AppError> {
        if !delay.is_zero() && !self.debounce.settle(caller, delay).await {
            tracing::debug!(caller, "Search superseded by a later one");
            return Ok(None);
        }
        self.search(query).await.map(Some)
    }

    async fn reload(&self) -> Result<(), AppError> {
        let remote = Arc::clone(&self.remote);
        let mut records = self
            .retry
            .execute("list members", || remote.list_records())
            .await?;
        records.sort_by(|a: &MemberRecord, b: &MemberRecord| {
            (a.surname.to_lowercase(), a.name.to_lowercase())
                .cmp(&(b.surname.to_lowercase(), b.name.to_lowercase()))
        });
        let summaries = records.iter().map(MemberSummary::from).collect();
        *self.members.write().await = Some(summaries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRecordStore;
    use serde_json::json;

    fn record(id: &str, nome: &str, cognome: &str, email: &str) -> MemberRecord {
        serde_json::from_value(json!({
            "id": id, "nome": nome, "cognome": cognome, "email": email, "approvato": true
        }))
        .unwrap()
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_sorted_and_filtered() {
        let store = Arc::new(MemoryRecordStore::new());
        store.put(record("a", "Mario", "Rossi", "mario@example.com"));
        store.put(record("b", "Anna", "Bianchi", "anna@example.com"));
        store.put(record("c", "Luca", "Rossi", "luca@scout.it"));
        let directory = MemberDirectory::new(store, no_retry(), Duration::ZERO);

        let all = directory.search(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let rossi = directory.search(Some("ROSSI")).await.unwrap();
        assert_eq!(rossi.len(), 2);
        let scout = directory.search(Some("scout.it")).await.unwrap();
        assert_eq!(scout[0].id, "c");
    }

    #[tokio::test]
    async fn test_refresh_is_throttled() {
        let store = Arc::new(MemoryRecordStore::new());
        store.put(record("a", "Mario", "Rossi", "mario@example.com"));
        let directory = MemberDirectory::new(store.clone(), no_retry(), Duration::from_secs(60));

        assert_eq!(directory.search(None).await.unwrap().len(), 1);
        store.put(record("b", "Anna", "Bianchi", "anna@example.com"));
        assert_eq!(directory.search(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_load_failure_is_an_error_and_retried_next_time() {
        let store = Arc::new(MemoryRecordStore::new());
        store.put(record("a", "Mario", "Rossi", "mario@example.com"));
        let directory = MemberDirectory::new(store.clone(), no_retry(), Duration::from_secs(60));

        store.set_offline(true);
        assert!(directory.search(None).await.is_err());
        store.set_offline(false);
        assert_eq!(directory.search(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_burst_answers_last_query_only() {
        let store = Arc::new(MemoryRecordStore::new());
        store.put(record("a", "Mario", "Rossi", "mario@example.com"));
        store.put(record("b", "Anna", "Bianchi", "anna@example.com"));
        let directory = Arc::new(MemberDirectory::new(store, no_retry(), Duration::ZERO));

        let mut searches = Vec::new();
        for query in ["b", "bi", "bia"] {
            let directory = Arc::clone(&directory);
            searches.push(tokio::spawn(async move {
                directory
                    .search_debounced("capo", Some(query), Duration::from_millis(40))
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut results = Vec::new();
        for search in searches {
            results.push(search.await.unwrap().unwrap());
        }
        assert!(results[0].is_none());
        assert!(results[1].is_none());
        let last = results[2].as_ref().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, "b");
    }

    #[tokio::test]
    async fn test_zero_delay_searches_immediately() {
        let store = Arc::new(MemoryRecordStore::new());
        store.put(record("a", "Mario", "Rossi", "mario@example.com"));
        let directory = MemberDirectory::new(store, no_retry(), Duration::ZERO);

        let found = directory
            .search_debounced("capo", None, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(found.unwrap().len(), 1);
    }
}
