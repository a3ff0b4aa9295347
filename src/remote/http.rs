//! Record store reached over HTTP.
//!
//! The service exposes `GET /records`, `GET /records/{id}` and
//! `PATCH /records/{id}`. There is no push channel, so a subscription polls
//! the document and forwards it whenever it changed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;

use super::{PartialUpdate, RemoteRecordStore, Subscription, UnsubscribeHandle};
use crate::errors::AppError;
use crate::models::MemberRecord;

/// Shortest poll period; tokio rejects a zero one.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct HttpRecordStore {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/records/{}", self.base_url, id)
    }

    async fn fetch(&self, id: &str) -> Result<Option<MemberRecord>, AppError> {
        let resp = self.client.get(self.record_url(id)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut record: MemberRecord = resp.error_for_status()?.json().await?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl RemoteRecordStore for HttpRecordStore {
    async fn get_record(&self, id: &str) -> Result<Option<MemberRecord>, AppError> {
        self.fetch(id).await
    }

    async fn list_records(&self) -> Result<Vec<MemberRecord>, AppError> {
        let resp = self
            .client
            .get(format!("{}/records", self.base_url))
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    async fn update_fields(&self, id: &str, update: &PartialUpdate) -> Result<(), AppError> {
        let resp = self
            .client
            .patch(self.record_url(id))
            .json(update)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Member {} not found", id)));
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription, AppError> {
        let initial = self
            .fetch(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;

        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let id = id.to_string();

        let task = tokio::spawn(async move {
            let mut last = initial.clone();
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            let mut ticker = tokio::time::interval(store.poll_interval.max(MIN_POLL_INTERVAL));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.fetch(&id).await {
                    Ok(Some(record)) if record != last => {
                        last = record.clone();
                        if tx.send(Ok(record)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        let _ = tx
                            .send(Err(AppError::NotFound(format!("Member {} was removed", id))))
                            .await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        Ok(Subscription {
            snapshots: rx,
            handle: UnsubscribeHandle::new(task.abort_handle()),
        })
    }
}
