//! Durable offline queue for pending writes
//!
//! ## Table of Contents
//! - **Priority**: Replay ordering class
//! - **QueueItem**: One persisted pending request
//! - **OfflineQueue**: Enqueue, drain, and introspection
//!
//! Items are persisted before `enqueue` returns (durability over latency)
//! and replayed by priority, then enqueue order. Each item gets its own
//! uuid-suffixed key, so concurrent enqueues cannot clobber each other.

use crate::error::{ApiError, Result};
use crate::store::{keys, store_get_json, store_set_json, BoxedKeyValueStore};
use crate::transport::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Replay priority; higher replays first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Replay last
    Low,
    /// Replay in the middle (default)
    #[default]
    Normal,
    /// Replay first
    High,
}

/// One pending write request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique item id
    pub id: String,
    /// API endpoint path
    pub endpoint: String,
    /// HTTP method
    pub method: Method,
    /// JSON body
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Extra headers to attach on replay
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Replay priority
    #[serde(default)]
    pub priority: Priority,
    /// Caller metadata carried alongside the request
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
    /// Tie-breaker for items enqueued in the same instant
    #[serde(default)]
    pub seq: u64,
    /// Replay attempts so far
    #[serde(default)]
    pub attempts: u32,
}

impl QueueItem {
    /// Create a pending request
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            method,
            body: None,
            headers: HashMap::new(),
            priority: Priority::Normal,
            metadata: HashMap::new(),
            enqueued_at: Utc::now(),
            seq: 0,
            attempts: 0,
        }
    }

    /// Set the JSON body
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Introspection view of a pending item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItemStatus {
    /// Item id
    pub id: String,
    /// API endpoint path
    pub endpoint: String,
    /// Replay priority
    pub priority: Priority,
    /// Replay attempts so far
    pub attempts: u32,
    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
}

/// Aggregate queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatistics {
    /// Pending item count
    pub total: usize,
    /// Pending high-priority items
    pub high: usize,
    /// Pending normal-priority items
    pub normal: usize,
    /// Pending low-priority items
    pub low: usize,
    /// Enqueue time of the oldest pending item
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

/// Result of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items replayed successfully and removed
    pub succeeded: usize,
    /// Items that failed and remain queued
    pub failed: usize,
    /// Items dropped after exhausting their replay budget
    pub dropped: usize,
}

/// Durable queue of pending write requests
pub struct OfflineQueue {
    store: BoxedKeyValueStore,
    max_replays: u32,
    seq: AtomicU64,
    seq_seed: OnceCell<()>,
}

impl OfflineQueue {
    /// Create a queue over a storage backend
    pub fn new(store: BoxedKeyValueStore, max_replays: u32) -> Self {
        Self {
            store,
            max_replays: max_replays.max(1),
            seq: AtomicU64::new(0),
            seq_seed: OnceCell::new(),
        }
    }

    /// Next tie-break sequence number, resumed past anything already
    /// persisted so post-restart items never sort ahead of older ones.
    async fn next_seq(&self) -> Result<u64> {
        self.seq_seed
            .get_or_try_init(|| async {
                let mut next = 0;
                for key in self.store.list_prefix(&format!("{}/", keys::QUEUE)).await? {
                    if let Some(item) =
                        store_get_json::<QueueItem>(self.store.as_ref(), &key).await?
                    {
                        next = next.max(item.seq + 1);
                    }
                }
                self.seq.store(next, Ordering::SeqCst);
                Ok::<_, ApiError>(())
            })
            .await?;
        Ok(self.seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Persist an item and return its id.
    ///
    /// The storage write completes before this returns; an item that was
    /// enqueued survives a process restart.
    pub async fn enqueue(&self, mut item: QueueItem) -> Result<String> {
        item.seq = self.next_seq().await?;
        let id = item.id.clone();
        store_set_json(self.store.as_ref(), &keys::queue_item(&id), &item).await?;
        debug!(
            id = %id,
            endpoint = %item.endpoint,
            priority = ?item.priority,
            "Queued offline write"
        );
        Ok(id)
    }

    /// Load all pending items in replay order:
    /// priority descending, then enqueue time, then sequence.
    pub async fn pending(&self) -> Result<Vec<QueueItem>> {
        let item_keys = self
            .store
            .list_prefix(&format!("{}/", keys::QUEUE))
            .await?;

        let mut items = Vec::with_capacity(item_keys.len());
        for key in item_keys {
            if let Some(item) = store_get_json::<QueueItem>(self.store.as_ref(), &key).await? {
                items.push(item);
            }
        }

        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
                .then(a.seq.cmp(&b.seq))
        });
        Ok(items)
    }

    /// Replay every pending item through `replay`.
    ///
    /// Successful items are removed; failed items are re-persisted with an
    /// incremented attempt count until the replay budget is spent, then
    /// dropped with an error log.
    pub async fn drain<F, Fut>(&self, mut replay: F) -> Result<DrainReport>
    where
        F: FnMut(QueueItem) -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let items = self.pending().await?;
        let mut report = DrainReport::default();

        for mut item in items {
            let key = keys::queue_item(&item.id);
            match replay(item.clone()).await {
                Ok(_) => {
                    self.store.remove(&key).await?;
                    report.succeeded += 1;
                }
                Err(err) => {
                    item.attempts += 1;
                    if item.attempts >= self.max_replays {
                        self.store.remove(&key).await?;
                        report.dropped += 1;
                        error!(
                            id = %item.id,
                            endpoint = %item.endpoint,
                            attempts = item.attempts,
                            kind = %err.kind,
                            "Dropping queued write after exhausting replays"
                        );
                    } else {
                        store_set_json(self.store.as_ref(), &key, &item).await?;
                        report.failed += 1;
                        warn!(
                            id = %item.id,
                            endpoint = %item.endpoint,
                            attempts = item.attempts,
                            kind = %err.kind,
                            "Queued write replay failed, keeping it queued"
                        );
                    }
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            dropped = report.dropped,
            "Offline queue drained"
        );
        Ok(report)
    }

    /// Look up a pending item by id
    pub async fn status(&self, id: &str) -> Result<Option<QueueItemStatus>> {
        let item: Option<QueueItem> =
            store_get_json(self.store.as_ref(), &keys::queue_item(id)).await?;
        Ok(item.map(|item| QueueItemStatus {
            id: item.id,
            endpoint: item.endpoint,
            priority: item.priority,
            attempts: item.attempts,
            enqueued_at: item.enqueued_at,
        }))
    }

    /// Aggregate statistics over pending items
    pub async fn statistics(&self) -> Result<QueueStatistics> {
        let items = self.pending().await?;
        let mut stats = QueueStatistics {
            total: items.len(),
            ..QueueStatistics::default()
        };

        for item in &items {
            match item.priority {
                Priority::High => stats.high += 1,
                Priority::Normal => stats.normal += 1,
                Priority::Low => stats.low += 1,
            }
            let older = stats
                .oldest_enqueued_at
                .map_or(true, |oldest| item.enqueued_at < oldest);
            if older {
                stats.oldest_enqueued_at = Some(item.enqueued_at);
            }
        }
        Ok(stats)
    }

    /// Number of pending items
    pub async fn len(&self) -> Result<usize> {
        Ok(self
            .store
            .list_prefix(&format!("{}/", keys::QUEUE))
            .await?
            .len())
    }

    /// Whether the queue has no pending items
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::store::{memory_store, FileStore};
    use serde_json::json;
    use std::sync::Arc;

    fn queue() -> OfflineQueue {
        OfflineQueue::new(memory_store(), 3)
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let queue = queue();

        queue
            .enqueue(QueueItem::new(Method::Post, "games/a/likes"))
            .await
            .unwrap();
        queue
            .enqueue(
                QueueItem::new(Method::Post, "games/b/ratings").with_priority(Priority::High),
            )
            .await
            .unwrap();
        queue
            .enqueue(QueueItem::new(Method::Post, "games/c/likes"))
            .await
            .unwrap();
        queue
            .enqueue(
                QueueItem::new(Method::Post, "analytics/events").with_priority(Priority::Low),
            )
            .await
            .unwrap();

        let order: Vec<String> = queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.endpoint)
            .collect();
        assert_eq!(
            order,
            vec![
                "games/b/ratings",
                "games/a/likes",
                "games/c/likes",
                "analytics/events"
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_removes_succeeded() {
        let queue = queue();
        queue
            .enqueue(QueueItem::new(Method::Post, "games/g1/likes").with_body(json!({"on": true})))
            .await
            .unwrap();

        let report = queue.drain(|_| async { Ok(json!({"ok": true})) }).await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                succeeded: 1,
                failed: 0,
                dropped: 0
            }
        );
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_item_then_drops() {
        let queue = OfflineQueue::new(memory_store(), 2);
        let id = queue
            .enqueue(QueueItem::new(Method::Post, "games/g1/likes"))
            .await
            .unwrap();

        let report = queue
            .drain(|_| async { Err(ApiError::network("offline")) })
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(queue.status(&id).await.unwrap().unwrap().attempts, 1);

        // Second failure exhausts the budget of 2.
        let report = queue
            .drain(|_| async { Err(ApiError::network("offline")) })
            .await
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert!(queue.status(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let id = {
            let store = Arc::new(FileStore::open(&path).unwrap());
            let queue = OfflineQueue::new(store, 3);
            queue
                .enqueue(
                    QueueItem::new(Method::Post, "games/g1/ratings").with_body(json!({"rating": 5})),
                )
                .await
                .unwrap()
        };

        // Fresh store over the same file simulates a process restart.
        let store = Arc::new(FileStore::open(&path).unwrap());
        let queue = OfflineQueue::new(store, 3);
        let status = queue.status(&id).await.unwrap().unwrap();
        assert_eq!(status.endpoint, "games/g1/ratings");
    }

    #[tokio::test]
    async fn test_seq_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        {
            let store = Arc::new(FileStore::open(&path).unwrap());
            let queue = OfflineQueue::new(store, 3);
            queue
                .enqueue(QueueItem::new(Method::Post, "games/a/likes"))
                .await
                .unwrap();
            queue
                .enqueue(QueueItem::new(Method::Post, "games/b/likes"))
                .await
                .unwrap();
        }

        let store = Arc::new(FileStore::open(&path).unwrap());
        let queue = OfflineQueue::new(store, 3);
        queue
            .enqueue(QueueItem::new(Method::Post, "games/c/likes"))
            .await
            .unwrap();

        // The post-restart item continues the counter instead of
        // restarting at zero and jumping the line.
        let items = queue.pending().await.unwrap();
        let newest = items.iter().find(|i| i.endpoint == "games/c/likes").unwrap();
        let max_old = items
            .iter()
            .filter(|i| i.endpoint != "games/c/likes")
            .map(|i| i.seq)
            .max()
            .unwrap();
        assert!(newest.seq > max_old);
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_lose_nothing() {
        let queue = Arc::new(queue());

        let mut handles = Vec::new();
        for i in 0..20 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(QueueItem::new(Method::Post, format!("games/g{}/likes", i)))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_statistics() {
        let queue = queue();
        queue
            .enqueue(QueueItem::new(Method::Post, "a").with_priority(Priority::High))
            .await
            .unwrap();
        queue
            .enqueue(QueueItem::new(Method::Post, "b"))
            .await
            .unwrap();
        queue
            .enqueue(QueueItem::new(Method::Post, "c").with_priority(Priority::Low))
            .await
            .unwrap();

        let stats = queue.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.high, 1);
        assert_eq!(stats.normal, 1);
        assert_eq!(stats.low, 1);
        assert!(stats.oldest_enqueued_at.is_some());
    }
}
