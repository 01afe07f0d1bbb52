//! Game interaction service: the surface screens and contexts call
//!
//! ## Table of Contents
//! - **StorageTarget / InteractionOutcome**: Success-shaped write results
//! - **GameService**: Write operations with offline fallback, reads,
//!   guest-mode toggle, and queue introspection
//!
//! One fallback contract for every write: in guest mode the local ledger
//! is the source of truth and the API call is best-effort, so guest
//! writes never fail visibly. Authenticated writes go API-first; a
//! transient failure parks the write in the offline queue, a permanent
//! one surfaces to the caller.

use crate::client::{ApiClient, RequestOptions};
use crate::error::{ErrorKind, Result};
use crate::interactions::{GameTally, LocalInteractionStore, MergeReport};
use crate::queue::{DrainReport, OfflineQueue, Priority, QueueItem, QueueItemStatus, QueueStatistics};
use crate::transport::Method;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a write operation ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTarget {
    /// The backend accepted the write
    Remote,
    /// The local ledger holds it (guest fallback)
    Local,
    /// The offline queue holds it for replay
    Queued,
}

/// Success-shaped result of a write operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionOutcome {
    /// Always true when an outcome is returned
    pub success: bool,
    /// Where the write landed
    pub stored: StorageTarget,
    /// Per-game local aggregate after the write
    pub tally: GameTally,
}

impl InteractionOutcome {
    fn new(stored: StorageTarget, tally: GameTally) -> Self {
        Self {
            success: true,
            stored,
            tally,
        }
    }
}

/// The interaction API exposed to screens and contexts.
///
/// Built once at process start and injected wherever it is needed; there
/// are no hidden singletons behind it.
pub struct GameService {
    client: Arc<ApiClient>,
    local: LocalInteractionStore,
    queue: OfflineQueue,
}

impl GameService {
    /// Assemble the service from its parts
    pub fn new(client: Arc<ApiClient>, local: LocalInteractionStore, queue: OfflineQueue) -> Self {
        Self {
            client,
            local,
            queue,
        }
    }

    /// The underlying request pipeline, for read paths and custom calls
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Toggle guest mode
    pub fn set_guest_mode(&self, enabled: bool) {
        self.client.credentials().set_guest_mode(enabled);
    }

    /// Whether guest mode is on
    pub fn is_in_guest_mode(&self) -> bool {
        self.client.credentials().is_guest_mode()
    }

    /// Like a game
    pub async fn like_game(&self, game_id: &str) -> Result<InteractionOutcome> {
        let endpoint = format!("games/{}/likes", game_id);
        if self.is_in_guest_mode() {
            let tally = self.local.add_like(game_id).await?;
            return self.guest_best_effort(&endpoint, Method::Post, None, tally).await;
        }
        let tally = self.local.tally(game_id).await?;
        self.authenticated_write(&endpoint, Method::Post, None, Priority::Normal, tally)
            .await
    }

    /// Remove a like
    pub async fn unlike_game(&self, game_id: &str) -> Result<InteractionOutcome> {
        let endpoint = format!("games/{}/likes", game_id);
        if self.is_in_guest_mode() {
            let tally = self.local.remove_like(game_id).await?;
            return self
                .guest_best_effort(&endpoint, Method::Delete, None, tally)
                .await;
        }
        let tally = self.local.tally(game_id).await?;
        self.authenticated_write(&endpoint, Method::Delete, None, Priority::Normal, tally)
            .await
    }

    /// Bookmark a game
    pub async fn bookmark_game(&self, game_id: &str) -> Result<InteractionOutcome> {
        let endpoint = format!("games/{}/bookmarks", game_id);
        if self.is_in_guest_mode() {
            let tally = self.local.add_bookmark(game_id).await?;
            return self.guest_best_effort(&endpoint, Method::Post, None, tally).await;
        }
        let tally = self.local.tally(game_id).await?;
        self.authenticated_write(&endpoint, Method::Post, None, Priority::Normal, tally)
            .await
    }

    /// Remove a bookmark
    pub async fn unbookmark_game(&self, game_id: &str) -> Result<InteractionOutcome> {
        let endpoint = format!("games/{}/bookmarks", game_id);
        if self.is_in_guest_mode() {
            let tally = self.local.remove_bookmark(game_id).await?;
            return self
                .guest_best_effort(&endpoint, Method::Delete, None, tally)
                .await;
        }
        let tally = self.local.tally(game_id).await?;
        self.authenticated_write(&endpoint, Method::Delete, None, Priority::Normal, tally)
            .await
    }

    /// Rate a game; the latest rating wins
    pub async fn rate_game(&self, game_id: &str, rating: u8) -> Result<InteractionOutcome> {
        let endpoint = format!("games/{}/ratings", game_id);
        let body = json!({ "rating": rating });
        if self.is_in_guest_mode() {
            let tally = self.local.set_rating(game_id, rating).await?;
            return self
                .guest_best_effort(&endpoint, Method::Post, Some(body), tally)
                .await;
        }
        let tally = self.local.tally(game_id).await?;
        self.authenticated_write(&endpoint, Method::Post, Some(body), Priority::Normal, tally)
            .await
    }

    /// Record a play session
    pub async fn play_game(&self, game_id: &str, duration_secs: u64) -> Result<InteractionOutcome> {
        let endpoint = format!("games/{}/plays", game_id);
        let body = json!({ "duration": duration_secs });
        if self.is_in_guest_mode() {
            let tally = self.local.record_play_session(game_id, duration_secs).await?;
            return self
                .guest_best_effort(&endpoint, Method::Post, Some(body), tally)
                .await;
        }
        let tally = self.local.tally(game_id).await?;
        self.authenticated_write(&endpoint, Method::Post, Some(body), Priority::Low, tally)
            .await
    }

    /// Fetch a game document. Read errors propagate; fallback rendering
    /// is the caller's concern.
    pub async fn get_game(&self, game_id: &str) -> Result<serde_json::Value> {
        self.client.get(&format!("games/{}", game_id)).await
    }

    /// Merge local guest records into a signed-in account
    pub async fn merge_guest_data(&self, user_id: &str) -> Result<MergeReport> {
        self.local.merge_to_account(user_id, &self.client).await
    }

    /// Status of one queued write
    pub async fn queue_status(&self, id: &str) -> Result<Option<QueueItemStatus>> {
        self.queue.status(id).await
    }

    /// Aggregate queue statistics
    pub async fn queue_statistics(&self) -> Result<QueueStatistics> {
        self.queue.statistics().await
    }

    /// Replay every queued write through the pipeline
    pub async fn replay_pending(&self) -> Result<DrainReport> {
        let client = self.client.clone();
        self.queue
            .drain(move |item: QueueItem| {
                let client = client.clone();
                async move {
                    let options = RequestOptions {
                        method: Some(item.method),
                        body: item.body,
                        headers: item.headers,
                        ..RequestOptions::default()
                    };
                    client
                        .request::<serde_json::Value>(&item.endpoint, options)
                        .await
                }
            })
            .await
    }

    /// Best-effort API call on top of an already-persisted local write.
    /// Never fails: the local ledger already holds the interaction.
    async fn guest_best_effort(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
        tally: GameTally,
    ) -> Result<InteractionOutcome> {
        let options = RequestOptions {
            method: Some(method),
            body,
            ..RequestOptions::default()
        };
        match self.client.request::<serde_json::Value>(endpoint, options).await {
            Ok(_) => Ok(InteractionOutcome::new(StorageTarget::Remote, tally)),
            Err(err) => {
                debug!(
                    endpoint = %endpoint,
                    kind = %err.kind,
                    "Guest write stays local after API failure"
                );
                Ok(InteractionOutcome::new(StorageTarget::Local, tally))
            }
        }
    }

    /// API-first write for signed-in users. Transient failures park the
    /// write in the offline queue; permanent ones surface.
    async fn authenticated_write(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
        priority: Priority,
        tally: GameTally,
    ) -> Result<InteractionOutcome> {
        let options = RequestOptions {
            method: Some(method),
            body: body.clone(),
            ..RequestOptions::default()
        };
        match self.client.request::<serde_json::Value>(endpoint, options).await {
            Ok(_) => Ok(InteractionOutcome::new(StorageTarget::Remote, tally)),
            // CIRCUIT_OPEN is transient for the system, same as SERVER.
            Err(err) if err.is_retryable() || err.kind == ErrorKind::CircuitOpen => {
                let mut item = QueueItem::new(method, endpoint).with_priority(priority);
                if let Some(body) = body {
                    item = item.with_body(body);
                }
                let id = self.queue.enqueue(item).await?;
                info!(endpoint = %endpoint, id = %id, "Write queued for replay");
                Ok(InteractionOutcome::new(StorageTarget::Queued, tally))
            }
            Err(err) => Err(err),
        }
    }
}
