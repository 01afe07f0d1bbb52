//! Local-first ledger of guest interactions
//!
//! ## Table of Contents
//! - **GameTally**: Per-game aggregate returned by every mutator
//! - **LocalInteractionStore**: Likes, bookmarks, ratings, play sessions
//! - **MergeReport**: Outcome of replaying local records to an account
//!
//! This is a guest's source of truth and the fallback cache when the
//! request pipeline fails. Likes and bookmarks are idempotent sets, a
//! rating overwrites, and play sessions form a bounded append-only log.

use crate::client::ApiClient;
use crate::error::Result;
use crate::store::{keys, store_get_json, store_set_json, BoxedKeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

/// A stored rating for one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    /// Rating value
    pub value: u8,
    /// When the rating was last set
    #[serde(default = "Utc::now")]
    pub rated_at: DateTime<Utc>,
}

/// One recorded play session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaySessionRecord {
    /// Game played
    pub game_id: String,
    /// Session length in seconds
    pub duration_secs: u64,
    /// When the session happened
    #[serde(default = "Utc::now")]
    pub played_at: DateTime<Utc>,
}

/// Per-game aggregate across all local record kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameTally {
    /// Whether the game is liked locally
    pub liked: bool,
    /// Whether the game is bookmarked locally
    pub bookmarked: bool,
    /// Local rating, if set
    pub rating: Option<u8>,
    /// Number of locally recorded play sessions
    pub play_sessions: usize,
}

/// Outcome of merging local records into an account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records accepted by the backend
    pub merged: usize,
    /// Records the backend rejected or that failed in transit
    pub failed: usize,
}

/// Local-first store of guest interactions
pub struct LocalInteractionStore {
    store: BoxedKeyValueStore,
    session_cap: usize,
    // Serializes read-modify-write cycles across await points.
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalInteractionStore {
    /// Create a store with a play-session log cap
    pub fn new(store: BoxedKeyValueStore, session_cap: usize) -> Self {
        Self {
            store,
            session_cap: session_cap.max(1),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load_set(&self, key: &str) -> Result<BTreeSet<String>> {
        Ok(store_get_json(self.store.as_ref(), key)
            .await?
            .unwrap_or_default())
    }

    async fn load_ratings(&self) -> Result<BTreeMap<String, RatingRecord>> {
        Ok(store_get_json(self.store.as_ref(), &keys::ratings())
            .await?
            .unwrap_or_default())
    }

    async fn load_sessions(&self) -> Result<VecDeque<PlaySessionRecord>> {
        Ok(store_get_json(self.store.as_ref(), &keys::play_sessions())
            .await?
            .unwrap_or_default())
    }

    /// Record a like. Idempotent: liking twice leaves one record.
    pub async fn add_like(&self, game_id: &str) -> Result<GameTally> {
        let _guard = self.write_lock.lock().await;
        let mut likes = self.load_set(&keys::likes()).await?;
        if likes.insert(game_id.to_string()) {
            store_set_json(self.store.as_ref(), &keys::likes(), &likes).await?;
            debug!(game_id = %game_id, "Local like recorded");
        }
        self.tally_locked(game_id).await
    }

    /// Remove a like
    pub async fn remove_like(&self, game_id: &str) -> Result<GameTally> {
        let _guard = self.write_lock.lock().await;
        let mut likes = self.load_set(&keys::likes()).await?;
        if likes.remove(game_id) {
            store_set_json(self.store.as_ref(), &keys::likes(), &likes).await?;
        }
        self.tally_locked(game_id).await
    }

    /// Record a bookmark. Idempotent.
    pub async fn add_bookmark(&self, game_id: &str) -> Result<GameTally> {
        let _guard = self.write_lock.lock().await;
        let mut bookmarks = self.load_set(&keys::bookmarks()).await?;
        if bookmarks.insert(game_id.to_string()) {
            store_set_json(self.store.as_ref(), &keys::bookmarks(), &bookmarks).await?;
            debug!(game_id = %game_id, "Local bookmark recorded");
        }
        self.tally_locked(game_id).await
    }

    /// Remove a bookmark
    pub async fn remove_bookmark(&self, game_id: &str) -> Result<GameTally> {
        let _guard = self.write_lock.lock().await;
        let mut bookmarks = self.load_set(&keys::bookmarks()).await?;
        if bookmarks.remove(game_id) {
            store_set_json(self.store.as_ref(), &keys::bookmarks(), &bookmarks).await?;
        }
        self.tally_locked(game_id).await
    }

    /// Set a rating. The latest value overwrites any previous one.
    pub async fn set_rating(&self, game_id: &str, value: u8) -> Result<GameTally> {
        let _guard = self.write_lock.lock().await;
        let mut ratings = self.load_ratings().await?;
        ratings.insert(
            game_id.to_string(),
            RatingRecord {
                value,
                rated_at: Utc::now(),
            },
        );
        store_set_json(self.store.as_ref(), &keys::ratings(), &ratings).await?;
        debug!(game_id = %game_id, value, "Local rating set");
        self.tally_locked(game_id).await
    }

    /// Append a play session, evicting the oldest past the cap
    pub async fn record_play_session(&self, game_id: &str, duration_secs: u64) -> Result<GameTally> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load_sessions().await?;
        sessions.push_back(PlaySessionRecord {
            game_id: game_id.to_string(),
            duration_secs,
            played_at: Utc::now(),
        });
        while sessions.len() > self.session_cap {
            sessions.pop_front();
        }
        store_set_json(self.store.as_ref(), &keys::play_sessions(), &sessions).await?;
        self.tally_locked(game_id).await
    }

    /// Current per-game aggregate
    pub async fn tally(&self, game_id: &str) -> Result<GameTally> {
        self.tally_locked(game_id).await
    }

    async fn tally_locked(&self, game_id: &str) -> Result<GameTally> {
        let likes = self.load_set(&keys::likes()).await?;
        let bookmarks = self.load_set(&keys::bookmarks()).await?;
        let ratings = self.load_ratings().await?;
        let sessions = self.load_sessions().await?;

        Ok(GameTally {
            liked: likes.contains(game_id),
            bookmarked: bookmarks.contains(game_id),
            rating: ratings.get(game_id).map(|r| r.value),
            play_sessions: sessions.iter().filter(|s| s.game_id == game_id).count(),
        })
    }

    /// Drop every local record
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.clear_locked().await
    }

    async fn clear_locked(&self) -> Result<()> {
        self.store.remove(&keys::likes()).await?;
        self.store.remove(&keys::bookmarks()).await?;
        self.store.remove(&keys::ratings()).await?;
        self.store.remove(&keys::play_sessions()).await?;
        Ok(())
    }

    /// Replay every local record through the API to attach it to an
    /// account. Records replay sequentially; local state is cleared only
    /// if at least one record merged.
    pub async fn merge_to_account(&self, user_id: &str, client: &ApiClient) -> Result<MergeReport> {
        let _guard = self.write_lock.lock().await;

        let likes = self.load_set(&keys::likes()).await?;
        let bookmarks = self.load_set(&keys::bookmarks()).await?;
        let ratings = self.load_ratings().await?;
        let sessions = self.load_sessions().await?;

        let mut report = MergeReport::default();

        for game_id in &likes {
            let body = serde_json::json!({ "userId": user_id });
            tally_merge(
                &mut report,
                client
                    .post::<serde_json::Value>(&format!("games/{}/likes", game_id), body)
                    .await,
            );
        }
        for game_id in &bookmarks {
            let body = serde_json::json!({ "userId": user_id });
            tally_merge(
                &mut report,
                client
                    .post::<serde_json::Value>(&format!("games/{}/bookmarks", game_id), body)
                    .await,
            );
        }
        for (game_id, rating) in &ratings {
            let body = serde_json::json!({ "userId": user_id, "rating": rating.value });
            tally_merge(
                &mut report,
                client
                    .post::<serde_json::Value>(&format!("games/{}/ratings", game_id), body)
                    .await,
            );
        }
        for session in &sessions {
            let body = serde_json::json!({
                "userId": user_id,
                "duration": session.duration_secs,
                "playedAt": session.played_at,
            });
            tally_merge(
                &mut report,
                client
                    .post::<serde_json::Value>(&format!("games/{}/plays", session.game_id), body)
                    .await,
            );
        }

        if report.merged > 0 {
            self.clear_locked().await?;
            info!(
                user_id = %user_id,
                merged = report.merged,
                failed = report.failed,
                "Merged local interactions into account"
            );
        } else if report.failed > 0 {
            warn!(
                user_id = %user_id,
                failed = report.failed,
                "No local interactions merged, keeping local records"
            );
        }
        Ok(report)
    }
}

fn tally_merge(report: &mut MergeReport, result: Result<serde_json::Value>) {
    match result {
        Ok(_) => report.merged += 1,
        Err(err) => {
            debug!(kind = %err.kind, "Merge replay failed: {}", err.message);
            report.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialResolver;
    use crate::resilience::{CircuitBreakerConfig, RetryConfig};
    use crate::store::memory_store;
    use crate::testutil::{ScriptedTransport, StaticProvider};
    use std::sync::Arc;
    use std::time::Duration;

    fn local() -> LocalInteractionStore {
        LocalInteractionStore::new(memory_store(), 100)
    }

    fn client(transport: Arc<ScriptedTransport>) -> ApiClient {
        let credentials = Arc::new(CredentialResolver::new(
            Arc::new(StaticProvider::authenticated("tok")),
            false,
        ));
        ApiClient::new(
            "https://api.example.com",
            transport,
            credentials,
            RetryConfig::default()
                .max_attempts(1)
                .attempt_timeout(Duration::from_millis(200)),
            CircuitBreakerConfig::default().failure_threshold(1000),
        )
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let store = local();

        let first = store.add_like("g1").await.unwrap();
        let second = store.add_like("g1").await.unwrap();

        assert!(first.liked);
        assert_eq!(first, second);

        // Unliking once removes the single record.
        let after = store.remove_like("g1").await.unwrap();
        assert!(!after.liked);
    }

    #[tokio::test]
    async fn test_rating_overwrites() {
        let store = local();

        store.set_rating("g1", 3).await.unwrap();
        let tally = store.set_rating("g1", 5).await.unwrap();

        assert_eq!(tally.rating, Some(5));

        let ratings: BTreeMap<String, RatingRecord> =
            store_get_json(store.store.as_ref(), &keys::ratings())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings["g1"].value, 5);
    }

    #[tokio::test]
    async fn test_play_session_log_is_capped() {
        let store = LocalInteractionStore::new(memory_store(), 3);

        for _ in 0..5 {
            store.record_play_session("g1", 60).await.unwrap();
        }
        let tally = store.tally("g1").await.unwrap();
        assert_eq!(tally.play_sessions, 3);
    }

    #[tokio::test]
    async fn test_tally_spans_record_kinds() {
        let store = local();

        store.add_like("g1").await.unwrap();
        store.add_bookmark("g1").await.unwrap();
        store.set_rating("g1", 4).await.unwrap();
        store.record_play_session("g1", 120).await.unwrap();
        store.record_play_session("g2", 30).await.unwrap();

        let tally = store.tally("g1").await.unwrap();
        assert_eq!(
            tally,
            GameTally {
                liked: true,
                bookmarked: true,
                rating: Some(4),
                play_sessions: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_merge_clears_local_on_success() {
        let store = local();
        store.add_like("g1").await.unwrap();
        store.set_rating("g1", 5).await.unwrap();

        let transport = Arc::new(ScriptedTransport::always_ok("{}"));
        let client = client(transport.clone());

        let report = store.merge_to_account("user-7", &client).await.unwrap();
        assert_eq!(report, MergeReport { merged: 2, failed: 0 });
        assert_eq!(transport.calls(), 2);

        let tally = store.tally("g1").await.unwrap();
        assert_eq!(tally, GameTally::default());
    }

    #[tokio::test]
    async fn test_merge_keeps_local_when_nothing_merged() {
        let store = local();
        store.add_like("g1").await.unwrap();

        let transport = Arc::new(ScriptedTransport::always_network_error());
        let client = client(transport);

        let report = store.merge_to_account("user-7", &client).await.unwrap();
        assert_eq!(report, MergeReport { merged: 0, failed: 1 });

        // Nothing merged, so the like is still here.
        assert!(store.tally("g1").await.unwrap().liked);
    }
}
