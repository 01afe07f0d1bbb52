//! # Gamedeck Client
//!
//! Resilient API client core for a mobile game-discovery app: per-endpoint
//! circuit breakers, retry with exponential backoff, guest/authenticated
//! credential resolution, and offline-first storage for user interactions.
//!
//! ## Features
//!
//! - **Request Pipeline**: JSON over HTTP with every failure classified
//! - **Resilience**: Retry with backoff and jitter, per-endpoint breakers
//! - **Guest Mode**: Anonymous identity headers with a fallback that
//!   never fails
//! - **Offline Queue**: Durable replayable buffer for pending writes
//! - **Local Interactions**: Likes, bookmarks, ratings, and play sessions
//!   stored local-first for guests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gamedeck_client::GamedeckBuilder;
//!
//! #[tokio::main]
//! async fn main() -> gamedeck_client::Result<()> {
//!     let service = GamedeckBuilder::new()
//!         .with_base_url("https://api.example.com/v1")
//!         .with_guest_mode(true)
//!         .build()?;
//!
//!     let outcome = service.like_game("evolution-runner-001").await?;
//!     println!("stored: {:?}", outcome.stored);
//!     Ok(())
//! }
//! ```
//!
//! Guest-mode writes never fail visibly: when the backend is unreachable
//! the interaction lands in the local ledger and the caller still gets a
//! success-shaped outcome.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod client;
pub mod credentials;
pub mod error;
pub mod interactions;
pub mod queue;
pub mod resilience;
pub mod service;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for ergonomic API
pub use builder::{ClientConfig, GamedeckBuilder};
pub use client::{ApiClient, RequestOptions};
pub use credentials::{
    AnonymousProvider, CredentialMode, CredentialProvider, CredentialResolver, GuestIdentity,
};
pub use error::{ApiError, ErrorKind, Result};
pub use interactions::{GameTally, LocalInteractionStore, MergeReport};
pub use queue::{DrainReport, OfflineQueue, Priority, QueueItem, QueueStatistics};
pub use resilience::{Backoff, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy};
pub use service::{GameService, InteractionOutcome, StorageTarget};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{HttpTransport, Method, ReqwestTransport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::GamedeckBuilder;
    pub use crate::client::{ApiClient, RequestOptions};
    pub use crate::credentials::CredentialProvider;
    pub use crate::error::{ApiError, ErrorKind, Result};
    pub use crate::service::{GameService, InteractionOutcome, StorageTarget};
    pub use crate::transport::Method;
}
