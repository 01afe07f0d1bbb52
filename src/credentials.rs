//! Credential resolution for guest and authenticated requests
//!
//! ## Table of Contents
//! - **CredentialProvider**: Trait over the external identity backend
//! - **GuestIdentity**: Anonymous identity handle
//! - **CredentialMode**: Which identity a request carries
//! - **CredentialResolver**: Per-request header construction
//!
//! The resolver never fails: when both guest and authenticated lookup
//! break, it synthesizes a fallback guest identity so every outbound call
//! still carries *some* identity.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Header marking a request as guest traffic
pub const HEADER_GUEST_MODE: &str = "X-Guest-Mode";
/// Header carrying the guest identity id
pub const HEADER_IDENTITY_ID: &str = "X-Identity-Id";
/// Standard bearer-token header
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Anonymous identity issued by the credential backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestIdentity {
    /// Identity id for guest requests
    pub identity_id: String,
    /// Whether the backend considers this a guest identity
    #[serde(default = "default_true")]
    pub is_guest: bool,
}

fn default_true() -> bool {
    true
}

impl GuestIdentity {
    /// Create a guest identity from an id
    pub fn new(identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            is_guest: true,
        }
    }
}

/// External credential backend (Cognito or the like), treated as opaque.
///
/// Implementations may fail freely; the resolver catches everything.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current guest identity, if the backend is in guest state
    async fn guest_identity(&self) -> Result<Option<GuestIdentity>>;

    /// Current authenticated bearer token, if logged in
    async fn auth_token(&self) -> Result<Option<String>>;
}

/// Provider with no backing identity service.
///
/// Every lookup comes back empty, so the resolver lands on its
/// synthesized fallback guest identity. Useful as a default and in tests.
pub struct AnonymousProvider;

#[async_trait]
impl CredentialProvider for AnonymousProvider {
    async fn guest_identity(&self) -> Result<Option<GuestIdentity>> {
        Ok(None)
    }

    async fn auth_token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Which identity a resolved request carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialMode {
    /// Guest identity from cache or the provider
    Guest {
        /// The guest identity id
        identity_id: String,
    },
    /// Logged-in bearer token
    Authenticated {
        /// The bearer token
        token: String,
    },
    /// Synthesized identity used when every lookup failed
    FallbackGuest {
        /// The synthesized identity id
        identity_id: String,
    },
}

impl CredentialMode {
    /// Build the request headers for this mode.
    ///
    /// Exactly one of identity id / bearer token is present.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        match self {
            CredentialMode::Guest { identity_id }
            | CredentialMode::FallbackGuest { identity_id } => {
                headers.insert(HEADER_GUEST_MODE.to_string(), "true".to_string());
                headers.insert(HEADER_IDENTITY_ID.to_string(), identity_id.clone());
            }
            CredentialMode::Authenticated { token } => {
                headers.insert(
                    HEADER_AUTHORIZATION.to_string(),
                    format!("Bearer {}", token),
                );
            }
        }
        headers
    }
}

/// Resolves the identity headers attached to every outbound request
pub struct CredentialResolver {
    provider: Arc<dyn CredentialProvider>,
    guest_mode: AtomicBool,
    cached_guest: RwLock<Option<GuestIdentity>>,
}

impl CredentialResolver {
    /// Create a resolver over a credential provider
    pub fn new(provider: Arc<dyn CredentialProvider>, guest_mode: bool) -> Self {
        Self {
            provider,
            guest_mode: AtomicBool::new(guest_mode),
            cached_guest: RwLock::new(None),
        }
    }

    /// Toggle explicit guest mode
    pub fn set_guest_mode(&self, enabled: bool) {
        self.guest_mode.store(enabled, Ordering::SeqCst);
        debug!(enabled, "Guest mode toggled");
    }

    /// Whether explicit guest mode is on
    pub fn is_guest_mode(&self) -> bool {
        self.guest_mode.load(Ordering::SeqCst)
    }

    /// The guest identity cached from a previous resolution, if any
    pub fn cached_identity(&self) -> Option<GuestIdentity> {
        self.cached_guest.read().clone()
    }

    /// Decide which identity the next request carries. Never fails.
    pub async fn resolve(&self) -> CredentialMode {
        // Explicit guest mode with a cached identity wins outright.
        if self.is_guest_mode() {
            if let Some(cached) = self.cached_guest.read().clone() {
                return CredentialMode::Guest {
                    identity_id: cached.identity_id,
                };
            }
        }

        match self.provider.guest_identity().await {
            Ok(Some(identity)) if identity.is_guest => {
                *self.cached_guest.write() = Some(identity.clone());
                return CredentialMode::Guest {
                    identity_id: identity.identity_id,
                };
            }
            Ok(_) => {}
            Err(err) => {
                debug!(kind = %err.kind, "Guest identity lookup failed: {}", err.message);
            }
        }

        match self.provider.auth_token().await {
            Ok(Some(token)) => {
                return CredentialMode::Authenticated { token };
            }
            Ok(None) => {}
            Err(err) => {
                debug!(kind = %err.kind, "Auth token lookup failed: {}", err.message);
            }
        }

        let fallback = GuestIdentity::new(format!(
            "guest_fallback_{}",
            chrono::Utc::now().timestamp_millis()
        ));
        warn!(identity = %fallback.identity_id, "Credential lookup failed, using fallback guest identity");
        let identity_id = fallback.identity_id.clone();
        *self.cached_guest.write() = Some(fallback);
        CredentialMode::FallbackGuest { identity_id }
    }

    /// Resolve and build the identity headers for the next request
    pub async fn resolve_headers(&self) -> HashMap<String, String> {
        self.resolve().await.headers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    struct FakeProvider {
        guest: Result<Option<GuestIdentity>>,
        token: Result<Option<String>>,
    }

    #[async_trait]
    impl CredentialProvider for FakeProvider {
        async fn guest_identity(&self) -> Result<Option<GuestIdentity>> {
            self.guest.clone()
        }

        async fn auth_token(&self) -> Result<Option<String>> {
            self.token.clone()
        }
    }

    fn resolver(provider: FakeProvider, guest_mode: bool) -> CredentialResolver {
        CredentialResolver::new(Arc::new(provider), guest_mode)
    }

    #[tokio::test]
    async fn test_provider_guest_identity_used_and_cached() {
        let resolver = resolver(
            FakeProvider {
                guest: Ok(Some(GuestIdentity::new("guest-123"))),
                token: Ok(None),
            },
            false,
        );

        let mode = resolver.resolve().await;
        assert_eq!(
            mode,
            CredentialMode::Guest {
                identity_id: "guest-123".to_string()
            }
        );
        assert_eq!(
            resolver.cached_identity().unwrap().identity_id,
            "guest-123"
        );
    }

    #[tokio::test]
    async fn test_bearer_token_when_not_guest() {
        let resolver = resolver(
            FakeProvider {
                guest: Ok(None),
                token: Ok(Some("tok-9".to_string())),
            },
            false,
        );

        let headers = resolver.resolve_headers().await;
        assert_eq!(
            headers.get(HEADER_AUTHORIZATION),
            Some(&"Bearer tok-9".to_string())
        );
        assert!(!headers.contains_key(HEADER_IDENTITY_ID));
    }

    #[tokio::test]
    async fn test_fallback_never_fails() {
        let resolver = resolver(
            FakeProvider {
                guest: Err(ApiError::network("cognito unreachable")),
                token: Err(ApiError::network("cognito unreachable")),
            },
            false,
        );

        let headers = resolver.resolve_headers().await;
        assert_eq!(headers.get(HEADER_GUEST_MODE), Some(&"true".to_string()));
        assert!(headers
            .get(HEADER_IDENTITY_ID)
            .unwrap()
            .starts_with("guest_fallback_"));
        assert!(!headers.contains_key(HEADER_AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_fallback_identity_is_stable() {
        let resolver = resolver(
            FakeProvider {
                guest: Err(ApiError::network("down")),
                token: Err(ApiError::network("down")),
            },
            true,
        );

        let first = resolver.resolve_headers().await;
        let second = resolver.resolve_headers().await;
        assert_eq!(
            first.get(HEADER_IDENTITY_ID),
            second.get(HEADER_IDENTITY_ID)
        );
    }

    #[tokio::test]
    async fn test_explicit_guest_mode_prefers_cache() {
        let resolver = resolver(
            FakeProvider {
                guest: Ok(Some(GuestIdentity::new("from-provider"))),
                token: Ok(Some("tok".to_string())),
            },
            true,
        );

        // First resolution populates the cache from the provider.
        resolver.resolve().await;
        // Second resolution must not consult the provider again.
        let mode = resolver.resolve().await;
        assert_eq!(
            mode,
            CredentialMode::Guest {
                identity_id: "from-provider".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_exactly_one_identity_per_request() {
        for (guest, token) in [
            (Ok(Some(GuestIdentity::new("g"))), Ok(None)),
            (Ok(None), Ok(Some("t".to_string()))),
            (
                Err(ApiError::network("x")),
                Err(ApiError::network("x")),
            ),
        ] {
            let resolver = resolver(FakeProvider { guest, token }, false);
            let headers = resolver.resolve_headers().await;
            let has_identity = headers.contains_key(HEADER_IDENTITY_ID);
            let has_bearer = headers.contains_key(HEADER_AUTHORIZATION);
            assert!(has_identity ^ has_bearer);
        }
    }
}
