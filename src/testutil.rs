//! Test doubles shared across module tests

use crate::credentials::{CredentialProvider, GuestIdentity};
use crate::error::{ApiError, Result};
use crate::transport::{HttpTransport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// Credential provider returning fixed answers
pub struct StaticProvider {
    pub guest: Option<GuestIdentity>,
    pub token: Option<String>,
}

impl StaticProvider {
    pub fn guest(identity_id: &str) -> Self {
        Self {
            guest: Some(GuestIdentity::new(identity_id)),
            token: None,
        }
    }

    pub fn authenticated(token: &str) -> Self {
        Self {
            guest: None,
            token: Some(token.to_string()),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn guest_identity(&self) -> Result<Option<GuestIdentity>> {
        Ok(self.guest.clone())
    }

    async fn auth_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Transport that plays back a scripted sequence of responses.
///
/// Once the script runs out, the last entry repeats, so "always failing"
/// and "fails then recovers" scenarios both script naturally.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse>>>,
    last: Mutex<Option<Result<TransportResponse>>>,
    calls: AtomicU32,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok(body: &str) -> Self {
        Self::new(vec![Ok(TransportResponse {
            status: 200,
            body: body.to_string(),
        })])
    }

    pub fn always_status(status: u16, body: &str) -> Self {
        Self::new(vec![Ok(TransportResponse {
            status,
            body: body.to_string(),
        })])
    }

    pub fn always_network_error() -> Self {
        Self::new(vec![Err(ApiError::network("connection refused"))])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);

        if let Some(next) = self.script.lock().pop_front() {
            *self.last.lock() = Some(next.clone());
            return next;
        }
        self.last
            .lock()
            .clone()
            .unwrap_or_else(|| Err(ApiError::unknown("scripted transport had no responses")))
    }
}
