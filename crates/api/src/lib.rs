//! Tandem client API façade (in-process).
//!
//! This crate defines the traits and wire types the deck and media
//! layers depend on. Implementations can be remote HTTP (`tandem_http`)
//! or in-process mocks for tests.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use tandem_core::{CandidateId, RequestTier};

/// Response of the signing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedUrl {
    pub signed_url: String,
    /// Server-side validity window, in seconds.
    pub expires_in: u64,
}

/// Payload of the join/accept endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRequest {
    pub consent_flags: serde_json::Value,
    pub request_tier: RequestTier,
}

impl JoinRequest {
    pub fn with_tier(request_tier: RequestTier) -> Self {
        Self { consent_flags: serde_json::json!({}), request_tier }
    }
}

/// Best-effort swipe record payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    Like,
    Pass,
}

/// API errors suitable for transport; `Rejected` carries the server's
/// human-readable detail string for status display.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Rejected(String),
    #[error("network: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Supplies the current bearer credential. Absence means "not signed
/// in": media resolution returns pending and accepts are refused with a
/// status message, never a fault.
pub trait SessionProvider: Send + Sync {
    fn bearer(&self) -> Option<String>;
}

/// Fixed-token session for tests and simple embedders.
pub struct StaticSession(pub Option<String>);

impl StaticSession {
    pub fn signed_in() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self(Some("test-token".into())))
    }

    pub fn signed_out() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self(None))
    }
}

impl SessionProvider for StaticSession {
    fn bearer(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Remote endpoints the deck and media layers call. The candidate feed
/// itself is supplied by the caller at session start and is not part of
/// this surface.
#[async_trait::async_trait]
pub trait ClientApi: Send + Sync {
    /// Exchange a storage key for a short-lived signed URL. Any non-2xx
    /// or malformed body is a failure.
    async fn sign_url(&self, key: &str) -> ApiResult<SignedUrl>;

    /// Accept a candidate (join/like/send). Failure carries an optional
    /// human-readable detail.
    async fn join(&self, candidate: CandidateId, req: &JoinRequest) -> ApiResult<()>;

    /// Fire-and-forget swipe record; callers swallow failures.
    async fn record_swipe(&self, candidate: CandidateId, action: SwipeAction) -> ApiResult<()>;
}

// ----------------- Mock implementation -----------------

/// Scriptable in-memory implementation for tests. Call counters let
/// tests assert exactly how many round-trips happened.
#[derive(Default)]
pub struct MockApi {
    pub signed: std::sync::Mutex<std::collections::HashMap<String, ApiResult<SignedUrl>>>,
    /// When set, `join` fails with this detail.
    pub join_error: std::sync::Mutex<Option<String>>,
    pub swipe_fails: std::sync::atomic::AtomicBool,
    pub sign_calls: std::sync::atomic::AtomicUsize,
    pub join_calls: std::sync::atomic::AtomicUsize,
    pub swipe_calls: std::sync::atomic::AtomicUsize,
}

impl MockApi {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn script_signed(&self, key: &str, url: &str, expires_in: u64) {
        self.signed.lock().unwrap().insert(
            key.to_string(),
            Ok(SignedUrl { signed_url: url.to_string(), expires_in }),
        );
    }

    pub fn script_sign_failure(&self, key: &str) {
        self.signed
            .lock()
            .unwrap()
            .insert(key.to_string(), Err(ApiError::Network("connection reset".into())));
    }

    pub fn fail_joins(&self, detail: &str) {
        *self.join_error.lock().unwrap() = Some(detail.to_string());
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn join_calls(&self) -> usize {
        self.join_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn swipe_calls(&self) -> usize {
        self.swipe_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClientApi for MockApi {
    async fn sign_url(&self, key: &str) -> ApiResult<SignedUrl> {
        self.sign_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.signed.lock().unwrap().get(key) {
            Some(res) => res.clone(),
            None => Err(ApiError::Rejected(format!("no such object: {key}"))),
        }
    }

    async fn join(&self, _candidate: CandidateId, _req: &JoinRequest) -> ApiResult<()> {
        self.join_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.join_error.lock().unwrap().clone() {
            Some(detail) => Err(ApiError::Rejected(detail)),
            None => Ok(()),
        }
    }

    async fn record_swipe(&self, _candidate: CandidateId, _action: SwipeAction) -> ApiResult<()> {
        self.swipe_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.swipe_fails.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ApiError::Network("swipe record dropped".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_wire_shape() {
        let req = JoinRequest::with_tier(RequestTier::Superlike);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["request_tier"], "superlike");
        assert!(v["consent_flags"].as_object().unwrap().is_empty());
    }

    #[test]
    fn swipe_action_wire_shape() {
        assert_eq!(serde_json::to_string(&SwipeAction::Pass).unwrap(), "\"pass\"");
        assert_eq!(serde_json::to_string(&SwipeAction::Like).unwrap(), "\"like\"");
    }

    #[tokio::test]
    async fn mock_counts_round_trips() {
        let api = MockApi::new();
        api.script_signed("photo123", "https://cdn.example/p123", 300);
        let s = api.sign_url("photo123").await.unwrap();
        assert_eq!(s.expires_in, 300);
        assert!(api.sign_url("missing").await.is_err());
        assert_eq!(api.sign_calls(), 2);
    }
}
