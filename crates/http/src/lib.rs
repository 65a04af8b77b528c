//! HTTP implementation of the Tandem client API façade.
//!
//! Thin binding over the REST endpoints; timeouts belong to the
//! caller-supplied `reqwest::Client`, none are enforced here.

#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use tandem_api::{ApiError, ApiResult, ClientApi, JoinRequest, SessionProvider, SignedUrl, SwipeAction};
use tandem_core::CandidateId;

/// Optional error body shape: `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

pub struct HttpApi {
    base: String,
    http: reqwest::Client,
    session: Arc<dyn SessionProvider>,
}

impl HttpApi {
    pub fn new(base: impl Into<String>, session: Arc<dyn SessionProvider>) -> Self {
        Self::with_client(base, reqwest::Client::new(), session)
    }

    pub fn with_client(
        base: impl Into<String>,
        http: reqwest::Client,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { base, http, session }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn bearer(&self) -> ApiResult<String> {
        self.session.bearer().ok_or(ApiError::Unauthorized)
    }

    async fn rejection(res: reqwest::Response, fallback: &str) -> ApiError {
        let status = res.status();
        let detail = res
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.detail)
            .unwrap_or_else(|| fallback.to_string());
        debug!(%status, "request rejected: {detail}");
        ApiError::Rejected(detail)
    }
}

#[async_trait::async_trait]
impl ClientApi for HttpApi {
    async fn sign_url(&self, key: &str) -> ApiResult<SignedUrl> {
        let token = self.bearer()?;
        let res = self
            .http
            .get(self.url(&format!("storage/signed/{key}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !res.status().is_success() {
            return Err(Self::rejection(res, "signing failed").await);
        }
        res.json::<SignedUrl>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn join(&self, candidate: CandidateId, req: &JoinRequest) -> ApiResult<()> {
        let token = self.bearer()?;
        let res = self
            .http
            .post(self.url(&format!("groups/{candidate}/join")))
            .bearer_auth(token)
            .json(req)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !res.status().is_success() {
            return Err(Self::rejection(res, "Unable to join this group.").await);
        }
        Ok(())
    }

    async fn record_swipe(&self, candidate: CandidateId, action: SwipeAction) -> ApiResult<()> {
        let token = self.bearer()?;
        let res = self
            .http
            .post(self.url(&format!("groups/{candidate}/swipe")))
            .bearer_auth(token)
            .json(&serde_json::json!({ "action": action }))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !res.status().is_success() {
            return Err(Self::rejection(res, "swipe not recorded").await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_api::StaticSession;

    #[test]
    fn url_joining_normalizes_slashes() {
        let api = HttpApi::new("https://api.example.com/v1/", StaticSession::signed_in());
        assert_eq!(
            api.url("/storage/signed/photo123"),
            "https://api.example.com/v1/storage/signed/photo123"
        );
        assert_eq!(api.url("groups/7/join"), "https://api.example.com/v1/groups/7/join");
    }

    #[test]
    fn error_body_detail_is_optional() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail":"Group not found"}"#).unwrap();
        assert_eq!(body.detail.as_deref(), Some("Group not found"));
        let body: ErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.detail.is_none());
    }
}
