//! HTTP client for sponsor policy endpoints.
//!
//! Endpoints:
//! - POST /preflight `{request, requestHash, sponsor}` → `{approved, token | reason}`

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use gasless_types::{GaslessError, RelayRequest, Result, SponsorRejection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::SponsorPolicy;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PreflightRequest<'a> {
    request: &'a RelayRequest,
    request_hash: B256,
    sponsor: Address,
}

/// Sponsor endpoint verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightResponse {
    pub approved: bool,
    #[serde(default)]
    pub token: Option<Bytes>,
    #[serde(default)]
    pub reason: Option<SponsorRejection>,
}

/// Routes preflight checks to the endpoint registered for each sponsor.
pub struct HttpSponsorClient {
    endpoints: HashMap<Address, String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSponsorClient {
    pub fn new(timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(10_000);
        Self {
            endpoints: HashMap::new(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Register the policy endpoint for `sponsor`.
    pub fn with_endpoint(mut self, sponsor: Address, base_url: &str) -> Self {
        self.endpoints.insert(sponsor, base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn endpoint(&self, sponsor: Address) -> Option<&str> {
        self.endpoints.get(&sponsor).map(String::as_str)
    }
}

#[async_trait]
impl SponsorPolicy for HttpSponsorClient {
    async fn preflight(&self, request: &RelayRequest, request_hash: B256) -> Result<Bytes> {
        let sponsor = request.sponsor;
        let Some(base_url) = self.endpoint(sponsor) else {
            tracing::warn!(%sponsor, "no policy endpoint configured for sponsor");
            return Err(GaslessError::SponsorRejected(SponsorRejection::UnknownSponsor));
        };

        let url = format!("{}/preflight", base_url);
        let body = PreflightRequest { request, request_hash, sponsor };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GaslessError::Sponsor(format!("sponsor request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GaslessError::Sponsor(format!(
                "sponsor returned status {}: {}",
                status, body
            )));
        }

        let verdict: PreflightResponse = resp
            .json()
            .await
            .map_err(|e| GaslessError::Sponsor(format!("failed to parse sponsor response: {}", e)))?;

        if !verdict.approved {
            let reason = verdict
                .reason
                .unwrap_or_else(|| SponsorRejection::Other("no reason given".into()));
            tracing::info!(%sponsor, request_hash = %request_hash, %reason, "sponsor rejected request");
            return Err(GaslessError::SponsorRejected(reason));
        }

        let token = verdict
            .token
            .ok_or_else(|| GaslessError::Sponsor(format!("sponsor {} approved without a token", sponsor)))?;
        tracing::debug!(%sponsor, request_hash = %request_hash, "sponsor approved request");
        Ok(token)
    }
}
