//! HTTP client for a relay server.
//!
//! Endpoints:
//! - POST /relay
//! - GET /getaddr
//! - GET /txhash?requestHash=<request_hash>

use alloy::primitives::{Address, B256};
use gasless_types::{GaslessError, Result, SignedRelayEnvelope};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relayer API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerResponse<T> {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub user_message: Option<String>,
    pub data: T,
}

impl<T> RelayerResponse<T> {
    fn is_ok(&self) -> bool {
        self.code.unwrap_or(0) == 0
    }

    fn reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.user_message.clone())
            .unwrap_or_else(|| format!("code {}", self.code.unwrap_or_default()))
    }
}

/// Relayer acknowledgement of an accepted envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAck {
    pub request_hash: B256,
    pub tx_hash: B256,
}

/// Relayer readiness as reported by `/getaddr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub ready: bool,
    pub chain_id: u64,
    pub relay_worker_address: Address,
}

/// Result of a submission the relayer understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReply {
    Accepted(RelayAck),
    /// The relayer refused this envelope and will not broadcast it.
    Rejected(String),
}

/// Relay server client.
#[derive(Debug)]
pub struct RelayClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Hand a signed envelope to the relayer.
    ///
    /// POST /relay
    ///
    /// A response carrying a non-zero `code` is an affirmative rejection.
    /// Server errors and bodies that cannot be parsed are errors.
    pub async fn relay(&self, envelope: &SignedRelayEnvelope) -> Result<SubmitReply> {
        let url = format!("{}/relay", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(envelope)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GaslessError::Other(format!("relayer request failed: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GaslessError::Other(format!(
                "relayer returned status {}: {}",
                status, body
            )));
        }

        let body: RelayerResponse<Option<RelayAck>> = resp
            .json()
            .await
            .map_err(|e| GaslessError::Other(format!("failed to parse relayer response: {}", e)))?;

        if !body.is_ok() {
            return Ok(SubmitReply::Rejected(body.reason()));
        }
        match body.data {
            Some(ack) if status.is_success() => Ok(SubmitReply::Accepted(ack)),
            _ => Err(GaslessError::Other(format!(
                "relayer returned status {} without an acknowledgement",
                status
            ))),
        }
    }

    /// Readiness and chain of the relayer.
    ///
    /// GET /getaddr
    pub async fn ping(&self) -> Result<PingResponse> {
        let url = format!("{}/getaddr", self.base_url);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GaslessError::Other(format!("relayer request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(GaslessError::Other(format!(
                "relayer returned status {}",
                resp.status()
            )));
        }

        let body: RelayerResponse<PingResponse> = resp
            .json()
            .await
            .map_err(|e| GaslessError::Other(format!("failed to parse relayer response: {}", e)))?;

        Ok(body.data)
    }

    /// Current transaction hash carrying `request_hash`, which changes when
    /// the relayer replaces the transaction with a higher gas price.
    ///
    /// GET /txhash?requestHash=<request_hash>
    pub async fn get_tx_hash(&self, request_hash: B256) -> Result<Option<B256>> {
        let url = format!("{}/txhash?requestHash={}", self.base_url, request_hash);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GaslessError::Other(format!("relayer request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let body: RelayerResponse<Option<B256>> = resp
            .json()
            .await
            .map_err(|e| GaslessError::Other(format!("failed to parse relayer response: {}", e)))?;

        Ok(body.data)
    }
}
