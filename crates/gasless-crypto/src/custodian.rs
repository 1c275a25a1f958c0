//! HTTP client for a remote key custodian.
//!
//! Endpoints:
//! - POST /sign  `{address, digest}` → `{signature}`

use alloy::primitives::{Address, Bytes, Signature, B256};
use async_trait::async_trait;
use gasless_types::{GaslessError, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::account::SigningCapability;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    address: Address,
    digest: B256,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: Bytes,
}

/// Signing capability whose key lives with an external custodian.
pub struct RemoteCustodian {
    base_url: String,
    address: Address,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteCustodian {
    pub fn new(base_url: &str, address: Address, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(10_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            address,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

impl fmt::Debug for RemoteCustodian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCustodian")
            .field("base_url", &self.base_url)
            .field("address", &self.address)
            .finish()
    }
}

#[async_trait]
impl SigningCapability for RemoteCustodian {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature> {
        let url = format!("{}/sign", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&SignRequest { address: self.address, digest: hash })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GaslessError::KeyUnavailable(format!("custodian unreachable: {}", e)))?;

        let status = resp.status();
        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE
        ) {
            return Err(GaslessError::KeyUnavailable(format!(
                "custodian refused key {}: {}",
                self.address, status
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GaslessError::KeyUnavailable(format!(
                "custodian returned status {}: {}",
                status, body
            )));
        }

        let body: SignResponse = resp
            .json()
            .await
            .map_err(|e| GaslessError::InvalidSignature(format!("failed to parse custodian response: {}", e)))?;

        let signature = Signature::from_raw(&body.signature)
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))?;
        let signer = signature
            .recover_address_from_prehash(&hash)
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))?;
        if signer != self.address {
            return Err(GaslessError::InvalidSignature(format!(
                "custodian signed with {} instead of {}",
                signer, self.address
            )));
        }

        Ok(signature)
    }
}
