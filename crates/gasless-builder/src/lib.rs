//! Relay request building.
//!
//! - Validate the caller's intent (gas limit, calldata size, time to live)
//! - Reserve the account's next relay nonce
//! - Bound the request by chain time: `validUntil = head.timestamp + ttl`

use alloy::primitives::{Address, Bytes, U256};
use gasless_chain::ChainReader;
use gasless_crypto::Account;
use gasless_nonce::{NonceReservation, NonceTracker};
use gasless_types::{GaslessError, RelayRequest, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Limits applied to every intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub max_calldata_bytes: usize,
    pub max_gas_limit: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_calldata_bytes: 32 * 1024,
            max_gas_limit: 10_000_000,
        }
    }
}

/// What the caller wants executed on its behalf.
#[derive(Debug, Clone)]
pub struct RelayIntent {
    pub account: Account,
    pub target: Address,
    pub calldata: Bytes,
    pub gas_limit: u64,
    pub sponsor_hint: Address,
    pub time_to_live: Duration,
    pub value: U256,
}

impl RelayIntent {
    pub fn new(account: Account, target: Address, calldata: Bytes) -> Self {
        Self {
            account,
            target,
            calldata,
            gas_limit: 200_000,
            sponsor_hint: Address::ZERO,
            time_to_live: Duration::from_secs(60),
            value: U256::ZERO,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_sponsor(mut self, sponsor: Address) -> Self {
        self.sponsor_hint = sponsor;
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = ttl;
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn from(&self) -> Address {
        self.account.address()
    }
}

/// An unsigned request and the nonce reservation backing it.
#[derive(Debug)]
pub struct ReservedRequest {
    pub request: RelayRequest,
    pub reservation: NonceReservation,
}

/// Check an intent against the configured limits.
pub fn validate_intent(intent: &RelayIntent, config: &BuilderConfig) -> Result<()> {
    if intent.gas_limit == 0 {
        return Err(GaslessError::InvalidIntent("gas limit must be non-zero".into()));
    }
    if intent.gas_limit > config.max_gas_limit {
        return Err(GaslessError::InvalidIntent(format!(
            "gas limit {} exceeds maximum {}",
            intent.gas_limit, config.max_gas_limit
        )));
    }
    if intent.calldata.len() > config.max_calldata_bytes {
        return Err(GaslessError::InvalidIntent(format!(
            "calldata is {} bytes, maximum is {}",
            intent.calldata.len(),
            config.max_calldata_bytes
        )));
    }
    if intent.time_to_live.as_secs() == 0 {
        return Err(GaslessError::InvalidIntent("time to live must be at least one second".into()));
    }
    Ok(())
}

/// Turns intents into unsigned relay requests.
pub struct RequestBuilder {
    chain: Arc<dyn ChainReader>,
    nonces: Arc<NonceTracker>,
    config: BuilderConfig,
}

impl RequestBuilder {
    pub fn new(chain: Arc<dyn ChainReader>, nonces: Arc<NonceTracker>, config: BuilderConfig) -> Self {
        Self { chain, nonces, config }
    }

    /// Validate `intent`, reserve a nonce and compute the expiry.
    ///
    /// Waits while another request from the same account is in flight.
    pub async fn build(&self, intent: &RelayIntent) -> Result<ReservedRequest> {
        validate_intent(intent, &self.config)?;

        let from = intent.from();
        let reservation = self.nonces.reserve(from).await?;
        let head = self.chain.head().await?;
        let valid_until = head
            .timestamp
            .checked_add(intent.time_to_live.as_secs())
            .ok_or_else(|| GaslessError::InvalidIntent("time to live overflows chain time".into()))?;

        let request = RelayRequest {
            from,
            to: intent.target,
            value: intent.value,
            gas: intent.gas_limit,
            nonce: reservation.nonce(),
            data: intent.calldata.clone(),
            valid_until,
            sponsor: intent.sponsor_hint,
        };

        tracing::debug!(
            %from,
            to = %request.to,
            nonce = request.nonce,
            valid_until,
            "built relay request"
        );
        Ok(ReservedRequest { request, reservation })
    }
}
