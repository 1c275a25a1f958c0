//! Client configuration.

use alloy::primitives::Address;
use gasless_builder::BuilderConfig;
use gasless_reconcile::ReconcileConfig;
use gasless_relay::TransportConfig;
use gasless_types::{GaslessError, Result, SigningDomain};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Policy endpoint of one sponsor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorEndpoint {
    pub sponsor: Address,
    pub url: String,
}

/// Everything needed to relay on one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub chain_id: u64,
    pub forwarder: Address,
    pub relay_hub: Address,
    pub rpc_url: Option<String>,
    /// Relay server base URLs in preferred order.
    pub relayers: Vec<String>,
    pub relayer_timeout_ms: u64,
    pub sponsors: Vec<SponsorEndpoint>,
    pub sponsor_timeout_ms: u64,
    /// Transport passes over the relayers before giving up as unreachable.
    pub max_submit_rounds: u32,
    pub retry_backoff_ms: u64,
    pub builder: BuilderConfig,
    pub transport: TransportConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            forwarder: Address::ZERO,
            relay_hub: Address::ZERO,
            rpc_url: None,
            relayers: Vec::new(),
            relayer_timeout_ms: 30_000,
            sponsors: Vec::new(),
            sponsor_timeout_ms: 10_000,
            max_submit_rounds: 3,
            retry_backoff_ms: 1_000,
            builder: BuilderConfig::default(),
            transport: TransportConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| GaslessError::Config(format!("invalid client config: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| GaslessError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn domain(&self) -> SigningDomain {
        SigningDomain::new(self.chain_id, self.forwarder)
    }

    /// Reject configurations that cannot relay anything.
    pub fn validate(&self) -> Result<()> {
        if self.forwarder == Address::ZERO {
            return Err(GaslessError::Config("forwarder address is required".into()));
        }
        if self.relayers.is_empty() {
            return Err(GaslessError::Config("at least one relayer is required".into()));
        }
        if self.max_submit_rounds == 0 {
            return Err(GaslessError::Config("max_submit_rounds must be at least 1".into()));
        }
        if self.transport.per_attempt_timeout_ms == 0 || self.reconcile.poll_interval_ms == 0 {
            return Err(GaslessError::Config("timeouts and poll intervals must be non-zero".into()));
        }
        Ok(())
    }
}
