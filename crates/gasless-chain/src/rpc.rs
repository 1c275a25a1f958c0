//! JSON-RPC chain reader backed by an alloy provider.

use alloy::primitives::{Address, B256, U256};
use alloy::network::ReceiptResponse as _;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::BlockNumberOrTag;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use gasless_types::{GaslessError, Result};

use crate::contracts::{decode_hub_logs, IForwarder};
use crate::{CallStatus, ChainHead, ChainReader, RelayedCall};

/// Reads forwarder nonces, heads and relay receipts over JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcChainReader {
    provider: DynProvider,
    forwarder: Address,
    relay_hub: Address,
}

impl RpcChainReader {
    pub fn new(rpc_url: &str, forwarder: Address, relay_hub: Address) -> Result<Self> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| GaslessError::Config(format!("invalid rpc url {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self::from_provider(provider, forwarder, relay_hub))
    }

    pub fn from_provider(provider: DynProvider, forwarder: Address, relay_hub: Address) -> Self {
        Self { provider, forwarder, relay_hub }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn forwarder_nonce(&self, from: Address) -> Result<u64> {
        let forwarder = IForwarder::new(self.forwarder, self.provider.clone());
        let nonce: U256 = forwarder
            .getNonce(from)
            .call()
            .await
            .map_err(|e| GaslessError::Chain(format!("getNonce({}) failed: {}", from, e)))?;
        u64::try_from(nonce)
            .map_err(|_| GaslessError::Chain(format!("forwarder nonce {} out of range", nonce)))
    }

    async fn head(&self) -> Result<ChainHead> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| GaslessError::Chain(format!("failed to fetch latest block: {}", e)))?
            .ok_or_else(|| GaslessError::Chain("latest block unavailable".into()))?;
        Ok(ChainHead { number: block.header.number, timestamp: block.header.timestamp })
    }

    async fn relayed_call(&self, tx_hash: B256, from: Address) -> Result<Option<RelayedCall>> {
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| GaslessError::Chain(format!("failed to fetch receipt {}: {}", tx_hash, e)))?
        else {
            return Ok(None);
        };

        let block_number = receipt.block_number.unwrap_or_default();
        let logs = receipt.inner.logs().iter().map(|log| &log.inner);
        let status = match decode_hub_logs(self.relay_hub, from, logs) {
            Some(status) => status,
            // A reverted relay transaction leaves no hub events behind.
            None if !receipt.status() => CallStatus::ForwarderRejected {
                reason: "relay transaction reverted".into(),
            },
            None => {
                tracing::debug!(%tx_hash, %from, "receipt carries no relayed call for sender");
                return Ok(None);
            }
        };

        Ok(Some(RelayedCall { tx_hash, block_number, from, status }))
    }
}
