//! Chain read channel for the relay client.
//!
//! Defines the `ChainReader` trait used by the nonce tracker, the request
//! builder and the receipt reconciler. Provides an alloy JSON-RPC reader and a
//! `MemoryChain` for testing.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use gasless_types::Result;
use serde::{Deserialize, Serialize};

pub mod contracts;
pub mod memory;
pub mod rpc;

pub use memory::MemoryChain;
pub use rpc::RpcChainReader;

/// Latest block as seen by the read channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainHead {
    pub number: u64,
    /// Block timestamp in unix seconds.
    pub timestamp: u64,
}

/// What the relay hub reported for one relayed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Succeeded,
    /// The forwarder executed the call but the target reverted.
    TargetReverted { reason: String },
    /// The forwarder refused the request (signature, nonce, expiry).
    ForwarderRejected { reason: String },
    /// The paymaster refused or failed to pay on-chain.
    SponsorRejected { reason: String },
}

impl CallStatus {
    /// Map a GSN `RelayCallStatus` code.
    pub fn from_hub_status(status: u8) -> Self {
        match status {
            0 => Self::Succeeded,
            1 => Self::TargetReverted { reason: "relayed call failed".into() },
            2 => Self::SponsorRejected { reason: "rejected by preRelayedCall".into() },
            3 => Self::ForwarderRejected { reason: "rejected by forwarder".into() },
            4 => Self::TargetReverted { reason: "rejected by recipient revert".into() },
            5 => Self::SponsorRejected { reason: "postRelayedCall failed".into() },
            6 => Self::SponsorRejected { reason: "paymaster balance changed".into() },
            other => Self::ForwarderRejected { reason: format!("unknown relay status {}", other) },
        }
    }
}

/// An on-chain relayed call located by transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedCall {
    pub tx_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub status: CallStatus,
}

/// Read-only access to chain state.
///
/// The forwarder's nonce is authoritative; everything the client caches is
/// derived from it.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Next relay nonce the forwarder will accept from `from`.
    async fn forwarder_nonce(&self, from: Address) -> Result<u64>;

    async fn head(&self) -> Result<ChainHead>;

    /// Look up `tx_hash` and decode the relayed call made on behalf of `from`.
    ///
    /// `Ok(None)` means the transaction is not (yet) included or carries no
    /// call for `from`.
    async fn relayed_call(&self, tx_hash: B256, from: Address) -> Result<Option<RelayedCall>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_status_mapping() {
        assert_eq!(CallStatus::from_hub_status(0), CallStatus::Succeeded);
        assert!(matches!(CallStatus::from_hub_status(1), CallStatus::TargetReverted { .. }));
        assert!(matches!(CallStatus::from_hub_status(2), CallStatus::SponsorRejected { .. }));
        assert!(matches!(CallStatus::from_hub_status(3), CallStatus::ForwarderRejected { .. }));
        assert!(matches!(CallStatus::from_hub_status(4), CallStatus::TargetReverted { .. }));
        assert!(matches!(CallStatus::from_hub_status(6), CallStatus::SponsorRejected { .. }));
        assert!(matches!(CallStatus::from_hub_status(42), CallStatus::ForwarderRejected { .. }));
    }
}
