//! Terminal relay outcomes.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// Included on-chain and the target call succeeded.
    Included,
    /// The forwarder (or a relayer on its behalf) refused the request.
    ForwarderRejected,
    /// Included on-chain but the inner target call reverted.
    TargetReverted,
    SponsorRejected,
    Expired,
    RelayUnreachable,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Included => "included",
            Self::ForwarderRejected => "forwarder_rejected",
            Self::TargetReverted => "target_reverted",
            Self::SponsorRejected => "sponsor_rejected",
            Self::Expired => "expired",
            Self::RelayUnreachable => "relay_unreachable",
        };
        f.write_str(s)
    }
}

/// Final result of relaying one envelope. Never changes once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutcome {
    request_hash: B256,
    status: OutcomeStatus,
    tx_reference: Option<B256>,
    details: String,
}

impl RelayOutcome {
    fn new(
        request_hash: B256,
        status: OutcomeStatus,
        tx_reference: Option<B256>,
        details: impl Into<String>,
    ) -> Self {
        Self { request_hash, status, tx_reference, details: details.into() }
    }

    /// `tx_reference` is `None` when inclusion was inferred from the forwarder nonce.
    pub fn included(request_hash: B256, tx_reference: Option<B256>, details: impl Into<String>) -> Self {
        Self::new(request_hash, OutcomeStatus::Included, tx_reference, details)
    }

    pub fn target_reverted(request_hash: B256, tx_reference: B256, details: impl Into<String>) -> Self {
        Self::new(request_hash, OutcomeStatus::TargetReverted, Some(tx_reference), details)
    }

    /// `tx_reference` is `None` when a relayer refused the envelope off-chain.
    pub fn forwarder_rejected(
        request_hash: B256,
        tx_reference: Option<B256>,
        details: impl Into<String>,
    ) -> Self {
        Self::new(request_hash, OutcomeStatus::ForwarderRejected, tx_reference, details)
    }

    pub fn sponsor_rejected(request_hash: B256, details: impl Into<String>) -> Self {
        Self::new(request_hash, OutcomeStatus::SponsorRejected, None, details)
    }

    pub fn expired(request_hash: B256, details: impl Into<String>) -> Self {
        Self::new(request_hash, OutcomeStatus::Expired, None, details)
    }

    pub fn relay_unreachable(request_hash: B256, details: impl Into<String>) -> Self {
        Self::new(request_hash, OutcomeStatus::RelayUnreachable, None, details)
    }

    pub fn request_hash(&self) -> B256 {
        self.request_hash
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn tx_reference(&self) -> Option<B256> {
        self.tx_reference
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    /// Whether the forwarder consumed the relay nonce on-chain.
    pub fn consumes_nonce(&self) -> bool {
        match self.status {
            OutcomeStatus::Included | OutcomeStatus::TargetReverted => true,
            OutcomeStatus::ForwarderRejected => self.tx_reference.is_some(),
            OutcomeStatus::SponsorRejected
            | OutcomeStatus::Expired
            | OutcomeStatus::RelayUnreachable => false,
        }
    }
}
