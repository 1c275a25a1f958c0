//! Sponsor (paymaster) policy checks.
//!
//! A sponsor is asked before any relayer sees the envelope. Approval yields
//! an opaque token that travels with the envelope; rejection carries a
//! [`SponsorRejection`] and never touches the chain.

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use gasless_types::{RelayRequest, Result};

pub mod allow_list;
pub mod http;

pub use allow_list::LocalAllowListPolicy;
pub use http::HttpSponsorClient;
pub use gasless_types::SponsorRejection;

/// Decides whether a sponsor funds a relay request.
///
/// Returns the approval token on success and
/// `GaslessError::SponsorRejected` when the sponsor refuses. Endpoint
/// failures are reported as `GaslessError::Sponsor`.
#[async_trait]
pub trait SponsorPolicy: Send + Sync {
    async fn preflight(&self, request: &RelayRequest, request_hash: B256) -> Result<Bytes>;
}
