//! In-process sponsor policy backed by a target allow-list.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use gasless_types::{GaslessError, RelayRequest, Result, SponsorRejection};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::SponsorPolicy;

#[derive(Debug, Default)]
struct Usage {
    gas_spent: u64,
    per_account: HashMap<Address, u32>,
}

/// Approves requests for one sponsor address when the target is listed,
/// the gas budget covers the request, and the sender is under its limit.
#[derive(Debug)]
pub struct LocalAllowListPolicy {
    sponsor: Address,
    allowed_targets: HashSet<Address>,
    gas_budget: Option<u64>,
    max_per_account: Option<u32>,
    usage: Mutex<Usage>,
}

impl LocalAllowListPolicy {
    pub fn new(sponsor: Address, allowed_targets: impl IntoIterator<Item = Address>) -> Self {
        Self {
            sponsor,
            allowed_targets: allowed_targets.into_iter().collect(),
            gas_budget: None,
            max_per_account: None,
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Total gas this policy will sponsor.
    pub fn with_gas_budget(mut self, gas: u64) -> Self {
        self.gas_budget = Some(gas);
        self
    }

    pub fn with_max_per_account(mut self, max: u32) -> Self {
        self.max_per_account = Some(max);
        self
    }

    pub fn sponsor(&self) -> Address {
        self.sponsor
    }

    fn check(&self, request: &RelayRequest) -> std::result::Result<(), SponsorRejection> {
        if request.sponsor != self.sponsor {
            return Err(SponsorRejection::UnknownSponsor);
        }
        if !self.allowed_targets.contains(&request.to) {
            return Err(SponsorRejection::TargetNotAllowed);
        }

        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(budget) = self.gas_budget {
            if usage.gas_spent.saturating_add(request.gas) > budget {
                return Err(SponsorRejection::InsufficientBalance);
            }
        }
        let count = usage.per_account.get(&request.from).copied().unwrap_or(0);
        if self.max_per_account.is_some_and(|max| count >= max) {
            return Err(SponsorRejection::RateLimited);
        }

        usage.gas_spent = usage.gas_spent.saturating_add(request.gas);
        usage.per_account.insert(request.from, count + 1);
        Ok(())
    }
}

#[async_trait]
impl SponsorPolicy for LocalAllowListPolicy {
    async fn preflight(&self, request: &RelayRequest, request_hash: B256) -> Result<Bytes> {
        match self.check(request) {
            Ok(()) => {
                tracing::debug!(sponsor = %self.sponsor, request_hash = %request_hash, "request sponsored");
                // The approval token binds the sponsor to this request hash.
                let mut token = Vec::with_capacity(52);
                token.extend_from_slice(self.sponsor.as_slice());
                token.extend_from_slice(request_hash.as_slice());
                Ok(Bytes::from(token))
            }
            Err(reason) => {
                tracing::info!(
                    sponsor = %self.sponsor,
                    request_hash = %request_hash,
                    %reason,
                    "request not sponsored"
                );
                Err(GaslessError::SponsorRejected(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    const SPONSOR: Address = Address::new([0x50; 20]);
    const TARGET: Address = Address::new([0xc0; 20]);

    fn request(from: u8, to: Address, gas: u64) -> RelayRequest {
        RelayRequest {
            from: Address::repeat_byte(from),
            to,
            value: U256::ZERO,
            gas,
            nonce: 0,
            data: Bytes::new(),
            valid_until: 0,
            sponsor: SPONSOR,
        }
    }

    fn rejection(err: GaslessError) -> SponsorRejection {
        match err {
            GaslessError::SponsorRejected(reason) => reason,
            other => panic!("expected sponsor rejection, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_allow_listed_target_is_approved() {
        let policy = LocalAllowListPolicy::new(SPONSOR, [TARGET]);
        let hash = B256::repeat_byte(0x11);
        let token = policy.preflight(&request(1, TARGET, 50_000), hash).await.unwrap();
        assert_eq!(&token[..20], SPONSOR.as_slice());
        assert_eq!(&token[20..], hash.as_slice());
    }

    #[tokio::test]
    async fn test_rejection_reasons() {
        let policy = LocalAllowListPolicy::new(SPONSOR, [TARGET]);
        let err = policy
            .preflight(&request(1, Address::repeat_byte(0xee), 50_000), B256::ZERO)
            .await
            .unwrap_err();
        assert_eq!(rejection(err), SponsorRejection::TargetNotAllowed);

        let mut foreign = request(1, TARGET, 50_000);
        foreign.sponsor = Address::repeat_byte(0x99);
        let err = policy.preflight(&foreign, B256::ZERO).await.unwrap_err();
        assert_eq!(rejection(err), SponsorRejection::UnknownSponsor);
    }

    #[tokio::test]
    async fn test_budget_and_rate_limit() {
        let policy = LocalAllowListPolicy::new(SPONSOR, [TARGET])
            .with_gas_budget(150_000)
            .with_max_per_account(1);

        policy.preflight(&request(1, TARGET, 100_000), B256::ZERO).await.unwrap();

        let err = policy.preflight(&request(1, TARGET, 10_000), B256::ZERO).await.unwrap_err();
        assert_eq!(rejection(err), SponsorRejection::RateLimited);

        let err = policy.preflight(&request(2, TARGET, 60_000), B256::ZERO).await.unwrap_err();
        assert_eq!(rejection(err), SponsorRejection::InsufficientBalance);

        policy.preflight(&request(2, TARGET, 50_000), B256::ZERO).await.unwrap();
    }
}
