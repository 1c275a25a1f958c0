//! In-memory chain for testing.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::*;
use gasless_types::{GaslessError, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory chain state (for testing and ephemeral use).
pub struct MemoryChain {
    head: Mutex<ChainHead>,
    nonces: Mutex<HashMap<Address, u64>>,
    calls: Mutex<HashMap<B256, RelayedCall>>,
    nonce_reads: AtomicU64,
    receipts_down: AtomicBool,
    rpc_down: AtomicBool,
}

impl MemoryChain {
    pub fn new(head: ChainHead) -> Self {
        Self {
            head: Mutex::new(head),
            nonces: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            nonce_reads: AtomicU64::new(0),
            receipts_down: AtomicBool::new(false),
            rpc_down: AtomicBool::new(false),
        }
    }

    pub fn set_head(&self, head: ChainHead) {
        *lock(&self.head) = head;
    }

    /// Mine one block `seconds` after the current head.
    pub fn advance_time(&self, seconds: u64) {
        let mut head = lock(&self.head);
        head.number += 1;
        head.timestamp += seconds;
    }

    pub fn set_nonce(&self, from: Address, nonce: u64) {
        lock(&self.nonces).insert(from, nonce);
    }

    pub fn nonce(&self, from: Address) -> u64 {
        lock(&self.nonces).get(&from).copied().unwrap_or(0)
    }

    /// Number of `forwarder_nonce` reads served.
    pub fn nonce_reads(&self) -> u64 {
        self.nonce_reads.load(Ordering::SeqCst)
    }

    /// Make `relayed_call` fail.
    pub fn set_receipts_down(&self, down: bool) {
        self.receipts_down.store(down, Ordering::SeqCst);
    }

    /// Make every read fail.
    pub fn set_rpc_down(&self, down: bool) {
        self.rpc_down.store(down, Ordering::SeqCst);
    }

    fn check_rpc(&self) -> Result<()> {
        if self.rpc_down.load(Ordering::SeqCst) {
            return Err(GaslessError::Chain("memory chain unreachable".into()));
        }
        Ok(())
    }

    /// Record a relayed call in the current head block.
    ///
    /// Statuses where the forwarder ran consume the sender's nonce.
    pub fn include(&self, tx_hash: B256, from: Address, status: CallStatus) {
        let block_number = lock(&self.head).number;
        if matches!(
            status,
            CallStatus::Succeeded | CallStatus::TargetReverted { .. } | CallStatus::ForwarderRejected { .. }
        ) {
            *lock(&self.nonces).entry(from).or_insert(0) += 1;
        }
        lock(&self.calls).insert(tx_hash, RelayedCall { tx_hash, block_number, from, status });
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new(ChainHead { number: 1, timestamp: 1_700_000_000 })
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn forwarder_nonce(&self, from: Address) -> Result<u64> {
        self.check_rpc()?;
        self.nonce_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce(from))
    }

    async fn head(&self) -> Result<ChainHead> {
        self.check_rpc()?;
        Ok(*lock(&self.head))
    }

    async fn relayed_call(&self, tx_hash: B256, from: Address) -> Result<Option<RelayedCall>> {
        self.check_rpc()?;
        if self.receipts_down.load(Ordering::SeqCst) {
            return Err(GaslessError::Chain(format!("receipt lookup for {} failed", tx_hash)));
        }
        let calls = lock(&self.calls);
        Ok(calls.get(&tx_hash).filter(|c| c.from == from).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_include_consumes_nonce() {
        let chain = MemoryChain::default();
        let user = Address::repeat_byte(1);
        let tx = B256::repeat_byte(2);

        assert_eq!(chain.forwarder_nonce(user).await.unwrap(), 0);
        chain.include(tx, user, CallStatus::Succeeded);
        assert_eq!(chain.forwarder_nonce(user).await.unwrap(), 1);

        chain.include(B256::repeat_byte(3), user, CallStatus::SponsorRejected { reason: "".into() });
        assert_eq!(chain.forwarder_nonce(user).await.unwrap(), 1);
        assert_eq!(chain.nonce_reads(), 3);
    }

    #[tokio::test]
    async fn test_relayed_call_filters_sender() {
        let chain = MemoryChain::default();
        let user = Address::repeat_byte(1);
        let tx = B256::repeat_byte(2);
        chain.include(tx, user, CallStatus::Succeeded);

        assert!(chain.relayed_call(tx, user).await.unwrap().is_some());
        assert!(chain.relayed_call(tx, Address::repeat_byte(9)).await.unwrap().is_none());
        assert!(chain.relayed_call(B256::ZERO, user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_read_failures() {
        let chain = MemoryChain::default();
        let user = Address::repeat_byte(1);

        chain.set_receipts_down(true);
        assert!(matches!(chain.relayed_call(B256::ZERO, user).await, Err(GaslessError::Chain(_))));
        assert!(chain.head().await.is_ok());

        chain.set_rpc_down(true);
        assert!(chain.head().await.is_err());
        assert!(chain.forwarder_nonce(user).await.is_err());
        assert_eq!(chain.nonce_reads(), 0);

        chain.set_rpc_down(false);
        chain.set_receipts_down(false);
        assert!(chain.relayed_call(B256::ZERO, user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_advance_time() {
        let chain = MemoryChain::new(ChainHead { number: 10, timestamp: 100 });
        chain.advance_time(12);
        assert_eq!(chain.head().await.unwrap(), ChainHead { number: 11, timestamp: 112 });
    }
}
