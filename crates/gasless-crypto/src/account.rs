//! Accounts and the signing capabilities behind them.

use alloy::primitives::{keccak256, Address, Signature, B256};
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use async_trait::async_trait;
use gasless_types::{hex_to_bytes, GaslessError, Result};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::keys;

/// Something that can produce secp256k1 signatures for one address.
///
/// Implementations never expose key material.
#[async_trait]
pub trait SigningCapability: fmt::Debug + Send + Sync {
    fn address(&self) -> Address;

    /// Sign a 32-byte digest. Deterministic for a given key and digest.
    async fn sign_hash(&self, hash: B256) -> Result<Signature>;
}

/// Key material held in process memory.
pub struct LocalKey {
    address: Address,
    signer: RwLock<Option<PrivateKeySigner>>,
}

impl LocalKey {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { address: signer.address(), signer: RwLock::new(Some(signer)) }
    }

    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    /// Load a hex-encoded private key.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let bytes = hex_to_bytes(private_key)?;
        let signer = PrivateKeySigner::from_slice(&bytes)
            .map_err(|e| GaslessError::KeyDerivation(e.to_string()))?;
        Ok(Self::new(signer))
    }

    /// Derive a key from a seed (see [`keys::derive_signing_key`]).
    pub fn from_seed(seed: &str, nonce: Option<&str>) -> Result<Self> {
        Ok(Self::new(keys::derive_signing_key(seed, nonce)?))
    }

    /// Drop the key material. Later signatures fail with `KeyUnavailable`.
    pub fn close(&self) {
        if let Ok(mut signer) = self.signer.write() {
            *signer = None;
        }
        tracing::debug!(address = %self.address, "local key closed");
    }

    pub fn is_closed(&self) -> bool {
        self.signer.read().map(|s| s.is_none()).unwrap_or(true)
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalKey").field(&self.address).finish()
    }
}

#[async_trait]
impl SigningCapability for LocalKey {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature> {
        let guard = self
            .signer
            .read()
            .map_err(|_| GaslessError::KeyUnavailable("key lock poisoned".into()))?;
        let signer = guard
            .as_ref()
            .ok_or_else(|| GaslessError::KeyUnavailable(format!("key for {} closed", self.address)))?;
        signer
            .sign_hash_sync(&hash)
            .map_err(|e| GaslessError::KeyUnavailable(e.to_string()))
    }
}

/// A user account: an address and the capability that signs for it.
#[derive(Clone)]
pub struct Account {
    address: Address,
    key: Arc<dyn SigningCapability>,
}

impl Account {
    pub fn new(key: Arc<dyn SigningCapability>) -> Self {
        Self { address: key.address(), key }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `keccak256(message)`.
    pub async fn sign(&self, message: &[u8]) -> Result<Signature> {
        self.key.sign_hash(keccak256(message)).await
    }

    pub async fn sign_hash(&self, hash: B256) -> Result<Signature> {
        self.key.sign_hash(hash).await
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Account").field(&self.address).finish()
    }
}
