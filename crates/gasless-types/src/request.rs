//! Unsigned relay request and its canonical EIP-712 encoding.
//!
//! The encoding is what the forwarder verifies on-chain:
//! - `encodeData`: fixed field order, every field one 32-byte word (`data` hashed)
//! - signing payload: `0x19 0x01 ‖ domainSeparator ‖ hashStruct(request)`
//! - request hash: `keccak256(signing payload)`

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// EIP-712 domain name used by GSN-compatible forwarders.
pub const DOMAIN_NAME: &str = "GSN Relayed Transaction";

/// EIP-712 domain version used by GSN-compatible forwarders.
pub const DOMAIN_VERSION: &str = "2";

pub mod eip712 {
    alloy::sol! {
        /// Typed-data view of [`super::RelayRequest`].
        #[derive(Debug, PartialEq, Eq)]
        struct RelayRequest {
            address from;
            address to;
            uint256 value;
            uint256 gas;
            uint256 nonce;
            bytes data;
            uint256 validUntil;
            address sponsor;
        }
    }
}

/// Chain and forwarder a request is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningDomain {
    pub chain_id: u64,
    pub forwarder: Address,
}

impl SigningDomain {
    pub fn new(chain_id: u64, forwarder: Address) -> Self {
        Self { chain_id, forwarder }
    }

    pub fn eip712_domain(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some(Cow::Borrowed(DOMAIN_NAME)),
            Some(Cow::Borrowed(DOMAIN_VERSION)),
            Some(U256::from(self.chain_id)),
            Some(self.forwarder),
            None,
        )
    }

    pub fn separator(&self) -> B256 {
        self.eip712_domain().separator()
    }
}

/// An unsigned meta-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub from: Address,
    pub to: Address,
    #[serde(default)]
    pub value: U256,
    /// Gas limit for the inner call.
    pub gas: u64,
    /// Forwarder-tracked relay nonce of `from`.
    pub nonce: u64,
    pub data: Bytes,
    /// Unix seconds of chain time after which the forwarder refuses the request.
    pub valid_until: u64,
    /// Sponsor (paymaster) expected to fund the call.
    pub sponsor: Address,
}

impl RelayRequest {
    pub fn as_eip712(&self) -> eip712::RelayRequest {
        eip712::RelayRequest {
            from: self.from,
            to: self.to,
            value: self.value,
            gas: U256::from(self.gas),
            nonce: U256::from(self.nonce),
            data: self.data.clone(),
            validUntil: U256::from(self.valid_until),
            sponsor: self.sponsor,
        }
    }

    /// Fixed-width `encodeData` of the request (8 words).
    pub fn encode_data(&self) -> Vec<u8> {
        self.as_eip712().eip712_encode_data()
    }

    pub fn struct_hash(&self) -> B256 {
        self.as_eip712().eip712_hash_struct()
    }

    /// Bytes the account signs over.
    pub fn signing_payload(&self, domain: &SigningDomain) -> Vec<u8> {
        let mut payload = Vec::with_capacity(66);
        payload.extend_from_slice(&[0x19, 0x01]);
        payload.extend_from_slice(domain.separator().as_slice());
        payload.extend_from_slice(self.struct_hash().as_slice());
        payload
    }

    /// Hash correlating this request across signing, relaying and reconciliation.
    pub fn hash(&self, domain: &SigningDomain) -> B256 {
        keccak256(self.signing_payload(domain))
    }

    pub fn is_expired_at(&self, chain_time: u64) -> bool {
        chain_time >= self.valid_until
    }
}
