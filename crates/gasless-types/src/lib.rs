use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use alloy::primitives::{Address, Bytes, B256, U256};

pub mod envelope;
pub mod outcome;
pub mod request;

pub use envelope::SignedRelayEnvelope;
pub use outcome::{OutcomeStatus, RelayOutcome};
pub use request::{RelayRequest, SigningDomain};

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Why a sponsor refused to fund a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SponsorRejection {
    InsufficientBalance,
    TargetNotAllowed,
    RateLimited,
    UnknownSponsor,
    Other(String),
}

impl fmt::Display for SponsorRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientBalance => f.write_str("sponsor balance insufficient"),
            Self::TargetNotAllowed => f.write_str("target contract not allow-listed"),
            Self::RateLimited => f.write_str("per-account rate limit reached"),
            Self::UnknownSponsor => f.write_str("unknown sponsor"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Gasless relay client error types.
#[derive(Debug, Error)]
pub enum GaslessError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("seed too short: minimum 16 characters required")]
    SeedTooShort,

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("relay nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("sponsor rejected request: {0}")]
    SponsorRejected(SponsorRejection),

    #[error("sponsor endpoint failed: {0}")]
    Sponsor(String),

    #[error("no relayer accepted the envelope ({attempted} attempted)")]
    RelayUnreachable { attempted: usize },

    #[error("relayer {relayer} rejected the envelope: {reason}")]
    RelayRejected { relayer: String, reason: String },

    #[error("request expired at {valid_until}")]
    Expired { valid_until: u64 },

    #[error("chain read failed: {0}")]
    Chain(String),

    #[error("relay {request_hash} cancelled")]
    Cancelled { request_hash: B256 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl GaslessError {
    /// Only transport unreachability may be retried with the same envelope.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RelayUnreachable { .. })
    }
}

pub type Result<T> = std::result::Result<T, GaslessError>;

/// Parse a hex string (with or without 0x) to bytes.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| GaslessError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> Hex {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_helpers() {
        assert_eq!(hex_to_bytes("0x0102ff").unwrap(), vec![1, 2, 255]);
        assert_eq!(hex_to_bytes("0102").unwrap(), vec![1, 2]);
        assert_eq!(bytes_to_hex(&[0xab, 0x01]), "0xab01");
        assert!(matches!(hex_to_bytes("0xzz"), Err(GaslessError::InvalidHex(_))));
    }

    #[test]
    fn test_sponsor_rejection_wire_format() {
        let json = serde_json::to_value(SponsorRejection::TargetNotAllowed).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "target_not_allowed" }));

        let other: SponsorRejection =
            serde_json::from_value(serde_json::json!({ "kind": "other", "detail": "paused" }))
                .unwrap();
        assert_eq!(other, SponsorRejection::Other("paused".into()));
    }

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(GaslessError::RelayUnreachable { attempted: 2 }.is_retryable());
        assert!(!GaslessError::Expired { valid_until: 1 }.is_retryable());
        assert!(!GaslessError::SponsorRejected(SponsorRejection::RateLimited).is_retryable());
    }
}
