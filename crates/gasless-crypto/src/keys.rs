//! secp256k1 key derivation via HKDF-SHA256.
//!
//! Flow: seed → HKDF-SHA256 (info "Gasless.KeyGen[:nonce]") → 32-byte scalar → signer

use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use gasless_types::{GaslessError, Result};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

const HKDF_INFO: &str = "Gasless.KeyGen";

/// Derive a 32-byte seed using HKDF-SHA256.
fn derive_seed(seed: &str, nonce: Option<&str>) -> Result<[u8; 32]> {
    if seed.len() < 16 {
        return Err(GaslessError::SeedTooShort);
    }

    let info = match nonce {
        Some(n) => format!("{}:{}", HKDF_INFO, n),
        None => HKDF_INFO.to_string(),
    };

    // HKDF with no salt (RFC 5869 default: HashLen zeros)
    let hk = Hkdf::<Sha256>::new(None, seed.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|e| GaslessError::KeyDerivation(e.to_string()))?;

    Ok(okm)
}

/// Derive a signing key from a seed string and optional nonce.
///
/// The HKDF output is used as the scalar directly. In the negligible case it is
/// zero or not below the curve order it is re-hashed once with SHA-256.
pub fn derive_signing_key(seed: &str, nonce: Option<&str>) -> Result<PrivateKeySigner> {
    let okm = derive_seed(seed, nonce)?;
    PrivateKeySigner::from_bytes(&B256::from(okm))
        .or_else(|_| {
            let rehashed: [u8; 32] = Sha256::digest(okm).into();
            PrivateKeySigner::from_bytes(&B256::from(rehashed))
        })
        .map_err(|e| GaslessError::KeyDerivation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "correct horse battery staple";

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_signing_key(SEED, None).unwrap();
        let b = derive_signing_key(SEED, None).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_nonce_separates_keys() {
        let plain = derive_signing_key(SEED, None).unwrap();
        let first = derive_signing_key(SEED, Some("1")).unwrap();
        let second = derive_signing_key(SEED, Some("2")).unwrap();
        assert_ne!(plain.address(), first.address());
        assert_ne!(first.address(), second.address());
    }

    #[test]
    fn test_seed_too_short() {
        let result = derive_signing_key("short", None);
        assert!(matches!(result, Err(GaslessError::SeedTooShort)));
    }
}
