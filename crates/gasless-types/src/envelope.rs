//! Signed relay envelope.

use alloy::primitives::{Bytes, Signature, B256};
use serde::{Deserialize, Serialize};

use crate::{GaslessError, RelayRequest, Result, SigningDomain};

/// A request together with the account's signature over its canonical encoding.
///
/// Fields are read-only: changing any signed field requires signing a new
/// envelope. The sponsor approval is not part of the signed payload and can be
/// attached once after signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRelayEnvelope {
    request: RelayRequest,
    domain: SigningDomain,
    signature: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sponsor_approval: Option<Bytes>,
}

impl SignedRelayEnvelope {
    pub fn from_parts(request: RelayRequest, domain: SigningDomain, signature: Signature) -> Self {
        Self {
            request,
            domain,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            sponsor_approval: None,
        }
    }

    pub fn request(&self) -> &RelayRequest {
        &self.request
    }

    pub fn domain(&self) -> &SigningDomain {
        &self.domain
    }

    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    pub fn sponsor_approval(&self) -> Option<&Bytes> {
        self.sponsor_approval.as_ref()
    }

    pub fn request_hash(&self) -> B256 {
        self.request.hash(&self.domain)
    }

    /// Attach the sponsor-issued approval token.
    pub fn with_sponsor_approval(mut self, token: Bytes) -> Self {
        self.sponsor_approval = Some(token);
        self
    }

    /// Check that the signature recovers to `request.from`.
    pub fn verify(&self) -> Result<()> {
        let signature = Signature::from_raw(&self.signature)
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))?;
        let signer = signature
            .recover_address_from_prehash(&self.request_hash())
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))?;
        if signer != self.request.from {
            return Err(GaslessError::InvalidSignature(format!(
                "recovered {} but request is from {}",
                signer, self.request.from
            )));
        }
        Ok(())
    }
}
