//! Relay request signer.

use gasless_types::{GaslessError, RelayRequest, Result, SignedRelayEnvelope, SigningDomain};

use crate::account::Account;

/// Signs requests for one chain/forwarder domain.
#[derive(Debug, Clone, Copy)]
pub struct RequestSigner {
    domain: SigningDomain,
}

impl RequestSigner {
    pub fn new(domain: SigningDomain) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> &SigningDomain {
        &self.domain
    }

    /// Sign the canonical payload of `request` with `account`.
    ///
    /// Errors from the account are returned unchanged.
    pub async fn sign(&self, request: RelayRequest, account: &Account) -> Result<SignedRelayEnvelope> {
        if account.address() != request.from {
            return Err(GaslessError::InvalidIntent(format!(
                "account {} cannot sign a request from {}",
                account.address(),
                request.from
            )));
        }

        let payload = request.signing_payload(&self.domain);
        let signature = account.sign(&payload).await?;
        let envelope = SignedRelayEnvelope::from_parts(request, self.domain, signature);

        tracing::debug!(
            from = %envelope.request().from,
            nonce = envelope.request().nonce,
            request_hash = %envelope.request_hash(),
            "signed relay request"
        );
        Ok(envelope)
    }
}
