//! Envelope submission with relayer failover.

use alloy::primitives::B256;
use gasless_types::{GaslessError, Result, SignedRelayEnvelope};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::RelayerRegistry;
use crate::relayer_client::{RelayClient, SubmitReply};

/// Rejection reason a relayer gives for an envelope past `validUntil`.
pub const REJECT_EXPIRED: &str = "expired";

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub per_attempt_timeout_ms: u64,
    /// Ask each relayer for readiness before handing it the envelope.
    pub ping_before_submit: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            per_attempt_timeout_ms: 10_000,
            ping_before_submit: false,
        }
    }
}

/// Which relayer took the envelope and the transaction it broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub relayer: String,
    pub request_hash: B256,
    pub tx_hash: B256,
}

/// Whether a rejection reason is exactly the expiry token.
///
/// Free-text reasons that merely mention expiry are ordinary rejections.
pub fn is_expiry_reason(reason: &str) -> bool {
    reason.trim().eq_ignore_ascii_case(REJECT_EXPIRED)
}

/// Hands envelopes to relayers until one accepts.
#[derive(Debug, Clone, Default)]
pub struct RelayTransport {
    config: TransportConfig,
}

impl RelayTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.config.per_attempt_timeout_ms)
    }

    async fn is_ready(&self, relayer: &RelayClient, chain_id: u64) -> bool {
        match tokio::time::timeout(self.attempt_timeout(), relayer.ping()).await {
            Ok(Ok(ping)) if ping.ready && ping.chain_id == chain_id => true,
            Ok(Ok(ping)) => {
                tracing::warn!(
                    relayer = relayer.base_url(),
                    ready = ping.ready,
                    chain_id = ping.chain_id,
                    "relayer not usable"
                );
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(relayer = relayer.base_url(), error = %e, "relayer ping failed");
                false
            }
            Err(_) => {
                tracing::warn!(relayer = relayer.base_url(), "relayer ping timed out");
                false
            }
        }
    }

    /// Offer `envelope` to each candidate in order.
    ///
    /// - accepted with a matching request hash: done
    /// - timeout, transport error or malformed ack: next candidate
    /// - rejected: next candidate, unless the reason is expiry
    ///
    /// Exhausting the candidates yields `RelayRejected` when any relayer
    /// rejected the envelope, else `RelayUnreachable`.
    pub async fn submit(
        &self,
        envelope: &SignedRelayEnvelope,
        registry: &RelayerRegistry,
    ) -> Result<SubmissionReceipt> {
        let request_hash = envelope.request_hash();
        let chain_id = envelope.domain().chain_id;
        let mut attempted = 0;
        let mut rejection: Option<(String, String)> = None;

        for relayer in registry.candidates() {
            attempted += 1;
            let url = relayer.base_url();

            if self.config.ping_before_submit && !self.is_ready(&relayer, chain_id).await {
                registry.record_failure(url);
                continue;
            }

            let reply = match tokio::time::timeout(self.attempt_timeout(), relayer.relay(envelope)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    tracing::warn!(relayer = url, request_hash = %request_hash, error = %e, "relay attempt failed");
                    registry.record_failure(url);
                    continue;
                }
                Err(_) => {
                    tracing::warn!(relayer = url, request_hash = %request_hash, "relay attempt timed out");
                    registry.record_failure(url);
                    continue;
                }
            };

            match reply {
                SubmitReply::Accepted(ack) if ack.request_hash == request_hash => {
                    registry.record_success(url);
                    tracing::info!(relayer = url, request_hash = %request_hash, tx_hash = %ack.tx_hash, "relayer accepted envelope");
                    return Ok(SubmissionReceipt {
                        relayer: url.to_string(),
                        request_hash,
                        tx_hash: ack.tx_hash,
                    });
                }
                SubmitReply::Accepted(ack) => {
                    tracing::warn!(
                        relayer = url,
                        request_hash = %request_hash,
                        acked = %ack.request_hash,
                        "relayer acknowledged a different request"
                    );
                    registry.record_failure(url);
                }
                SubmitReply::Rejected(reason) if is_expiry_reason(&reason) => {
                    tracing::info!(relayer = url, request_hash = %request_hash, "relayer reports envelope expired");
                    return Err(GaslessError::Expired { valid_until: envelope.request().valid_until });
                }
                SubmitReply::Rejected(reason) => {
                    tracing::info!(relayer = url, request_hash = %request_hash, %reason, "relayer rejected envelope");
                    rejection = Some((url.to_string(), reason));
                }
            }
        }

        match rejection {
            Some((relayer, reason)) => Err(GaslessError::RelayRejected { relayer, reason }),
            None => Err(GaslessError::RelayUnreachable { attempted }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::signed_envelope;
    use httpmock::prelude::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn fast() -> RelayTransport {
        RelayTransport::new(TransportConfig { per_attempt_timeout_ms: 200, ping_before_submit: false })
    }

    async fn accepting(envelope: &SignedRelayEnvelope, tx: B256) -> MockServer {
        let server = MockServer::start_async().await;
        let hash = envelope.request_hash();
        server
            .mock_async(|when, then| {
                when.method(POST).path("/relay");
                then.status(200).json_body(json!({
                    "code": 0,
                    "data": { "requestHash": hash, "txHash": tx },
                }));
            })
            .await;
        server
    }

    async fn rejecting(reason: &str) -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/relay");
                then.status(200).json_body(json!({ "code": 1, "message": reason, "data": null }));
            })
            .await;
        server
    }

    async fn hanging() -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/relay");
                then.status(200).delay(Duration::from_secs(2)).json_body(json!({ "data": null }));
            })
            .await;
        server
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fails_over_after_timeout() {
        let envelope = signed_envelope().await;
        let slow = hanging().await;
        let good = accepting(&envelope, B256::repeat_byte(0x7a)).await;
        let registry = RelayerRegistry::from_urls([slow.base_url(), good.base_url()], None);

        let receipt = fast().submit(&envelope, &registry).await.unwrap();
        assert_eq!(receipt.relayer, good.base_url());
        assert_eq!(receipt.tx_hash, B256::repeat_byte(0x7a));
        assert_eq!(receipt.request_hash, envelope.request_hash());
        assert_eq!(registry.failures(&slow.base_url()), 1);
        assert!(logs_contain("relay attempt timed out"));
    }

    #[tokio::test]
    async fn test_all_unreachable() {
        let envelope = signed_envelope().await;
        let a = hanging().await;
        let b = hanging().await;
        let registry = RelayerRegistry::from_urls([a.base_url(), b.base_url()], None);

        let err = fast().submit(&envelope, &registry).await.unwrap_err();
        assert!(matches!(err, GaslessError::RelayUnreachable { attempted: 2 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_ack_skips_relayer() {
        let envelope = signed_envelope().await;
        let liar = MockServer::start_async().await;
        liar.mock_async(|when, then| {
            when.method(POST).path("/relay");
            then.status(200).json_body(json!({
                "data": { "requestHash": B256::repeat_byte(0xff), "txHash": B256::repeat_byte(1) },
            }));
        })
        .await;
        let garbage = MockServer::start_async().await;
        garbage
            .mock_async(|when, then| {
                when.method(POST).path("/relay");
                then.status(200).body("<html>ok</html>");
            })
            .await;
        let good = accepting(&envelope, B256::repeat_byte(0x7b)).await;
        let registry =
            RelayerRegistry::from_urls([liar.base_url(), garbage.base_url(), good.base_url()], None);

        let receipt = fast().submit(&envelope, &registry).await.unwrap();
        assert_eq!(receipt.relayer, good.base_url());
    }

    #[tokio::test]
    async fn test_rejection_tries_others_then_reports() {
        let envelope = signed_envelope().await;
        let picky = rejecting("gas_price_too_low").await;
        let down = hanging().await;
        let registry = RelayerRegistry::from_urls([picky.base_url(), down.base_url()], None);

        let err = fast().submit(&envelope, &registry).await.unwrap_err();
        match err {
            GaslessError::RelayRejected { relayer, reason } => {
                assert_eq!(relayer, picky.base_url());
                assert_eq!(reason, "gas_price_too_low");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_reason_mentioning_expiry_does_not_stop_the_pass() {
        let envelope = signed_envelope().await;
        let wordy = rejecting("signature not expired but nonce used").await;
        let good = accepting(&envelope, B256::repeat_byte(0x7d)).await;
        let registry = RelayerRegistry::from_urls([wordy.base_url(), good.base_url()], None);

        let receipt = fast().submit(&envelope, &registry).await.unwrap();
        assert_eq!(receipt.relayer, good.base_url());
    }

    #[tokio::test]
    async fn test_expiry_stops_the_pass() {
        let envelope = signed_envelope().await;
        let stale = rejecting("expired").await;
        let later = MockServer::start_async().await;
        let later_mock = later
            .mock_async(|when, then| {
                when.method(POST).path("/relay");
                then.status(200).json_body(json!({ "data": null }));
            })
            .await;
        let registry = RelayerRegistry::from_urls([stale.base_url(), later.base_url()], None);

        let err = fast().submit(&envelope, &registry).await.unwrap_err();
        assert!(matches!(err, GaslessError::Expired { valid_until } if valid_until == envelope.request().valid_until));
        later_mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_ping_filters_wrong_chain() {
        let envelope = signed_envelope().await;
        let foreign = MockServer::start_async().await;
        foreign
            .mock_async(|when, then| {
                when.method(GET).path("/getaddr");
                then.status(200).json_body(json!({
                    "data": { "ready": true, "chainId": 1, "relayWorkerAddress": alloy::primitives::Address::ZERO },
                }));
            })
            .await;
        let foreign_relay = foreign
            .mock_async(|when, then| {
                when.method(POST).path("/relay");
                then.status(200).json_body(json!({ "data": null }));
            })
            .await;
        let good = accepting(&envelope, B256::repeat_byte(0x7c)).await;
        good.mock_async(|when, then| {
            when.method(GET).path("/getaddr");
            then.status(200).json_body(json!({
                "data": {
                    "ready": true,
                    "chainId": envelope.domain().chain_id,
                    "relayWorkerAddress": alloy::primitives::Address::ZERO,
                },
            }));
        })
        .await;

        let transport = RelayTransport::new(TransportConfig { per_attempt_timeout_ms: 500, ping_before_submit: true });
        let registry = RelayerRegistry::from_urls([foreign.base_url(), good.base_url()], None);
        let receipt = transport.submit(&envelope, &registry).await.unwrap();
        assert_eq!(receipt.relayer, good.base_url());
        foreign_relay.assert_hits_async(0).await;
    }

    #[test]
    fn test_expiry_reason_matching() {
        assert!(is_expiry_reason("expired"));
        assert!(is_expiry_reason(" EXPIRED "));
        assert!(!is_expiry_reason("Request expired at block 12"));
        assert!(!is_expiry_reason("signature not expired but nonce used"));
        assert!(!is_expiry_reason("gas_price_too_low"));
    }
}
