//! End-to-end gasless relaying.
//!
//! Coordinates the builder, signer, sponsor policy, relay transport and
//! reconciler so that each intent resolves to exactly one [`RelayOutcome`]
//! and the account's relay nonce moves only when the forwarder consumed it.

pub mod config;

pub use config::{ClientConfig, SponsorEndpoint};

use alloy::primitives::{Address, B256};
use gasless_builder::{RelayIntent, RequestBuilder};
use gasless_chain::{ChainReader, RpcChainReader};
use gasless_crypto::RequestSigner;
use gasless_nonce::{NonceReservation, NonceTracker};
use gasless_reconcile::{OutcomeHandle, Reconciler};
use gasless_relay::{RelayTransport, RelayerRegistry, SubmissionReceipt};
use gasless_sponsor::{HttpSponsorClient, SponsorPolicy};
use gasless_types::{GaslessError, OutcomeStatus, RelayOutcome, Result, SignedRelayEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A signed envelope holding its account's nonce reservation.
///
/// Dropping it returns the nonce without advancing.
#[derive(Debug)]
pub struct PendingRelay {
    envelope: SignedRelayEnvelope,
    reservation: NonceReservation,
}

impl PendingRelay {
    pub fn envelope(&self) -> &SignedRelayEnvelope {
        &self.envelope
    }

    pub fn request_hash(&self) -> B256 {
        self.envelope.request_hash()
    }
}

/// Gasless relay client for one chain and forwarder.
pub struct GaslessClient {
    chain: Arc<dyn ChainReader>,
    nonces: Arc<NonceTracker>,
    builder: RequestBuilder,
    signer: RequestSigner,
    sponsor: Arc<dyn SponsorPolicy>,
    relayers: Arc<RelayerRegistry>,
    transport: RelayTransport,
    reconciler: Reconciler,
    max_submit_rounds: u32,
    retry_backoff: Duration,
}

impl GaslessClient {
    /// Assemble a client from explicit components.
    pub fn new(
        config: &ClientConfig,
        chain: Arc<dyn ChainReader>,
        sponsor: Arc<dyn SponsorPolicy>,
        relayers: Arc<RelayerRegistry>,
    ) -> Self {
        let nonces = Arc::new(NonceTracker::new(chain.clone()));
        let builder = RequestBuilder::new(chain.clone(), nonces.clone(), config.builder.clone());
        let reconciler =
            Reconciler::new(chain.clone(), config.reconcile.clone()).with_relayers(relayers.clone());
        Self {
            chain,
            nonces,
            builder,
            signer: RequestSigner::new(config.domain()),
            sponsor,
            relayers,
            transport: RelayTransport::new(config.transport.clone()),
            reconciler,
            max_submit_rounds: config.max_submit_rounds.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Build a client talking JSON-RPC, HTTP sponsors and HTTP relayers.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let rpc_url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| GaslessError::Config("rpc_url is required".into()))?;
        let chain = Arc::new(RpcChainReader::new(rpc_url, config.forwarder, config.relay_hub)?);

        let sponsor = config
            .sponsors
            .iter()
            .fold(HttpSponsorClient::new(Some(config.sponsor_timeout_ms)), |client, endpoint| {
                client.with_endpoint(endpoint.sponsor, &endpoint.url)
            });
        let relayers = Arc::new(RelayerRegistry::from_urls(&config.relayers, Some(config.relayer_timeout_ms)));

        tracing::info!(
            chain_id = config.chain_id,
            forwarder = %config.forwarder,
            relayers = config.relayers.len(),
            "gasless client configured"
        );
        Ok(Self::new(config, chain, Arc::new(sponsor), relayers))
    }

    pub fn nonces(&self) -> &NonceTracker {
        &self.nonces
    }

    pub fn relayers(&self) -> &Arc<RelayerRegistry> {
        &self.relayers
    }

    /// Build and sign a request for `intent`.
    ///
    /// Waits while another request from the same account is in flight.
    pub async fn prepare(&self, intent: &RelayIntent) -> Result<PendingRelay> {
        let built = self.builder.build(intent).await?;
        self.nonces.ensure_expected(built.request.from, built.request.nonce).await?;
        let envelope = self.signer.sign(built.request, &intent.account).await?;
        Ok(PendingRelay { envelope, reservation: built.reservation })
    }

    /// Ask the sponsor to fund the request and attach its approval.
    pub async fn approve(&self, pending: PendingRelay) -> Result<PendingRelay> {
        let PendingRelay { envelope, reservation } = pending;
        let approval = self.sponsor.preflight(envelope.request(), envelope.request_hash()).await?;
        Ok(PendingRelay { envelope: envelope.with_sponsor_approval(approval), reservation })
    }

    /// One pass over the relayers.
    pub async fn submit(&self, pending: &PendingRelay) -> Result<SubmissionReceipt> {
        self.transport.submit(&pending.envelope, &self.relayers).await
    }

    /// Wait for the accepted envelope's outcome and apply it to the nonce.
    pub async fn finish(
        &self,
        pending: PendingRelay,
        receipt: &SubmissionReceipt,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome> {
        let mut handle = self.reconciler.watch(&pending.envelope, receipt);
        tokio::select! {
            outcome = &mut handle => {
                let outcome = outcome.inspect_err(|_| self.nonces.invalidate(pending.envelope.request().from))?;
                Ok(self.settle(pending, outcome))
            }
            _ = cancel.cancelled() => Err(self.abandon(pending, Some(handle))),
        }
    }

    /// Apply a terminal outcome to the account's nonce.
    pub fn settle(&self, pending: PendingRelay, outcome: RelayOutcome) -> RelayOutcome {
        let from = pending.envelope.request().from;
        apply_outcome(&self.nonces, pending.reservation, &outcome);

        tracing::info!(
            %from,
            request_hash = %outcome.request_hash(),
            status = %outcome.status(),
            details = outcome.details(),
            "relay finished"
        );
        outcome
    }

    /// Give up on `pending` without waiting for its outcome.
    ///
    /// Without a handle nothing was accepted, so the nonce is released and
    /// the cache invalidated. With a handle a relayer holds a live envelope:
    /// the reservation moves to a detached task and the account stays gated
    /// until the reconciler reaches a terminal outcome.
    pub fn abandon(&self, pending: PendingRelay, handle: Option<OutcomeHandle>) -> GaslessError {
        let request_hash = pending.request_hash();
        let address: Address = pending.envelope.request().from;
        let nonce = pending.envelope.request().nonce;
        tracing::warn!(%address, nonce, request_hash = %request_hash, "relay cancelled");

        let Some(handle) = handle else {
            self.nonces.invalidate(address);
            self.nonces.release(pending.reservation);
            return GaslessError::Cancelled { request_hash };
        };

        let nonces = self.nonces.clone();
        let reservation = pending.reservation;
        tokio::spawn(
            async move {
                match handle.await {
                    Ok(outcome) => {
                        if outcome.consumes_nonce() {
                            tracing::info!(%address, nonce, "cancelled relay was included");
                        }
                        apply_outcome(&nonces, reservation, &outcome);
                    }
                    Err(e) => {
                        tracing::warn!(%address, nonce, error = %e, "cancelled relay left unresolved");
                        nonces.invalidate(address);
                        nonces.release(reservation);
                    }
                }
            }
            .in_current_span(),
        );
        GaslessError::Cancelled { request_hash }
    }

    /// Relay `intent` to a terminal outcome.
    pub async fn relay(&self, intent: &RelayIntent) -> Result<RelayOutcome> {
        self.relay_with_cancel(intent, &CancellationToken::new()).await
    }

    /// Relay `intent`, stopping early when `cancel` fires.
    ///
    /// Errors are reserved for failures before anything reached a relayer
    /// and for cancellation; every other path yields an outcome.
    pub async fn relay_with_cancel(
        &self,
        intent: &RelayIntent,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome> {
        let pending = tokio::select! {
            pending = self.prepare(intent) => pending?,
            // Nothing was signed yet, so there is no request hash to report.
            _ = cancel.cancelled() => return Err(GaslessError::Cancelled { request_hash: B256::ZERO }),
        };
        let request_hash = pending.request_hash();

        let pending = match self.approve(pending).await {
            Ok(pending) => pending,
            Err(GaslessError::SponsorRejected(reason)) => {
                return Ok(RelayOutcome::sponsor_rejected(request_hash, reason.to_string()));
            }
            Err(e) => return Err(e),
        };

        let mut round = 0;
        loop {
            round += 1;
            let submitted = tokio::select! {
                res = self.submit(&pending) => res,
                _ = cancel.cancelled() => return Err(self.abandon(pending, None)),
            };

            let outcome = match submitted {
                Ok(receipt) => return self.finish(pending, &receipt, cancel).await,
                Err(GaslessError::Expired { valid_until }) => {
                    RelayOutcome::expired(request_hash, format!("relayer reported expiry at {}", valid_until))
                }
                Err(GaslessError::RelayRejected { relayer, reason }) => {
                    RelayOutcome::forwarder_rejected(request_hash, None, format!("{}: {}", relayer, reason))
                }
                Err(e) if e.is_retryable() => {
                    // An unreadable head counts as not yet expired.
                    let chain_time = match self.chain.head().await {
                        Ok(head) => Some(head.timestamp),
                        Err(err) => {
                            tracing::warn!(request_hash = %request_hash, error = %err, "head read failed between rounds");
                            None
                        }
                    };
                    if let Some(chain_time) = chain_time.filter(|t| pending.envelope.request().is_expired_at(*t)) {
                        RelayOutcome::expired(request_hash, format!("expired at chain time {}", chain_time))
                    } else if round >= self.max_submit_rounds {
                        RelayOutcome::relay_unreachable(request_hash, e.to_string())
                    } else {
                        tracing::info!(request_hash = %request_hash, round, "no relayer reachable, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(self.retry_backoff) => continue,
                            _ = cancel.cancelled() => return Err(self.abandon(pending, None)),
                        }
                    }
                }
                Err(e) => return Err(e),
            };
            return Ok(self.settle(pending, outcome));
        }
    }
}

/// Advance when the forwarder consumed the nonce, else release.
fn apply_outcome(nonces: &NonceTracker, reservation: NonceReservation, outcome: &RelayOutcome) {
    // Invalidate while still holding the reservation so the next
    // reservation for this address reads the forwarder.
    if outcome.status() == OutcomeStatus::ForwarderRejected {
        nonces.invalidate(reservation.address());
    }
    if outcome.consumes_nonce() {
        nonces.advance(reservation);
    } else {
        nonces.release(reservation);
    }
}
