//! Receipt reconciliation for submitted envelopes.
//!
//! Each watched envelope gets one polling task that settles on exactly one
//! terminal [`RelayOutcome`]:
//! - relayed call found on-chain: `Included`, `TargetReverted`,
//!   `ForwarderRejected` or `SponsorRejected` from the hub events
//! - chain time reached `validUntil` without a receipt: `Included` without a
//!   reference when the forwarder nonce moved past the request, else `Expired`
//!
//! A chain that stays unreadable past `validUntil` plus the configured grace
//! resolves the handle with `GaslessError::Chain` instead.

use alloy::primitives::{Address, B256};
use gasless_chain::{CallStatus, ChainReader, RelayedCall};
use gasless_relay::{RelayerRegistry, SubmissionReceipt};
use gasless_types::{GaslessError, RelayOutcome, Result, SignedRelayEnvelope};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tracing::Instrument;

/// Reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub poll_interval_ms: u64,
    /// Ask the accepting relayer for replacement transaction hashes.
    pub refresh_tx_hash: bool,
    /// Seconds past `validUntil` to keep polling a chain that cannot be read.
    pub give_up_after_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            refresh_tx_hash: true,
            give_up_after_secs: 120,
        }
    }
}

/// Reconciliation event for progress reporting.
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    Watching { request_hash: B256, tx_hash: B256 },
    TxReplaced { request_hash: B256, tx_hash: B256 },
    Settled { outcome: RelayOutcome },
}

/// Callback type for reconciliation events.
pub type ReconcileEventHandler = Arc<dyn Fn(ReconcileEvent) + Send + Sync>;

/// What one polling task tracks.
#[derive(Debug, Clone)]
struct Watch {
    request_hash: B256,
    from: Address,
    nonce: u64,
    valid_until: u64,
    relayer: String,
    tx_hashes: Vec<B256>,
    /// Last head timestamp read and when it was read.
    clock: Option<(u64, Instant)>,
}

impl Watch {
    /// Chain time extrapolated from the last head read, or wall-clock time
    /// when no head was ever read.
    fn estimated_chain_time(&self) -> u64 {
        match self.clock {
            Some((timestamp, at)) => timestamp.saturating_add(at.elapsed().as_secs()),
            None => SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default(),
        }
    }
}

/// Eventual outcome of one watched envelope.
///
/// Dropping the handle stops nobody: the polling task still runs to its
/// terminal outcome.
#[derive(Debug)]
pub struct OutcomeHandle {
    request_hash: B256,
    rx: oneshot::Receiver<Result<RelayOutcome>>,
}

impl OutcomeHandle {
    pub fn request_hash(&self) -> B256 {
        self.request_hash
    }
}

impl Future for OutcomeHandle {
    type Output = Result<RelayOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let request_hash = self.request_hash;
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.map_err(|_| GaslessError::Other(format!("reconciler for {} stopped", request_hash)))
                .and_then(|outcome| outcome)
        })
    }
}

/// Watches relayed transactions until their outcome is final.
#[derive(Clone)]
pub struct Reconciler {
    chain: Arc<dyn ChainReader>,
    relayers: Option<Arc<RelayerRegistry>>,
    config: ReconcileConfig,
    on_event: Option<ReconcileEventHandler>,
}

impl Reconciler {
    pub fn new(chain: Arc<dyn ChainReader>, config: ReconcileConfig) -> Self {
        Self { chain, relayers: None, config, on_event: None }
    }

    /// Relayers to ask for replacement transaction hashes.
    pub fn with_relayers(mut self, relayers: Arc<RelayerRegistry>) -> Self {
        self.relayers = Some(relayers);
        self
    }

    pub fn with_event_handler(mut self, handler: ReconcileEventHandler) -> Self {
        self.on_event = Some(handler);
        self
    }

    fn emit(&self, event: ReconcileEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    /// Spawn the polling task for an accepted envelope.
    pub fn watch(&self, envelope: &SignedRelayEnvelope, receipt: &SubmissionReceipt) -> OutcomeHandle {
        let request = envelope.request();
        let watch = Watch {
            request_hash: receipt.request_hash,
            from: request.from,
            nonce: request.nonce,
            valid_until: request.valid_until,
            relayer: receipt.relayer.clone(),
            tx_hashes: vec![receipt.tx_hash],
            clock: None,
        };
        self.emit(ReconcileEvent::Watching {
            request_hash: watch.request_hash,
            tx_hash: receipt.tx_hash,
        });

        let (tx, rx) = oneshot::channel();
        let reconciler = self.clone();
        let task = async move {
            let request_hash = watch.request_hash;
            let outcome = reconciler.run(watch).await;
            if let Ok(ref outcome) = outcome {
                reconciler.emit(ReconcileEvent::Settled { outcome: outcome.clone() });
            }
            if tx.send(outcome).is_err() {
                tracing::debug!(request_hash = %request_hash, "outcome receiver dropped");
            }
        };
        tokio::spawn(task.in_current_span());

        OutcomeHandle { request_hash: receipt.request_hash, rx }
    }

    /// Chain time after which an unreadable chain ends the watch.
    fn give_up_at(&self, watch: &Watch) -> u64 {
        watch.valid_until.saturating_add(self.config.give_up_after_secs)
    }

    async fn run(&self, mut watch: Watch) -> Result<RelayOutcome> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            match self.poll_once(&mut watch).await {
                Ok(Some(outcome)) => {
                    tracing::info!(
                        request_hash = %watch.request_hash,
                        status = %outcome.status(),
                        "relay outcome settled"
                    );
                    return Ok(outcome);
                }
                Ok(None) => {}
                Err(e) if watch.estimated_chain_time() >= self.give_up_at(&watch) => {
                    tracing::error!(
                        request_hash = %watch.request_hash,
                        valid_until = watch.valid_until,
                        error = %e,
                        "chain unreadable past validUntil, giving up"
                    );
                    return Err(GaslessError::Chain(format!(
                        "no outcome for {}: chain unreadable past validUntil {}: {}",
                        watch.request_hash, watch.valid_until, e
                    )));
                }
                Err(e) => {
                    tracing::warn!(request_hash = %watch.request_hash, error = %e, "reconcile poll failed");
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn refresh_tx_hash(&self, watch: &mut Watch) {
        if !self.config.refresh_tx_hash {
            return;
        }
        let Some(relayer) = self.relayers.as_ref().and_then(|r| r.get(&watch.relayer)) else {
            return;
        };
        match relayer.get_tx_hash(watch.request_hash).await {
            Ok(Some(tx_hash)) if !watch.tx_hashes.contains(&tx_hash) => {
                tracing::info!(request_hash = %watch.request_hash, %tx_hash, "relayer replaced transaction");
                watch.tx_hashes.push(tx_hash);
                self.emit(ReconcileEvent::TxReplaced { request_hash: watch.request_hash, tx_hash });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(relayer = %watch.relayer, error = %e, "tx hash refresh failed");
            }
        }
    }

    async fn poll_once(&self, watch: &mut Watch) -> Result<Option<RelayOutcome>> {
        self.refresh_tx_hash(watch).await;

        // Newest replacement first. A failed lookup must not hold up the
        // expiry check below.
        let mut lookup_error = None;
        for tx_hash in watch.tx_hashes.iter().rev() {
            match self.chain.relayed_call(*tx_hash, watch.from).await {
                Ok(Some(call)) => return Ok(Some(settle(watch.request_hash, &call))),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(request_hash = %watch.request_hash, %tx_hash, error = %e, "receipt lookup failed");
                    lookup_error = Some(e);
                }
            }
        }

        let chain_time = match self.chain.head().await {
            Ok(head) => {
                watch.clock = Some((head.timestamp, Instant::now()));
                head.timestamp
            }
            // An estimate only counts once it is past the grace period.
            Err(e) if watch.estimated_chain_time() < self.give_up_at(watch) => return Err(e),
            Err(_) => watch.estimated_chain_time(),
        };
        if chain_time < watch.valid_until {
            return lookup_error.map_or(Ok(None), Err);
        }

        let onchain = self.chain.forwarder_nonce(watch.from).await?;
        if onchain > watch.nonce {
            return Ok(Some(RelayOutcome::included(
                watch.request_hash,
                None,
                format!("forwarder nonce {} consumed without a known receipt", watch.nonce),
            )));
        }
        Ok(Some(RelayOutcome::expired(
            watch.request_hash,
            format!("not included by chain time {} (validUntil {})", chain_time, watch.valid_until),
        )))
    }
}

fn settle(request_hash: B256, call: &RelayedCall) -> RelayOutcome {
    match &call.status {
        CallStatus::Succeeded => RelayOutcome::included(
            request_hash,
            Some(call.tx_hash),
            format!("included in block {}", call.block_number),
        ),
        CallStatus::TargetReverted { reason } => {
            RelayOutcome::target_reverted(request_hash, call.tx_hash, reason.clone())
        }
        CallStatus::ForwarderRejected { reason } => {
            RelayOutcome::forwarder_rejected(request_hash, Some(call.tx_hash), reason.clone())
        }
        CallStatus::SponsorRejected { reason } => RelayOutcome::sponsor_rejected(request_hash, reason.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, U256};
    use gasless_chain::MemoryChain;
    use gasless_crypto::{Account, LocalKey, RequestSigner};
    use gasless_types::{OutcomeStatus, RelayRequest, SigningDomain};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    const START: u64 = 1_700_000_000;

    async fn envelope(nonce: u64) -> SignedRelayEnvelope {
        let account = Account::new(Arc::new(LocalKey::random()));
        let request = RelayRequest {
            from: account.address(),
            to: Address::repeat_byte(0xc0),
            value: U256::ZERO,
            gas: 150_000,
            nonce,
            data: Bytes::from_static(&[0x01]),
            valid_until: START + 60,
            sponsor: Address::repeat_byte(0x50),
        };
        RequestSigner::new(SigningDomain::new(1337, Address::repeat_byte(0xf0)))
            .sign(request, &account)
            .await
            .unwrap()
    }

    fn receipt(envelope: &SignedRelayEnvelope, relayer: &str, tx_hash: B256) -> SubmissionReceipt {
        SubmissionReceipt {
            relayer: relayer.to_string(),
            request_hash: envelope.request_hash(),
            tx_hash,
        }
    }

    fn reconciler(chain: Arc<MemoryChain>) -> Reconciler {
        Reconciler::new(chain, ReconcileConfig { poll_interval_ms: 10, ..ReconcileConfig::default() })
    }

    async fn settle_within(handle: OutcomeHandle) -> RelayOutcome {
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_included_after_receipt_appears() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        let tx = B256::repeat_byte(0x7a);

        let handle = reconciler(chain.clone()).watch(&env, &receipt(&env, "http://r", tx));
        assert_eq!(handle.request_hash(), env.request_hash());
        tokio::time::sleep(Duration::from_millis(30)).await;
        chain.include(tx, env.request().from, CallStatus::Succeeded);

        let outcome = settle_within(handle).await;
        assert_eq!(outcome.status(), OutcomeStatus::Included);
        assert_eq!(outcome.tx_reference(), Some(tx));
        assert_eq!(outcome.request_hash(), env.request_hash());
    }

    #[tokio::test]
    async fn test_hub_statuses_map_to_outcomes() {
        let cases = [
            (CallStatus::TargetReverted { reason: "revert".into() }, OutcomeStatus::TargetReverted, true),
            (CallStatus::ForwarderRejected { reason: "nonce".into() }, OutcomeStatus::ForwarderRejected, true),
            (CallStatus::SponsorRejected { reason: "pm".into() }, OutcomeStatus::SponsorRejected, false),
        ];

        for (status, expected, has_reference) in cases {
            let chain = Arc::new(MemoryChain::default());
            let env = envelope(0).await;
            let tx = B256::repeat_byte(0x7a);
            chain.include(tx, env.request().from, status);

            let outcome = settle_within(reconciler(chain).watch(&env, &receipt(&env, "http://r", tx))).await;
            assert_eq!(outcome.status(), expected);
            assert_eq!(outcome.tx_reference().is_some(), has_reference);
        }
    }

    #[tokio::test]
    async fn test_expired_without_inclusion() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        let handle = reconciler(chain.clone()).watch(&env, &receipt(&env, "http://r", B256::repeat_byte(1)));

        chain.advance_time(60);
        let outcome = settle_within(handle).await;
        assert_eq!(outcome.status(), OutcomeStatus::Expired);
        assert!(!outcome.consumes_nonce());
    }

    #[tokio::test]
    async fn test_consumed_nonce_without_receipt_counts_as_included() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        let handle = reconciler(chain.clone()).watch(&env, &receipt(&env, "http://r", B256::repeat_byte(1)));

        chain.set_nonce(env.request().from, 1);
        chain.advance_time(120);
        let outcome = settle_within(handle).await;
        assert_eq!(outcome.status(), OutcomeStatus::Included);
        assert_eq!(outcome.tx_reference(), None);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_follows_replacement_transaction() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        let original = B256::repeat_byte(0x01);
        let replacement = B256::repeat_byte(0x02);

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/txhash")
                    .query_param("requestHash", env.request_hash().to_string());
                then.status(200).json_body(json!({ "code": 0, "data": replacement }));
            })
            .await;
        let registry = Arc::new(RelayerRegistry::from_urls([server.base_url()], Some(1_000)));

        let events = Arc::new(Mutex::new(Vec::<ReconcileEvent>::new()));
        let sink = events.clone();
        let reconciler = reconciler(chain.clone())
            .with_relayers(registry)
            .with_event_handler(Arc::new(move |event: ReconcileEvent| sink.lock().unwrap().push(event)));

        chain.include(replacement, env.request().from, CallStatus::Succeeded);
        let outcome = settle_within(reconciler.watch(&env, &receipt(&env, &server.base_url(), original))).await;
        assert_eq!(outcome.tx_reference(), Some(replacement));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(ReconcileEvent::Watching { tx_hash, .. }) if *tx_hash == original));
        assert!(events
            .iter()
            .any(|e| matches!(e, ReconcileEvent::TxReplaced { tx_hash, .. } if *tx_hash == replacement)));
        assert!(matches!(events.last(), Some(ReconcileEvent::Settled { .. })));
    }

    #[tokio::test]
    async fn test_task_outlives_dropped_handle() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        let tx = B256::repeat_byte(0x7a);
        let (settled_tx, settled_rx) = std::sync::mpsc::channel();
        let settled_tx = Mutex::new(settled_tx);

        let reconciler = reconciler(chain.clone()).with_event_handler(Arc::new(move |event: ReconcileEvent| {
            if let ReconcileEvent::Settled { outcome } = event {
                let _ = settled_tx.lock().unwrap().send(outcome);
            }
        }));
        drop(reconciler.watch(&env, &receipt(&env, "http://r", tx)));

        chain.include(tx, env.request().from, CallStatus::Succeeded);
        let outcome = tokio::task::spawn_blocking(move || settled_rx.recv_timeout(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status(), OutcomeStatus::Included);
    }

    #[tokio::test]
    async fn test_failed_receipt_lookup_still_expires() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        chain.set_receipts_down(true);
        let handle = reconciler(chain.clone()).watch(&env, &receipt(&env, "http://r", B256::repeat_byte(1)));

        chain.advance_time(60);
        let outcome = settle_within(handle).await;
        assert_eq!(outcome.status(), OutcomeStatus::Expired);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreadable_chain_gives_up_after_grace() {
        let chain = Arc::new(MemoryChain::default());
        chain.set_rpc_down(true);
        // validUntil lies far behind wall-clock time and no head was ever read.
        let env = envelope(0).await;
        let reconciler = Reconciler::new(
            chain.clone(),
            ReconcileConfig { poll_interval_ms: 10, give_up_after_secs: 0, ..ReconcileConfig::default() },
        );

        let handle = reconciler.watch(&env, &receipt(&env, "http://r", B256::repeat_byte(1)));
        let err = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap_err();
        assert!(matches!(err, GaslessError::Chain(_)));
        assert!(logs_contain("giving up"));
    }

    #[tokio::test]
    async fn test_unreadable_chain_keeps_waiting_within_grace() {
        let chain = Arc::new(MemoryChain::default());
        let env = envelope(0).await;
        let tx = B256::repeat_byte(0x7a);
        let handle = reconciler(chain.clone()).watch(&env, &receipt(&env, "http://r", tx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        chain.set_rpc_down(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        chain.include(tx, env.request().from, CallStatus::Succeeded);
        chain.set_rpc_down(false);

        let outcome = settle_within(handle).await;
        assert_eq!(outcome.status(), OutcomeStatus::Included);
    }

    #[test]
    fn test_config_from_json() {
        let config: ReconcileConfig = serde_json::from_str(r#"{"poll_interval_ms": 250}"#).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert!(config.refresh_tx_hash);
        assert_eq!(config.give_up_after_secs, 120);
    }
}
