//! Per-account relay nonce tracking.
//!
//! The forwarder's on-chain nonce is the source of truth; this tracker caches
//! the next expected value per address and hands out reservations so that at
//! most one request per address is in flight at a time.
//!
//! - `reserve`: wait for the address gate, then take the next nonce
//! - `advance`: the forwarder consumed the reserved nonce
//! - `release`: the reserved nonce was not consumed (also what dropping does)

use alloy::primitives::Address;
use dashmap::DashMap;
use gasless_chain::ChainReader;
use gasless_types::{GaslessError, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct SlotState {
    next: Option<u64>,
    /// Set when the cached value may be ahead of or behind the forwarder.
    stale: bool,
}

#[derive(Debug)]
struct Slot {
    gate: Arc<Semaphore>,
    state: Mutex<SlotState>,
}

impl Slot {
    fn new() -> Self {
        Self { gate: Arc::new(Semaphore::new(1)), state: Mutex::new(SlotState::default()) }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self) -> Option<u64> {
        let state = self.state();
        if state.stale { None } else { state.next }
    }

    /// Merge a freshly read forwarder nonce into the cache.
    fn load(&self, onchain: u64) -> u64 {
        let mut state = self.state();
        let next = match (state.next, state.stale) {
            (Some(cached), false) => cached.max(onchain),
            _ => onchain,
        };
        state.next = Some(next);
        state.stale = false;
        next
    }
}

/// A nonce held for one in-flight request.
///
/// Dropping the reservation returns the nonce without advancing.
pub struct NonceReservation {
    address: Address,
    nonce: u64,
    _permit: OwnedSemaphorePermit,
}

impl NonceReservation {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

impl fmt::Debug for NonceReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceReservation")
            .field("address", &self.address)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Addresses cached before idle slots are evicted.
pub const DEFAULT_SLOT_CAPACITY: usize = 10_000;

/// Caches the next relay nonce per address and serializes reservations.
pub struct NonceTracker {
    chain: Arc<dyn ChainReader>,
    slots: DashMap<Address, Arc<Slot>>,
    capacity: usize,
}

impl NonceTracker {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain, slots: DashMap::new(), capacity: DEFAULT_SLOT_CAPACITY }
    }

    /// Evict idle slots once more than `capacity` addresses are cached.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Drop slots nobody holds or waits on. Their next read comes from the
    /// forwarder. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let before = self.slots.len();
        // `retain` holds the shard lock, so no `slot()` clone can race the
        // strong count check.
        self.slots
            .retain(|_, slot| Arc::strong_count(slot) > 1 || slot.gate.available_permits() == 0);
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.slots.len(), "evicted idle nonce slots");
        }
        evicted
    }

    fn slot(&self, address: Address) -> Arc<Slot> {
        // Holds the dashmap shard lock only long enough to clone the `Arc`.
        let entry = self.slots.entry(address).or_insert_with(|| Arc::new(Slot::new()));
        Arc::clone(entry.value())
    }

    /// Next nonce the forwarder is expected to accept from `address`.
    pub async fn next_nonce(&self, address: Address) -> Result<u64> {
        let slot = self.slot(address);
        if let Some(next) = slot.cached() {
            return Ok(next);
        }

        tracing::trace!(%address, "fetching forwarder nonce");
        let onchain = self.chain.forwarder_nonce(address).await?;
        Ok(slot.load(onchain))
    }

    /// Wait until no other reservation for `address` is in flight, then take
    /// the next nonce.
    pub async fn reserve(&self, address: Address) -> Result<NonceReservation> {
        if self.slots.len() >= self.capacity && !self.slots.contains_key(&address) {
            self.evict_idle();
        }
        let slot = self.slot(address);
        let permit = slot
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GaslessError::Other(format!("nonce gate for {} closed", address)))?;

        let nonce = self.next_nonce(address).await?;
        tracing::debug!(%address, nonce, "reserved relay nonce");
        Ok(NonceReservation { address, nonce, _permit: permit })
    }

    /// Check a reserved `nonce` against a fresh forwarder read.
    ///
    /// The forwarder being ahead means something else consumed the nonce; the
    /// cache is invalidated and `NonceMismatch` returned. Being behind is the
    /// normal lag after an advance.
    pub async fn ensure_expected(&self, address: Address, nonce: u64) -> Result<()> {
        let onchain = self.chain.forwarder_nonce(address).await?;
        if onchain > nonce {
            tracing::warn!(%address, nonce, onchain, "forwarder nonce ahead of reservation");
            self.invalidate(address);
            return Err(GaslessError::NonceMismatch { expected: onchain, got: nonce });
        }
        Ok(())
    }

    /// The forwarder consumed the reserved nonce.
    pub fn advance(&self, reservation: NonceReservation) {
        let slot = self.slot(reservation.address);
        let next = {
            let mut state = slot.state();
            let next = state.next.unwrap_or(reservation.nonce).max(reservation.nonce + 1);
            state.next = Some(next);
            next
        };
        tracing::info!(address = %reservation.address, next, "relay nonce advanced");
    }

    /// Return an unconsumed reservation so the same nonce can be used again.
    pub fn release(&self, reservation: NonceReservation) {
        tracing::debug!(
            address = %reservation.address,
            nonce = reservation.nonce,
            "relay nonce released"
        );
    }

    /// Record an inclusion observed after its reservation was released.
    pub fn observe_consumed(&self, address: Address, nonce: u64) {
        let slot = self.slot(address);
        let mut state = slot.state();
        if let Some(next) = state.next {
            state.next = Some(next.max(nonce + 1));
        }
        tracing::info!(%address, nonce, "late inclusion observed");
    }

    /// Force the next read for `address` to come from the forwarder.
    pub fn invalidate(&self, address: Address) {
        self.slot(address).state().stale = true;
        tracing::info!(%address, "nonce cache invalidated");
    }

    /// Whether a reservation for `address` is currently held.
    pub fn in_flight(&self, address: Address) -> bool {
        self.slots
            .get(&address)
            .map(|slot| slot.gate.available_permits() == 0)
            .unwrap_or(false)
    }
}

impl fmt::Debug for NonceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceTracker")
            .field("addresses", &self.slots.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
