//! Accounts, key custody and request signing.
//!
//! - `LocalKey`: in-process secp256k1 key (hex, seed-derived or random)
//! - `RemoteCustodian`: key held by an external signing service
//! - `RequestSigner`: EIP-712 signing of relay requests into envelopes

pub mod account;
pub mod custodian;
pub mod keys;
pub mod signer;

pub use account::{Account, LocalKey, SigningCapability};
pub use custodian::RemoteCustodian;
pub use signer::RequestSigner;
