//! Relay server client and envelope transport.
//!
//! - Submit signed envelopes to relay servers
//! - Fail over across an ordered relayer registry
//! - Poll a relayer for the transaction currently carrying a request

pub mod registry;
pub mod relayer_client;
pub mod transport;

pub use registry::RelayerRegistry;
pub use relayer_client::{PingResponse, RelayAck, RelayClient, RelayerResponse, SubmitReply};
pub use transport::{RelayTransport, SubmissionReceipt, TransportConfig, REJECT_EXPIRED};
