//! Forwarder and relay hub bindings, and receipt log decoding.

use alloy::primitives::{Address, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use gasless_types::bytes_to_hex;

use crate::CallStatus;

sol! {
    #[sol(rpc)]
    interface IForwarder {
        function getNonce(address from) external view returns (uint256);
    }

    interface IRelayHub {
        event TransactionRelayed(
            address indexed relayManager,
            address indexed relayWorker,
            address indexed from,
            address to,
            address paymaster,
            bytes4 selector,
            uint8 status,
            uint256 charge
        );

        event TransactionRejectedByPaymaster(
            address indexed relayManager,
            address indexed paymaster,
            address indexed from,
            address to,
            address relayWorker,
            bytes4 selector,
            uint256 innerGasUsed,
            bytes reason
        );
    }
}

/// Find the hub event describing the call relayed for `from`.
pub fn decode_hub_logs<'a>(
    relay_hub: Address,
    from: Address,
    logs: impl IntoIterator<Item = &'a Log>,
) -> Option<CallStatus> {
    for log in logs {
        if log.address != relay_hub {
            continue;
        }
        match log.topics().first() {
            Some(topic) if *topic == IRelayHub::TransactionRelayed::SIGNATURE_HASH => {
                if let Ok(event) = IRelayHub::TransactionRelayed::decode_log_data(&log.data) {
                    if event.from == from {
                        return Some(CallStatus::from_hub_status(event.status));
                    }
                }
            }
            Some(topic) if *topic == IRelayHub::TransactionRejectedByPaymaster::SIGNATURE_HASH => {
                if let Ok(event) = IRelayHub::TransactionRejectedByPaymaster::decode_log_data(&log.data) {
                    if event.from == from {
                        return Some(CallStatus::SponsorRejected { reason: bytes_to_hex(&event.reason) });
                    }
                }
            }
            _ => {}
        }
    }
    None
}
