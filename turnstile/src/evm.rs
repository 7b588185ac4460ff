//! EVM JSON-RPC ledger.
//!
//! Talks to the deployed ticket registry contract. A fresh provider and wallet
//! are built for every call so one slow redemption never holds a connection
//! another redemption needs.

use crate::config::LedgerConfig;
use crate::ledger::{
    LedgerError, LedgerFuture, PendingRedemption, RedemptionLedger, RedemptionReceipt,
    RedemptionRequest,
};
use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::RpcError;
use alloy::transports::http::reqwest::Url;
use std::fmt;
use std::time::Duration;

sol! {
    /// Ticket registry contract
    #[sol(rpc)]
    interface ITicketRegistry {
        /// Mark a ticket as used; reverts if it already is
        function markTicketAsUsed(address holder, string ticketId, uint256 quantity) external;
    }
}

/// Ledger backed by an EVM chain
#[derive(Clone)]
pub struct EvmLedger {
    rpc_url: Url,
    redeemer: PrivateKeySigner,
    contract: Address,
    poll_interval: Duration,
}

impl fmt::Debug for EvmLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmLedger")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("redeemer", &self.redeemer.address())
            .field("contract", &self.contract)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl EvmLedger {
    /// Create a ledger client
    #[must_use]
    pub const fn new(
        rpc_url: Url,
        redeemer: PrivateKeySigner,
        contract: Address,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rpc_url,
            redeemer,
            contract,
            poll_interval,
        }
    }

    /// Create a ledger client from loaded configuration
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            config.rpc_url.clone(),
            config.redeemer.clone(),
            config.contract_address,
            config.receipt_poll_interval,
        )
    }
}

impl RedemptionLedger for EvmLedger {
    fn mark_ticket_as_used(&self, request: RedemptionRequest) -> LedgerFuture<PendingRedemption> {
        let ledger = self.clone();
        Box::pin(async move {
            let wallet = EthereumWallet::from(ledger.redeemer);
            let provider = ProviderBuilder::new()
                .wallet(wallet)
                .connect_http(ledger.rpc_url);
            let registry = ITicketRegistry::new(ledger.contract, provider);

            let pending = registry
                .markTicketAsUsed(
                    request.holder,
                    request.ticket_id.clone(),
                    U256::from(request.quantity),
                )
                .send()
                .await
                .map_err(classify_contract_error)?;

            Ok(PendingRedemption {
                ticket_id: request.ticket_id,
                tx_hash: *pending.tx_hash(),
            })
        })
    }

    fn wait(&self, pending: PendingRedemption) -> LedgerFuture<RedemptionReceipt> {
        let rpc_url = self.rpc_url.clone();
        let poll_interval = self.poll_interval;
        Box::pin(async move {
            let provider = ProviderBuilder::new().connect_http(rpc_url);

            // Polls until the caller's deadline; a dropped connection does not
            // mean the transaction was dropped.
            loop {
                let receipt = match provider.get_transaction_receipt(pending.tx_hash).await {
                    Ok(receipt) => receipt,
                    Err(error) => {
                        tracing::warn!(
                            tx_hash = %pending.tx_hash,
                            error = %error,
                            "Receipt lookup failed, polling again"
                        );
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    },
                };

                match receipt {
                    Some(receipt) if receipt.status() => {
                        return Ok(RedemptionReceipt {
                            ticket_id: pending.ticket_id,
                            tx_hash: pending.tx_hash,
                            block_number: receipt.block_number(),
                        });
                    },
                    Some(_) => {
                        return Err(LedgerError::Reverted {
                            tx_hash: pending.tx_hash,
                        });
                    },
                    None => {
                        tracing::trace!(tx_hash = %pending.tx_hash, "Receipt not available yet");
                        tokio::time::sleep(poll_interval).await;
                    },
                }
            }
        })
    }
}

/// Split contract call failures into ledger refusals and transport failures
///
/// A JSON-RPC error response means the node answered and refused (for example
/// gas estimation hit the contract's revert for a used ticket). Anything else
/// on the transport means the node was not reached.
fn classify_contract_error(error: alloy::contract::Error) -> LedgerError {
    match error {
        alloy::contract::Error::TransportError(RpcError::ErrorResp(payload)) => {
            LedgerError::Rejected {
                reason: payload.message.to_string(),
            }
        },
        alloy::contract::Error::TransportError(other) => LedgerError::Network {
            message: other.to_string(),
        },
        other => LedgerError::Rejected {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_node_is_a_network_error() {
        // Nothing listens on port 9 (discard) on loopback in test environments.
        let ledger = EvmLedger::new(
            "http://127.0.0.1:9".parse().unwrap(),
            PrivateKeySigner::random(),
            Address::repeat_byte(0x11),
            Duration::from_millis(10),
        );

        let result = ledger
            .mark_ticket_as_used(RedemptionRequest {
                holder: Address::repeat_byte(0x22),
                ticket_id: "T-1".to_string(),
                quantity: 1,
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Network { .. })));
    }

    #[tokio::test]
    async fn confirmation_keeps_polling_through_transport_errors() {
        let ledger = EvmLedger::new(
            "http://127.0.0.1:9".parse().unwrap(),
            PrivateKeySigner::random(),
            Address::repeat_byte(0x11),
            Duration::from_millis(10),
        );
        let pending = PendingRedemption {
            ticket_id: "T-1".to_string(),
            tx_hash: alloy::primitives::TxHash::repeat_byte(0x33),
        };

        let result =
            tokio::time::timeout(Duration::from_millis(200), ledger.wait(pending)).await;

        assert!(result.is_err(), "wait gave up before the deadline: {result:?}");
    }

    #[test]
    fn debug_does_not_leak_the_redeemer_key() {
        let signer = PrivateKeySigner::random();
        let key = alloy::hex::encode(signer.to_bytes());
        let ledger = EvmLedger::new(
            "http://localhost:8545".parse().unwrap(),
            signer,
            Address::ZERO,
            Duration::from_secs(1),
        );

        let rendered = format!("{ledger:?}");
        assert!(rendered.contains("localhost:8545"));
        assert!(!rendered.contains(&key));
    }
}
