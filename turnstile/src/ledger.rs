//! Redemption ledger abstraction.
//!
//! The ledger is the system of record for redemption state. It exposes one
//! state-changing call, `markTicketAsUsed`, plus a wait for that call's
//! confirmation. The contract is expected to reject a ticket id it has already
//! marked; nothing in this crate re-checks that.

use crate::verifier::VerifiedClaim;
use alloy::primitives::{Address, TxHash, keccak256};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Ledger result
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Boxed future returned by ledger calls
pub type LedgerFuture<T> = Pin<Box<dyn Future<Output = LedgerResult<T>> + Send>>;

/// Ledger-side failure
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger refused the call (already redeemed, unauthorized redeemer, ...)
    #[error("ledger rejected redemption: {reason}")]
    Rejected {
        /// Reason reported by the ledger
        reason: String,
    },
    /// The ledger could not be reached
    #[error("ledger unreachable: {message}")]
    Network {
        /// Transport diagnosis
        message: String,
    },
    /// The transaction was mined but reverted
    #[error("redemption transaction {tx_hash} reverted")]
    Reverted {
        /// Hash of the reverted transaction
        tx_hash: TxHash,
    },
}

/// Arguments of one `markTicketAsUsed` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionRequest {
    /// Ticket holder
    pub holder: Address,
    /// Ticket being redeemed
    pub ticket_id: String,
    /// Admissions redeemed
    pub quantity: u64,
}

impl From<&VerifiedClaim> for RedemptionRequest {
    fn from(verified: &VerifiedClaim) -> Self {
        Self {
            holder: verified.holder(),
            ticket_id: verified.claim().ticket_id.clone(),
            quantity: verified.claim().quantity,
        }
    }
}

/// A sent, not yet confirmed, redemption transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRedemption {
    /// Ticket being redeemed
    pub ticket_id: String,
    /// Transaction hash
    pub tx_hash: TxHash,
}

/// Ledger confirmation of a redemption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionReceipt {
    /// Redeemed ticket
    pub ticket_id: String,
    /// Confirmed transaction
    pub tx_hash: TxHash,
    /// Block the transaction landed in, when the ledger reports it
    pub block_number: Option<u64>,
}

/// Redemption ledger
///
/// Implementations obtain whatever connection and signing identity they need
/// per call; nothing is pooled across redemptions.
pub trait RedemptionLedger: Send + Sync {
    /// Send `markTicketAsUsed(holder, ticketId, quantity)`
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Rejected`] if the ledger refuses the call and
    /// [`LedgerError::Network`] if it cannot be reached.
    fn mark_ticket_as_used(&self, request: RedemptionRequest) -> LedgerFuture<PendingRedemption>;

    /// Wait until a sent redemption is final
    ///
    /// May take arbitrarily long; callers bound it with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Reverted`] if the transaction failed on-chain and
    /// [`LedgerError::Network`] if the ledger stopped answering. The
    /// transaction was already sent, so a network error here leaves its
    /// outcome unknown.
    fn wait(&self, pending: PendingRedemption) -> LedgerFuture<RedemptionReceipt>;
}

// ============================================================================
// In-memory ledger
// ============================================================================

/// How an [`InMemoryLedger`] answers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LedgerBehavior {
    /// Accept new tickets, reject redeemed ones, confirm immediately
    #[default]
    Confirm,
    /// Never answer the send
    StallSend,
    /// Accept the send, never confirm
    StallConfirmation,
    /// Refuse every send with this reason
    Reject(String),
    /// Fail every send as unreachable
    Unreachable(String),
    /// Accept the send, then report the transaction as reverted
    Revert,
    /// Accept and apply the send, then lose the connection before confirming
    LoseConfirmation(String),
}

#[derive(Debug, Default)]
struct Book {
    behavior: LedgerBehavior,
    redeemed: HashSet<String>,
    pending: HashMap<TxHash, String>,
    requests: Vec<RedemptionRequest>,
    next_block: u64,
}

/// Ledger kept in memory
///
/// Enforces the same one-redemption-per-ticket rule the contract does. Clones
/// share state, so a test can keep one handle and give another to the code
/// under test.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    book: Arc<Mutex<Book>>,
}

impl InMemoryLedger {
    /// Empty ledger that confirms new tickets
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty ledger with the given behavior
    #[must_use]
    pub fn with_behavior(behavior: LedgerBehavior) -> Self {
        let ledger = Self::new();
        ledger.set_behavior(behavior);
        ledger
    }

    /// Change how the ledger answers from now on
    pub fn set_behavior(&self, behavior: LedgerBehavior) {
        self.book().behavior = behavior;
    }

    /// Every `markTicketAsUsed` call received, in order
    #[must_use]
    pub fn requests(&self) -> Vec<RedemptionRequest> {
        self.book().requests.clone()
    }

    /// Returns `true` if the ticket has been marked as used
    #[must_use]
    pub fn is_redeemed(&self, ticket_id: &str) -> bool {
        self.book().redeemed.contains(ticket_id)
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RedemptionLedger for InMemoryLedger {
    fn mark_ticket_as_used(&self, request: RedemptionRequest) -> LedgerFuture<PendingRedemption> {
        let book = Arc::clone(&self.book);
        Box::pin(async move {
            let outcome = {
                let mut book = book.lock().unwrap_or_else(PoisonError::into_inner);
                book.requests.push(request.clone());

                match book.behavior.clone() {
                    LedgerBehavior::StallSend => None,
                    LedgerBehavior::Reject(reason) => Some(Err(LedgerError::Rejected { reason })),
                    LedgerBehavior::Unreachable(message) => {
                        Some(Err(LedgerError::Network { message }))
                    },
                    LedgerBehavior::Confirm
                    | LedgerBehavior::StallConfirmation
                    | LedgerBehavior::Revert
                    | LedgerBehavior::LoseConfirmation(_) => {
                        if book.redeemed.contains(&request.ticket_id) {
                            Some(Err(LedgerError::Rejected {
                                reason: "ticket already redeemed".to_string(),
                            }))
                        } else {
                            let nonce = book.requests.len();
                            let tx_hash = keccak256(format!("{}:{nonce}", request.ticket_id));
                            if book.behavior != LedgerBehavior::Revert {
                                book.redeemed.insert(request.ticket_id.clone());
                            }
                            book.pending.insert(tx_hash, request.ticket_id.clone());
                            Some(Ok(PendingRedemption {
                                ticket_id: request.ticket_id,
                                tx_hash,
                            }))
                        }
                    },
                }
            };

            match outcome {
                Some(result) => result,
                None => std::future::pending().await,
            }
        })
    }

    fn wait(&self, pending: PendingRedemption) -> LedgerFuture<RedemptionReceipt> {
        let book = Arc::clone(&self.book);
        Box::pin(async move {
            let outcome = {
                let mut book = book.lock().unwrap_or_else(PoisonError::into_inner);
                if !book.pending.contains_key(&pending.tx_hash) {
                    Some(Err(LedgerError::Network {
                        message: format!("unknown transaction {}", pending.tx_hash),
                    }))
                } else {
                    let behavior = book.behavior.clone();
                    match behavior {
                        LedgerBehavior::StallConfirmation => None,
                        LedgerBehavior::LoseConfirmation(message) => {
                            Some(Err(LedgerError::Network { message }))
                        },
                        LedgerBehavior::Revert => Some(Err(LedgerError::Reverted {
                            tx_hash: pending.tx_hash,
                        })),
                        _ => {
                            book.next_block += 1;
                            Some(Ok(RedemptionReceipt {
                                ticket_id: pending.ticket_id,
                                tx_hash: pending.tx_hash,
                                block_number: Some(book.next_block),
                            }))
                        },
                    }
                }
            };

            match outcome {
                Some(result) => {
                    tracing::debug!(
                        tx_hash = %pending.tx_hash,
                        ok = result.is_ok(),
                        "In-memory ledger answered"
                    );
                    result
                },
                None => std::future::pending().await,
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(ticket_id: &str) -> RedemptionRequest {
        RedemptionRequest {
            holder: Address::repeat_byte(0xaa),
            ticket_id: ticket_id.to_string(),
            quantity: 1,
        }
    }

    #[tokio::test]
    async fn confirms_fresh_ticket() {
        let ledger = InMemoryLedger::new();
        let pending = ledger.mark_ticket_as_used(request("T-1")).await.unwrap();
        let receipt = ledger.wait(pending.clone()).await.unwrap();

        assert_eq!(receipt.ticket_id, "T-1");
        assert_eq!(receipt.tx_hash, pending.tx_hash);
        assert_eq!(receipt.block_number, Some(1));
        assert!(ledger.is_redeemed("T-1"));
    }

    #[tokio::test]
    async fn rejects_second_redemption_of_same_ticket() {
        let ledger = InMemoryLedger::new();
        ledger.mark_ticket_as_used(request("T-1")).await.unwrap();

        let second = ledger.mark_ticket_as_used(request("T-1")).await;
        assert_eq!(
            second,
            Err(LedgerError::Rejected {
                reason: "ticket already redeemed".to_string()
            })
        );
        assert_eq!(ledger.requests().len(), 2);
    }

    #[tokio::test]
    async fn reverted_transaction_leaves_ticket_unredeemed() {
        let ledger = InMemoryLedger::with_behavior(LedgerBehavior::Revert);
        let pending = ledger.mark_ticket_as_used(request("T-1")).await.unwrap();

        let result = ledger.wait(pending.clone()).await;
        assert_eq!(
            result,
            Err(LedgerError::Reverted {
                tx_hash: pending.tx_hash
            })
        );
        assert!(!ledger.is_redeemed("T-1"));
    }

    #[tokio::test]
    async fn lost_confirmation_still_applies_the_redemption() {
        let ledger =
            InMemoryLedger::with_behavior(LedgerBehavior::LoseConfirmation("reset".to_string()));
        let pending = ledger.mark_ticket_as_used(request("T-1")).await.unwrap();

        let result = ledger.wait(pending).await;
        assert!(matches!(result, Err(LedgerError::Network { .. })));
        assert!(ledger.is_redeemed("T-1"));
    }

    #[tokio::test]
    async fn unreachable_ledger_reports_network_error() {
        let ledger = InMemoryLedger::with_behavior(LedgerBehavior::Unreachable(
            "connection refused".to_string(),
        ));
        let result = ledger.mark_ticket_as_used(request("T-1")).await;
        assert!(matches!(result, Err(LedgerError::Network { .. })));
    }

    #[tokio::test]
    async fn stalled_send_never_resolves() {
        let ledger = InMemoryLedger::with_behavior(LedgerBehavior::StallSend);
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            ledger.mark_ticket_as_used(request("T-1")),
        )
        .await;
        assert!(result.is_err());
    }
}
