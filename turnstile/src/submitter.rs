//! Verified claim → one ledger redemption, bounded by a deadline.

use crate::ledger::{LedgerError, RedemptionLedger, RedemptionReceipt, RedemptionRequest};
use crate::metrics;
use crate::verifier::VerifiedClaim;
use alloy::primitives::TxHash;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};

/// Default bound on send plus confirmation
pub const DEFAULT_REDEMPTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a redemption was when its deadline passed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionStage {
    /// The transaction was still being sent
    Sending,
    /// The transaction was sent and awaiting confirmation
    AwaitingConfirmation,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending => f.write_str("sending the transaction"),
            Self::AwaitingConfirmation => f.write_str("awaiting confirmation"),
        }
    }
}

/// A redemption did not complete
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The ledger rejected, reverted or could not be reached
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The deadline passed first
    ///
    /// With a `tx_hash` the transaction was sent and may still be confirmed.
    #[error(
        "redemption timed out after {timeout_ms} ms while {stage}{}",
        unresolved_note(.tx_hash)
    )]
    Timeout {
        /// Stage reached when the deadline passed
        stage: SubmissionStage,
        /// Hash of the sent transaction, if sending completed
        tx_hash: Option<TxHash>,
        /// The deadline that expired
        timeout_ms: u64,
    },
    /// The transaction was sent but the ledger stopped answering before it was final
    #[error(
        "redemption transaction {tx_hash} unconfirmed: {reason}; it may still be confirmed on-chain"
    )]
    Unconfirmed {
        /// Hash of the sent transaction
        tx_hash: TxHash,
        /// Why confirmation could not be observed
        reason: String,
    },
}

impl SubmissionError {
    /// Returns `true` when the ledger may have applied the redemption anyway
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Timeout {
                tx_hash: Some(_),
                ..
            } | Self::Unconfirmed { .. }
        )
    }
}

#[allow(clippy::ref_option)] // thiserror hands fields over by reference
fn unresolved_note(tx_hash: &Option<TxHash>) -> String {
    tx_hash.map_or_else(String::new, |hash| {
        format!("; transaction {hash} may still be confirmed on-chain")
    })
}

/// Turns verified claims into ledger redemptions
///
/// Each call issues exactly one `markTicketAsUsed` and is never retried. Send
/// and confirmation share one deadline.
#[derive(Clone)]
pub struct RedemptionSubmitter {
    ledger: Arc<dyn RedemptionLedger>,
    timeout: Duration,
}

impl fmt::Debug for RedemptionSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedemptionSubmitter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedemptionSubmitter {
    /// Create a submitter over the given ledger
    #[must_use]
    pub fn new(ledger: Arc<dyn RedemptionLedger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// The deadline applied to each redemption
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Redeem a verified claim and wait for confirmation
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Ledger`] with the ledger's reason if the call is
    /// refused, reverts or cannot reach the ledger,
    /// [`SubmissionError::Unconfirmed`] if the ledger stops answering after the
    /// send, and [`SubmissionError::Timeout`] if the deadline passes first.
    #[tracing::instrument(skip_all, fields(ticket_id = %claim.claim().ticket_id))]
    pub async fn submit(
        &self,
        claim: &VerifiedClaim,
    ) -> Result<RedemptionReceipt, SubmissionError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let request = RedemptionRequest::from(claim);
        tracing::info!(
            holder = %request.holder,
            quantity = request.quantity,
            "Submitting redemption"
        );

        let pending = match timeout_at(deadline, self.ledger.mark_ticket_as_used(request)).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(error)) => return Err(ledger_failure(error)),
            Err(_) => return Err(self.timed_out(SubmissionStage::Sending, None)),
        };

        let tx_hash = pending.tx_hash;
        tracing::info!(%tx_hash, "Redemption transaction sent");

        match timeout_at(deadline, self.ledger.wait(pending)).await {
            Ok(Ok(receipt)) => {
                tracing::info!(%tx_hash, block = ?receipt.block_number, "Redemption confirmed");
                metrics::record_redemption("confirmed");
                metrics::record_redemption_duration(started.elapsed());
                Ok(receipt)
            },
            Ok(Err(LedgerError::Network { message })) => Err(unconfirmed(tx_hash, message)),
            Ok(Err(error)) => Err(ledger_failure(error)),
            Err(_) => Err(self.timed_out(
                SubmissionStage::AwaitingConfirmation,
                Some(tx_hash),
            )),
        }
    }

    fn timed_out(&self, stage: SubmissionStage, tx_hash: Option<TxHash>) -> SubmissionError {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let error = SubmissionError::Timeout {
            stage,
            tx_hash,
            timeout_ms,
        };
        tracing::warn!(error = %error, "Redemption timed out");
        metrics::record_redemption("timeout");
        error
    }
}

fn unconfirmed(tx_hash: TxHash, reason: String) -> SubmissionError {
    let error = SubmissionError::Unconfirmed { tx_hash, reason };
    tracing::warn!(error = %error, "Redemption outcome unknown");
    metrics::record_redemption("unconfirmed");
    error
}

fn ledger_failure(error: LedgerError) -> SubmissionError {
    tracing::warn!(error = %error, "Redemption failed");
    metrics::record_redemption(match error {
        LedgerError::Rejected { .. } => "rejected",
        LedgerError::Network { .. } => "network",
        LedgerError::Reverted { .. } => "reverted",
    });
    SubmissionError::Ledger(error)
}
