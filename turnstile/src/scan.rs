//! Scan session state machine.
//!
//! Each decoded text runs parse → verify → submit and ends in exactly one
//! [`ScanOutcome`]:
//!
//! ```text
//! Scanning ──decode──▶ parse ──fail──▶ InvalidFormat
//!                        │
//!                        ▼
//!                      verify ──fail──▶ ValidationFailed
//!                        │
//!                        ▼
//!                    Submitting ──confirmed──▶ Valid
//!                        └──────failed──────▶ ValidationFailed
//! ```
//!
//! Only one redemption is in flight per session. A decode that arrives while
//! submitting is refused and produces no outcome.

use crate::ledger::RedemptionReceipt;
use crate::metrics;
use crate::parser;
use crate::submitter::{RedemptionSubmitter, SubmissionError};
use crate::types::{FailureReason, ScanHistory, ScanOutcome, TicketClaim};
use crate::verifier;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use turnstile_core::environment::Clock;
use turnstile_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};

// ============================================================================
// State
// ============================================================================

/// Where the session is in its scan cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanPhase {
    /// Waiting for the next decode
    #[default]
    Scanning,
    /// A verified claim's redemption is in flight
    Submitting {
        /// Text the claim was decoded from
        raw_text: String,
        /// Claim being redeemed
        claim: TicketClaim,
        /// When it was scanned
        scanned_at: DateTime<Utc>,
    },
}

/// Session state
#[derive(Clone, Debug, Default)]
pub struct ScanState {
    /// Current cycle phase
    pub phase: ScanPhase,
    /// Outcome shown to the operator, the latest one unless cleared
    pub current: Option<ScanOutcome>,
    /// Recent outcomes
    pub history: ScanHistory,
    /// Outcomes recorded since the session started, including cleared ones
    pub recorded: u64,
}

impl ScanState {
    /// Fresh session state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a redemption is in flight
    #[must_use]
    pub const fn is_submitting(&self) -> bool {
        matches!(self.phase, ScanPhase::Submitting { .. })
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Inputs to the scan reducer
#[derive(Clone, Debug)]
pub enum ScanAction {
    /// The decoder produced text
    CodeDecoded {
        /// Decoded text, verbatim
        raw_text: String,
    },
    /// Operator cleared the history
    ClearHistory,
    /// The ledger confirmed the in-flight redemption
    RedemptionConfirmed {
        /// Ledger confirmation
        receipt: RedemptionReceipt,
    },
    /// The in-flight redemption failed
    RedemptionFailed {
        /// What went wrong
        error: SubmissionError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the scan reducer
#[derive(Clone)]
pub struct ScanEnvironment {
    /// Clock for scan timestamps and freshness
    pub clock: Arc<dyn Clock>,
    /// Ledger redemption
    pub submitter: RedemptionSubmitter,
}

impl ScanEnvironment {
    /// Creates a new `ScanEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, submitter: RedemptionSubmitter) -> Self {
        Self { clock, submitter }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for a scan session
#[derive(Clone, Debug, Default)]
pub struct ScanReducer;

impl ScanReducer {
    /// Creates a new `ScanReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn record(state: &mut ScanState, outcome: ScanOutcome) {
        match outcome.error_message() {
            None => tracing::info!(raw_text = %outcome.raw_text, "Valid ticket scanned"),
            Some(message) => tracing::warn!(raw_text = %outcome.raw_text, "{message}"),
        }
        metrics::record_scan(outcome.status.metric_key());

        state.history.push(outcome.clone());
        state.current = Some(outcome);
        state.recorded += 1;
    }

    fn on_decoded(
        state: &mut ScanState,
        raw_text: String,
        env: &ScanEnvironment,
    ) -> SmallVec<[Effect<ScanAction>; 4]> {
        if let ScanPhase::Submitting { claim, .. } = &state.phase {
            tracing::warn!(
                in_flight = %claim.ticket_id,
                "Scan refused, a redemption is already in flight"
            );
            return SmallVec::new();
        }

        let scanned_at = env.clock.now();

        let claim = match parser::parse(&raw_text) {
            Ok(claim) => claim,
            Err(reason) => {
                Self::record(state, ScanOutcome::invalid_format(raw_text, reason, scanned_at));
                return SmallVec::new();
            },
        };

        let verified = match verifier::verify(&claim, env.clock.as_ref()) {
            Ok(verified) => verified,
            Err(error) => {
                Self::record(
                    state,
                    ScanOutcome::validation_failed(
                        raw_text,
                        claim,
                        FailureReason::Verification(error),
                        scanned_at,
                    ),
                );
                return SmallVec::new();
            },
        };

        tracing::info!(ticket_id = %claim.ticket_id, "Ticket verified, redeeming");
        state.phase = ScanPhase::Submitting {
            raw_text,
            claim,
            scanned_at,
        };

        let submitter = env.submitter.clone();
        smallvec![Effect::future(async move {
            Some(match submitter.submit(&verified).await {
                Ok(receipt) => ScanAction::RedemptionConfirmed { receipt },
                Err(error) => ScanAction::RedemptionFailed { error },
            })
        })]
    }

    fn on_redemption_finished(
        state: &mut ScanState,
        result: Result<RedemptionReceipt, SubmissionError>,
    ) {
        let ScanPhase::Submitting {
            raw_text,
            claim,
            scanned_at,
        } = std::mem::take(&mut state.phase)
        else {
            tracing::warn!("Redemption result with no redemption in flight, ignored");
            return;
        };

        let outcome = match result {
            Ok(receipt) => ScanOutcome::valid(raw_text, claim, receipt, scanned_at),
            Err(error) => ScanOutcome::validation_failed(
                raw_text,
                claim,
                FailureReason::Submission(error),
                scanned_at,
            ),
        };
        Self::record(state, outcome);
    }
}

impl Reducer for ScanReducer {
    type State = ScanState;
    type Action = ScanAction;
    type Environment = ScanEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ScanAction::CodeDecoded { raw_text } => Self::on_decoded(state, raw_text, env),
            ScanAction::RedemptionConfirmed { receipt } => {
                Self::on_redemption_finished(state, Ok(receipt));
                SmallVec::new()
            },
            ScanAction::RedemptionFailed { error } => {
                Self::on_redemption_finished(state, Err(error));
                SmallVec::new()
            },
            ScanAction::ClearHistory => {
                tracing::info!(cleared = state.history.len(), "History cleared");
                state.history.clear();
                state.current = None;
                SmallVec::new()
            },
        }
    }
}
