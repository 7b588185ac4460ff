//! Domain types for ticket scanning.
//!
//! A [`TicketClaim`] is what a QR code carries. Every decode event the operator
//! acts on ends up as exactly one [`ScanOutcome`], kept in a bounded
//! [`ScanHistory`].

use crate::ledger::RedemptionReceipt;
use crate::parser::ParseFailure;
use crate::submitter::SubmissionError;
use crate::verifier::VerificationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Number of outcomes kept in a session's history
pub const HISTORY_CAPACITY: usize = 10;

/// Raw text longer than this is shortened in history lines
const RAW_TEXT_PREVIEW_CHARS: usize = 100;

// ============================================================================
// Ticket claim
// ============================================================================

/// Signed ticket record carried inside a QR payload
///
/// The wire form is a JSON object with exactly these five camelCase fields.
/// `date` is the issuance time in milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TicketClaim {
    /// Opaque identifier, unique per issued ticket
    pub ticket_id: String,
    /// Number of admissions this ticket covers
    pub quantity: u64,
    /// Holder account (`0x` followed by 40 hex digits)
    pub address: String,
    /// Issuance time, milliseconds since the Unix epoch
    pub date: i64,
    /// Personal-message signature over the other four fields
    pub signature: String,
}

impl TicketClaim {
    /// Encode the claim as a QR payload
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Issuance time as a UTC timestamp, if it is representable
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.date)
    }
}

// ============================================================================
// Scan outcomes
// ============================================================================

/// Why a parsed ticket was not redeemed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The claim failed local verification; nothing was sent to the ledger
    Verification(VerificationError),
    /// The ledger call failed, was rejected, or timed out
    Submission(SubmissionError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verification(error) => write!(f, "{error}"),
            Self::Submission(error) => write!(f, "{error}"),
        }
    }
}

/// Terminal status of one scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanStatus {
    /// Ticket verified and its redemption confirmed on the ledger
    Valid {
        /// Ledger confirmation
        receipt: RedemptionReceipt,
    },
    /// The decoded text is not a ticket record
    InvalidFormat {
        /// Parser diagnosis
        reason: ParseFailure,
    },
    /// A ticket record that failed verification or redemption
    ValidationFailed {
        /// Specific failure
        reason: FailureReason,
    },
}

impl ScanStatus {
    /// Short label used in history lines and metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Valid { .. } => "Valid Ticket",
            Self::InvalidFormat { .. } => "Invalid Format",
            Self::ValidationFailed { .. } => "Validation Failed",
        }
    }

    /// Metric label value
    #[must_use]
    pub const fn metric_key(&self) -> &'static str {
        match self {
            Self::Valid { .. } => "valid",
            Self::InvalidFormat { .. } => "invalid_format",
            Self::ValidationFailed { .. } => "validation_failed",
        }
    }

    /// Returns `true` for a confirmed redemption
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Record of one acted-on decode event
///
/// Immutable once built. The raw text is always retained so the operator can
/// inspect what the camera actually read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    /// The exact decoded string
    pub raw_text: String,
    /// Parsed claim, absent when parsing failed
    pub claim: Option<TicketClaim>,
    /// Terminal status
    pub status: ScanStatus,
    /// Wall-clock time of the scan
    pub scanned_at: DateTime<Utc>,
}

impl ScanOutcome {
    /// Outcome for text that is not a ticket record
    #[must_use]
    pub const fn invalid_format(
        raw_text: String,
        reason: ParseFailure,
        scanned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            raw_text,
            claim: None,
            status: ScanStatus::InvalidFormat { reason },
            scanned_at,
        }
    }

    /// Outcome for a parsed claim that was not redeemed
    #[must_use]
    pub const fn validation_failed(
        raw_text: String,
        claim: TicketClaim,
        reason: FailureReason,
        scanned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            raw_text,
            claim: Some(claim),
            status: ScanStatus::ValidationFailed { reason },
            scanned_at,
        }
    }

    /// Outcome for a confirmed redemption
    #[must_use]
    pub const fn valid(
        raw_text: String,
        claim: TicketClaim,
        receipt: RedemptionReceipt,
        scanned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            raw_text,
            claim: Some(claim),
            status: ScanStatus::Valid { receipt },
            scanned_at,
        }
    }

    /// Operator-facing error line, `None` for a valid scan
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match &self.status {
            ScanStatus::Valid { .. } => None,
            ScanStatus::InvalidFormat { .. } => {
                Some(format!("Invalid QR code format: {}", self.raw_text))
            },
            ScanStatus::ValidationFailed { reason } => {
                Some(format!("Ticket validation failed: {reason}"))
            },
        }
    }

    /// One-line history entry
    #[must_use]
    pub fn summary(&self) -> String {
        let time = self.scanned_at.format("%H:%M:%S");
        match &self.claim {
            Some(claim) => format!(
                "[{time}] {} | ID: {} | Qty: {} | Date: {}",
                self.status.label(),
                claim.ticket_id,
                claim.quantity,
                display_date(claim),
            ),
            None => format!(
                "[{time}] {} | {}",
                self.status.label(),
                preview(&self.raw_text)
            ),
        }
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.scanned_at.format("%H:%M:%S UTC");
        match &self.status {
            ScanStatus::Valid { receipt } => {
                writeln!(f, "Valid Ticket Scanned ✓  [{time}]")?;
                if let Some(claim) = &self.claim {
                    write_claim(f, claim)?;
                }
                write!(f, "  Tx:        {}", receipt.tx_hash)?;
                if let Some(block) = receipt.block_number {
                    write!(f, " (block {block})")?;
                }
                Ok(())
            },
            ScanStatus::InvalidFormat { reason } => {
                writeln!(f, "Invalid QR Code Format  [{time}]")?;
                writeln!(f, "  Error: {reason}")?;
                write!(f, "  Raw:   {}", self.raw_text)
            },
            ScanStatus::ValidationFailed { reason } => {
                writeln!(f, "Ticket Validation Failed  [{time}]")?;
                if let Some(claim) = &self.claim {
                    write_claim(f, claim)?;
                }
                write!(f, "  Error:     Ticket validation failed: {reason}")
            },
        }
    }
}

fn write_claim(f: &mut fmt::Formatter<'_>, claim: &TicketClaim) -> fmt::Result {
    writeln!(f, "  Ticket ID: {}", claim.ticket_id)?;
    writeln!(f, "  Quantity:  {}", claim.quantity)?;
    writeln!(f, "  Address:   {}", claim.address)?;
    writeln!(f, "  Date:      {}", display_date(claim))?;
    writeln!(f, "  Signature: {}", claim.signature)
}

fn display_date(claim: &TicketClaim) -> String {
    claim.issued_at().map_or_else(
        || claim.date.to_string(),
        |issued| issued.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

fn preview(raw_text: &str) -> String {
    if raw_text.chars().count() > RAW_TEXT_PREVIEW_CHARS {
        let head: String = raw_text.chars().take(RAW_TEXT_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        raw_text.to_string()
    }
}

// ============================================================================
// History
// ============================================================================

/// Most-recent-first list of outcomes, capped at [`HISTORY_CAPACITY`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanHistory {
    entries: VecDeque<ScanOutcome>,
}

impl ScanHistory {
    /// Empty history
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Record an outcome at the front, dropping the oldest beyond capacity
    pub fn push(&mut self, outcome: ScanOutcome) {
        self.entries.push_front(outcome);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Most recent outcome
    #[must_use]
    pub fn latest(&self) -> Option<&ScanOutcome> {
        self.entries.front()
    }

    /// Iterate most-recent first
    pub fn iter(&self) -> impl Iterator<Item = &ScanOutcome> {
        self.entries.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the entries, most-recent first
    #[must_use]
    pub fn to_vec(&self) -> Vec<ScanOutcome> {
        self.entries.iter().cloned().collect()
    }
}
