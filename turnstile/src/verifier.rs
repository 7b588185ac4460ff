//! Signature and freshness verification.
//!
//! Checks run cheapest-first and stop at the first failure:
//!
//! 1. structure (field contents, address syntax)
//! 2. freshness (`|now - date|` within [`FRESHNESS_TOLERANCE_MS`])
//! 3. signature (personal-message recovery over the canonical encoding)
//!
//! A structural failure never reaches signature recovery.

use crate::types::TicketClaim;
use alloy::primitives::{Address, Signature};
use serde::Serialize;
use thiserror::Error;
use turnstile_core::environment::{Clock, SystemClock};

/// Largest accepted distance between the claim's `date` and now, inclusive
pub const FRESHNESS_TOLERANCE_MS: u64 = 60_000;

/// A claim failed verification
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// A field is present but its content is unusable
    #[error("invalid ticket data: {field} {problem}")]
    InvalidTicketData {
        /// Offending wire field
        field: &'static str,
        /// What is wrong with it
        problem: &'static str,
    },
    /// The claim was signed too far from now
    #[error(
        "stale ticket: issued {skew_ms} ms away from now (tolerance {FRESHNESS_TOLERANCE_MS} ms)"
    )]
    StaleTicket {
        /// Absolute distance between `date` and now
        skew_ms: u64,
    },
    /// The signature is malformed or does not recover to the claimed address
    #[error("invalid signature: {detail}")]
    InvalidSignature {
        /// What went wrong
        detail: String,
    },
}

/// A claim that passed every check
///
/// Only [`verify`] constructs one, so holding a `VerifiedClaim` proves the
/// claim was checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedClaim {
    claim: TicketClaim,
    holder: Address,
}

impl VerifiedClaim {
    /// The verified claim
    #[must_use]
    pub const fn claim(&self) -> &TicketClaim {
        &self.claim
    }

    /// Holder account the signature recovered to
    #[must_use]
    pub const fn holder(&self) -> Address {
        self.holder
    }

    /// Give back the claim
    #[must_use]
    pub fn into_claim(self) -> TicketClaim {
        self.claim
    }
}

/// The four signed fields, in signing order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedFields<'a> {
    ticket_id: &'a str,
    quantity: u64,
    address: &'a str,
    date: i64,
}

/// Canonical text the holder signs
///
/// Compact JSON of `ticketId`, `quantity`, `address`, `date` in that order,
/// using the values exactly as they appear in the claim.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn signing_message(claim: &TicketClaim) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SignedFields {
        ticket_id: &claim.ticket_id,
        quantity: claim.quantity,
        address: &claim.address,
        date: claim.date,
    })
}

/// Returns `true` for `0x` followed by 40 hex digits whose letter case is either
/// uniform or a valid mixed-case checksum
#[must_use]
pub fn is_account_address(text: &str) -> bool {
    let Some(digits) = text.strip_prefix("0x") else {
        return false;
    };
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }

    let has_lower = digits.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = digits.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(text, None).is_ok();
    }
    true
}

/// Verify a claim against the given clock
///
/// # Errors
///
/// Returns the first failing check as a [`VerificationError`].
#[tracing::instrument(skip_all, fields(ticket_id = %claim.ticket_id))]
pub fn verify(claim: &TicketClaim, clock: &dyn Clock) -> Result<VerifiedClaim, VerificationError> {
    let holder = check_structure(claim)?;
    check_freshness(claim.date, clock.now().timestamp_millis())?;
    check_signature(claim, holder)?;

    tracing::debug!(%holder, "Ticket verified");
    Ok(VerifiedClaim {
        claim: claim.clone(),
        holder,
    })
}

/// Verify a claim against the system clock
///
/// # Errors
///
/// Returns the first failing check as a [`VerificationError`].
pub fn verify_now(claim: &TicketClaim) -> Result<VerifiedClaim, VerificationError> {
    verify(claim, &SystemClock)
}

fn check_structure(claim: &TicketClaim) -> Result<Address, VerificationError> {
    let invalid = |field, problem| VerificationError::InvalidTicketData { field, problem };

    if claim.ticket_id.is_empty() {
        return Err(invalid("ticketId", "is empty"));
    }
    if claim.quantity == 0 {
        return Err(invalid("quantity", "must be positive"));
    }
    if !is_account_address(&claim.address) {
        return Err(invalid("address", "is not a valid account address"));
    }
    if claim.date == 0 {
        return Err(invalid("date", "is missing"));
    }
    if claim.signature.is_empty() {
        return Err(invalid("signature", "is empty"));
    }

    claim
        .address
        .parse::<Address>()
        .map_err(|_| invalid("address", "is not a valid account address"))
}

fn check_freshness(date_ms: i64, now_ms: i64) -> Result<(), VerificationError> {
    let skew_ms = now_ms.abs_diff(date_ms);
    if skew_ms > FRESHNESS_TOLERANCE_MS {
        return Err(VerificationError::StaleTicket { skew_ms });
    }
    Ok(())
}

fn check_signature(claim: &TicketClaim, holder: Address) -> Result<(), VerificationError> {
    let signature: Signature = claim.signature.parse().map_err(|error| {
        VerificationError::InvalidSignature {
            detail: format!("malformed signature: {error}"),
        }
    })?;

    let message = signing_message(claim).map_err(|error| VerificationError::InvalidSignature {
        detail: format!("cannot encode signed fields: {error}"),
    })?;

    let recovered = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|error| VerificationError::InvalidSignature {
            detail: format!("recovery failed: {error}"),
        })?;

    // Address equality is byte equality, so letter case never matters here.
    if recovered != holder {
        return Err(VerificationError::InvalidSignature {
            detail: format!("signed by {recovered}, ticket names {holder}"),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;
    use turnstile_testing::FixedClock;

    const NOW_MS: i64 = 1_735_689_600_000;

    fn signed_claim(signer: &PrivateKeySigner, date: i64) -> TicketClaim {
        let mut claim = TicketClaim {
            ticket_id: "T-100".to_string(),
            quantity: 3,
            address: signer.address().to_checksum(None),
            date,
            signature: String::new(),
        };
        let message = signing_message(&claim).unwrap();
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        claim.signature = alloy::hex::encode_prefixed(signature.as_bytes());
        claim
    }

    #[test]
    fn signing_message_is_compact_and_ordered() {
        let claim = TicketClaim {
            ticket_id: "abc".to_string(),
            quantity: 1,
            address: "0x00000000000000000000000000000000000000aa".to_string(),
            date: 42,
            signature: "ignored".to_string(),
        };
        assert_eq!(
            signing_message(&claim).unwrap(),
            r#"{"ticketId":"abc","quantity":1,"address":"0x00000000000000000000000000000000000000aa","date":42}"#
        );
    }

    #[test]
    fn accepts_fresh_signed_claim() {
        let signer = PrivateKeySigner::random();
        let claim = signed_claim(&signer, NOW_MS);
        let verified = verify(&claim, &FixedClock::at_millis(NOW_MS)).unwrap();
        assert_eq!(verified.holder(), signer.address());
        assert_eq!(verified.claim(), &claim);
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let signer = PrivateKeySigner::random();
        let claim = signed_claim(&signer, NOW_MS);

        assert!(verify(&claim, &FixedClock::at_millis(NOW_MS + 60_000)).is_ok());
        assert!(verify(&claim, &FixedClock::at_millis(NOW_MS - 60_000)).is_ok());
        assert_eq!(
            verify(&claim, &FixedClock::at_millis(NOW_MS + 60_001)),
            Err(VerificationError::StaleTicket { skew_ms: 60_001 })
        );
        assert_eq!(
            verify(&claim, &FixedClock::at_millis(NOW_MS - 60_001)),
            Err(VerificationError::StaleTicket { skew_ms: 60_001 })
        );
    }

    #[test]
    fn lowercase_address_matches_recovered_signer() {
        let signer = PrivateKeySigner::random();
        let mut claim = TicketClaim {
            ticket_id: "T-1".to_string(),
            quantity: 1,
            address: signer.address().to_string().to_lowercase(),
            date: NOW_MS,
            signature: String::new(),
        };
        let message = signing_message(&claim).unwrap();
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        claim.signature = alloy::hex::encode_prefixed(signature.as_bytes());

        assert!(verify(&claim, &FixedClock::at_millis(NOW_MS)).is_ok());
    }

    #[test]
    fn tampering_any_signed_field_breaks_the_signature() {
        let signer = PrivateKeySigner::random();
        let claim = signed_claim(&signer, NOW_MS);
        let clock = FixedClock::at_millis(NOW_MS);

        let mut tampered = claim.clone();
        tampered.ticket_id = "T-101".to_string();
        assert!(matches!(
            verify(&tampered, &clock),
            Err(VerificationError::InvalidSignature { .. })
        ));

        let mut tampered = claim.clone();
        tampered.quantity = 4;
        assert!(matches!(
            verify(&tampered, &clock),
            Err(VerificationError::InvalidSignature { .. })
        ));

        let mut tampered = claim.clone();
        tampered.date += 1;
        assert!(matches!(
            verify(&tampered, &clock),
            Err(VerificationError::InvalidSignature { .. })
        ));

        let mut tampered = claim;
        tampered.address = PrivateKeySigner::random().address().to_checksum(None);
        assert!(matches!(
            verify(&tampered, &clock),
            Err(VerificationError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn structural_failures_come_first() {
        let clock = FixedClock::at_millis(NOW_MS);
        let signer = PrivateKeySigner::random();
        let good = signed_claim(&signer, NOW_MS);

        let mut claim = good.clone();
        claim.ticket_id = String::new();
        // Also stale, but structure is reported first.
        claim.date = 1;
        assert!(matches!(
            verify(&claim, &clock),
            Err(VerificationError::InvalidTicketData {
                field: "ticketId",
                ..
            })
        ));

        let mut claim = good.clone();
        claim.quantity = 0;
        assert!(matches!(
            verify(&claim, &clock),
            Err(VerificationError::InvalidTicketData {
                field: "quantity",
                ..
            })
        ));

        let mut claim = good.clone();
        claim.date = 0;
        assert!(matches!(
            verify(&claim, &clock),
            Err(VerificationError::InvalidTicketData { field: "date", .. })
        ));

        let mut claim = good;
        claim.signature = String::new();
        assert!(matches!(
            verify(&claim, &clock),
            Err(VerificationError::InvalidTicketData {
                field: "signature",
                ..
            })
        ));
    }

    #[test]
    fn whitespace_ticket_id_is_still_an_id() {
        let signer = PrivateKeySigner::random();
        let claim = crate::issuer::issue_claim(&signer, " ", 1, NOW_MS).unwrap();

        let verified = verify(&claim, &FixedClock::at_millis(NOW_MS)).unwrap();
        assert_eq!(verified.claim().ticket_id, " ");
    }

    #[test]
    fn whitespace_signature_is_malformed_not_missing() {
        let signer = PrivateKeySigner::random();
        let mut claim = signed_claim(&signer, NOW_MS);
        claim.signature = "  ".to_string();
        assert!(matches!(
            verify(&claim, &FixedClock::at_millis(NOW_MS)),
            Err(VerificationError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn malformed_signature_is_invalid_signature() {
        let signer = PrivateKeySigner::random();
        let mut claim = signed_claim(&signer, NOW_MS);
        claim.signature = "0xdeadbeef".to_string();
        assert!(matches!(
            verify(&claim, &FixedClock::at_millis(NOW_MS)),
            Err(VerificationError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn address_syntax() {
        assert!(is_account_address("0x00000000000000000000000000000000000000aa"));
        assert!(is_account_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(is_account_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        // Bad checksum: same address with one letter's case flipped.
        assert!(!is_account_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD"));
        assert!(!is_account_address("00000000000000000000000000000000000000aa"));
        assert!(!is_account_address("0x00aa"));
        assert!(!is_account_address("0xzz000000000000000000000000000000000000aa"));
        assert!(!is_account_address(""));
    }
}
