//! Ticket signing, for producing test tickets with a holder key.

use crate::types::TicketClaim;
use crate::verifier::signing_message;
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use thiserror::Error;

/// A claim could not be signed
#[derive(Debug, Error)]
pub enum IssueError {
    /// The signed fields could not be encoded
    #[error("cannot encode ticket: {0}")]
    Encode(#[from] serde_json::Error),
    /// The signer failed
    #[error("cannot sign ticket: {0}")]
    Sign(#[from] alloy::signers::Error),
}

/// Build a claim for `holder` and sign it
///
/// The claim's address is the holder's checksummed address. `date` is in
/// milliseconds since the Unix epoch.
///
/// # Errors
///
/// Returns [`IssueError`] if encoding or signing fails.
pub fn issue_claim(
    holder: &PrivateKeySigner,
    ticket_id: impl Into<String>,
    quantity: u64,
    date: i64,
) -> Result<TicketClaim, IssueError> {
    let mut claim = TicketClaim {
        ticket_id: ticket_id.into(),
        quantity,
        address: holder.address().to_checksum(None),
        date,
        signature: String::new(),
    };

    let message = signing_message(&claim)?;
    let signature = holder.sign_message_sync(message.as_bytes())?;
    claim.signature = alloy::hex::encode_prefixed(signature.as_bytes());

    tracing::debug!(ticket_id = %claim.ticket_id, holder = %claim.address, "Ticket signed");
    Ok(claim)
}
