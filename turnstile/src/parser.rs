//! Raw scanned text → [`TicketClaim`].

use crate::types::TicketClaim;
use serde_json::Value;
use thiserror::Error;

/// Decoded text is not a ticket record
///
/// Terminal for the scan: the outcome is recorded as invalid format, never as a
/// validation failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// The text is not a JSON document
    #[error("payload is not JSON: {message}")]
    NotJson {
        /// Decoder diagnosis
        message: String,
    },
    /// Valid JSON, but not exactly the five ticket fields with the right types
    #[error("payload is not a ticket record: {message}")]
    InvalidShape {
        /// Decoder diagnosis
        message: String,
    },
}

/// Parse raw QR text into a claim
///
/// Accepts only a JSON object with exactly `ticketId` (string), `quantity`
/// (non-negative integer), `address` (string), `date` (integer milliseconds) and
/// `signature` (string). Unknown, missing or mistyped fields are rejected.
///
/// # Errors
///
/// Returns [`ParseFailure::NotJson`] for text that does not decode at all and
/// [`ParseFailure::InvalidShape`] for JSON of the wrong shape.
pub fn parse(raw_text: &str) -> Result<TicketClaim, ParseFailure> {
    let value: Value = serde_json::from_str(raw_text).map_err(|error| ParseFailure::NotJson {
        message: error.to_string(),
    })?;

    // Derived struct deserializers also accept arrays; only objects are tickets.
    if !value.is_object() {
        return Err(ParseFailure::InvalidShape {
            message: "expected a JSON object".to_string(),
        });
    }

    serde_json::from_value(value).map_err(|error| ParseFailure::InvalidShape {
        message: error.to_string(),
    })
}
