//! # Turnstile
//!
//! Scan signed QR event tickets and redeem each one exactly once on an EVM
//! ledger.
//!
//! A ticket holder signs `{ticketId, quantity, address, date}` with their
//! account key and shows the resulting JSON as a QR code. At the gate:
//!
//! 1. [`parser`] turns decoded text into a [`TicketClaim`]
//! 2. [`verifier`] checks the fields, a 60 second freshness window and the
//!    personal-message signature
//! 3. [`submitter`] sends `markTicketAsUsed` through a [`RedemptionLedger`]
//!    and waits for confirmation under a deadline
//! 4. [`scan`] is the reducer that strings these together and keeps the last
//!    ten [`ScanOutcome`]s; [`session`] drives it from a [`QrDecoder`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use turnstile::{InMemoryLedger, RedemptionSubmitter, ScanEnvironment, ScanSession, ScriptedDecoder};
//! use turnstile_core::environment::SystemClock;
//!
//! let submitter = RedemptionSubmitter::new(Arc::new(InMemoryLedger::new()), Duration::from_secs(30));
//! let session = ScanSession::new(
//!     ScanEnvironment::new(Arc::new(SystemClock), submitter),
//!     ScriptedDecoder::from_texts([payload]),
//! );
//! session.run(std::future::pending(), |outcome| println!("{outcome}")).await?;
//! ```

pub mod config;
pub mod decoder;
pub mod evm;
pub mod issuer;
pub mod ledger;
pub mod metrics;
pub mod parser;
pub mod scan;
pub mod session;
pub mod submitter;
pub mod types;
pub mod verifier;

pub use config::{Config, ConfigError};
pub use decoder::{DecodeEvent, DecoderError, LineDecoder, QrDecoder, ScriptedDecoder};
pub use evm::EvmLedger;
pub use issuer::issue_claim;
pub use ledger::{InMemoryLedger, LedgerBehavior, LedgerError, RedemptionLedger, RedemptionReceipt};
pub use parser::{ParseFailure, parse};
pub use scan::{ScanAction, ScanEnvironment, ScanPhase, ScanReducer, ScanState};
pub use session::{ScanSession, SessionError};
pub use submitter::{RedemptionSubmitter, SubmissionError};
pub use types::{FailureReason, ScanHistory, ScanOutcome, ScanStatus, TicketClaim};
pub use verifier::{FRESHNESS_TOLERANCE_MS, VerificationError, VerifiedClaim, verify, verify_now};
