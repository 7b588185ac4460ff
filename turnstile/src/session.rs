//! Scan session driver.
//!
//! Owns the scan [`Store`] and the decoder. `run` pulls decode events one at a
//! time and feeds each decoded text through the reducer, waiting for the whole
//! parse → verify → submit cascade before pulling the next event. That wait is
//! what keeps scanning single-flight.

use crate::decoder::{DecodeEvent, DecoderError, QrDecoder, Subscription};
use crate::scan::{ScanAction, ScanEnvironment, ScanReducer, ScanState};
use crate::types::ScanOutcome;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use turnstile_runtime::{Store, StoreError};

/// Store type for a scan session
pub type ScanStore = Store<ScanState, ScanAction, ScanEnvironment, ScanReducer>;

/// Session-level failure
///
/// Scan failures are outcomes, not errors; these cover the session machinery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The decoder could not be started
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    /// The store refused the action or did not drain in time
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One operator's scanning session
pub struct ScanSession<D> {
    store: ScanStore,
    decoder: D,
    // Held for the whole of `process`
    in_flight: Mutex<()>,
}

impl<D: QrDecoder> ScanSession<D> {
    /// Create a session with empty history
    #[must_use]
    pub fn new(environment: ScanEnvironment, decoder: D) -> Self {
        Self {
            store: Store::new(ScanState::new(), ScanReducer::new(), environment),
            decoder,
            in_flight: Mutex::new(()),
        }
    }

    /// Process one decoded text to its terminal outcome
    ///
    /// Returns `None` if the text was refused because another scan was still in
    /// flight.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the session is shutting down.
    pub async fn process(
        &self,
        raw_text: impl Into<String>,
    ) -> Result<Option<ScanOutcome>, SessionError> {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            tracing::debug!("Scan in flight, ignoring decoded text");
            return Ok(None);
        };
        let before = self.store.state(|s| s.recorded).await;

        let mut handle = self
            .store
            .send(ScanAction::CodeDecoded {
                raw_text: raw_text.into(),
            })
            .await?;
        handle.wait().await;

        Ok(self
            .store
            .state(|s| {
                if s.recorded > before {
                    s.current.clone()
                } else {
                    None
                }
            })
            .await)
    }

    /// Scan until `shutdown` resolves or the decoder runs dry
    ///
    /// Calls `on_outcome` for every recorded outcome and returns how many there
    /// were. The decoder is stopped on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Decoder`] if the decoder cannot start and
    /// [`SessionError::Store`] if the store is shut down mid-session.
    pub async fn run<F, C>(&self, shutdown: F, mut on_outcome: C) -> Result<usize, SessionError>
    where
        F: Future<Output = ()>,
        C: FnMut(&ScanOutcome),
    {
        let mut subscription = Subscription::open(&self.decoder)?;
        tokio::pin!(shutdown);
        tracing::info!("Scanning started");

        let mut processed = 0;
        loop {
            let event = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Scanning stopped by operator");
                    break;
                }
                event = subscription.next_event() => event,
            };

            match event {
                Some(DecodeEvent::Decoded(raw_text)) => {
                    if let Some(outcome) = self.process(raw_text).await? {
                        on_outcome(&outcome);
                        processed += 1;
                    }
                },
                Some(DecodeEvent::NotFound) => tracing::trace!("No QR code in frame"),
                None => {
                    tracing::info!("Decoder finished");
                    break;
                },
            }
        }

        subscription.stop();
        tracing::info!(processed, "Scanning ended");
        Ok(processed)
    }

    /// Stop the decoder
    ///
    /// Safe to call at any time, any number of times.
    pub fn stop(&self) {
        self.decoder.stop();
    }

    /// Clear history and the current outcome
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the session is shutting down.
    pub async fn clear_history(&self) -> Result<(), SessionError> {
        let mut handle = self.store.send(ScanAction::ClearHistory).await?;
        handle.wait().await;
        Ok(())
    }

    /// History snapshot, most-recent first
    pub async fn history(&self) -> Vec<ScanOutcome> {
        self.store.state(|s| s.history.to_vec()).await
    }

    /// Outcome currently shown to the operator
    pub async fn current(&self) -> Option<ScanOutcome> {
        self.store.state(|s| s.current.clone()).await
    }

    /// Returns `true` while a redemption is in flight
    pub async fn is_submitting(&self) -> bool {
        self.store.state(ScanState::is_submitting).await
    }

    /// Stop the decoder and wait for any in-flight redemption to finish
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if a redemption is still running when
    /// `timeout` expires.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SessionError> {
        self.decoder.stop();
        self.store.shutdown(timeout).await?;
        Ok(())
    }

    /// The scan store, for observers
    #[must_use]
    pub const fn store(&self) -> &ScanStore {
        &self.store
    }
}
