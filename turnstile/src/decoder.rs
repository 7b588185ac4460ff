//! QR decoder seam.
//!
//! The camera and symbol decoding live outside this crate. A decoder is started
//! and then yields decode events until it is stopped or runs dry. The session
//! owns the decoder through a [`Subscription`], which stops it when dropped.

use futures::stream::{self, BoxStream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// One decoder event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A QR symbol was decoded to this text
    Decoded(String),
    /// A frame was read but held no symbol; not an error
    NotFound,
}

/// Decoder could not be started
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    /// Already started and not stopped since
    #[error("decoder is already running")]
    AlreadyRunning,
    /// The underlying device or source cannot be opened
    #[error("decoder unavailable: {0}")]
    Unavailable(String),
}

/// External QR decoder
pub trait QrDecoder: Send + Sync {
    /// Start decoding and return the event stream
    ///
    /// # Errors
    ///
    /// Returns [`DecoderError`] if the decoder cannot start.
    fn start(&self) -> Result<BoxStream<'static, DecodeEvent>, DecoderError>;

    /// Stop decoding and release the source
    ///
    /// Idempotent; calling it on a stopped decoder does nothing.
    fn stop(&self);
}

/// A started decoder, stopped on drop
pub struct Subscription<'a, D: QrDecoder + ?Sized> {
    decoder: &'a D,
    events: BoxStream<'static, DecodeEvent>,
    active: bool,
}

impl<'a, D: QrDecoder + ?Sized> Subscription<'a, D> {
    /// Start `decoder` and take ownership of its event stream
    ///
    /// # Errors
    ///
    /// Returns [`DecoderError`] if the decoder cannot start.
    pub fn open(decoder: &'a D) -> Result<Self, DecoderError> {
        let events = decoder.start()?;
        tracing::debug!("Decoder started");
        Ok(Self {
            decoder,
            events,
            active: true,
        })
    }

    /// Next event, or `None` once stopped or the source is exhausted
    pub async fn next_event(&mut self) -> Option<DecodeEvent> {
        if !self.active {
            return None;
        }
        self.events.next().await
    }

    /// Stop the decoder; later calls do nothing
    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.decoder.stop();
            tracing::debug!("Decoder stopped");
        }
    }
}

impl<D: QrDecoder + ?Sized> Drop for Subscription<'_, D> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Line decoder
// ============================================================================

/// Decoder over a line-oriented text source
///
/// Each line is one decode result, as printed by command-line QR readers such
/// as `zbarcam --raw`. A blank line is a frame without a symbol.
pub struct LineDecoder<R> {
    lines: Arc<Mutex<Lines<R>>>,
    running: Arc<AtomicBool>,
}

impl<R> LineDecoder<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Decoder reading lines from `reader`
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            lines: Arc::new(Mutex::new(reader.lines())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Decoder reading from standard input
///
/// A read already waiting on stdin cannot be cancelled, so process exit may
/// wait for one more line when input is interactive.
#[must_use]
pub fn stdin_decoder() -> LineDecoder<BufReader<Stdin>> {
    LineDecoder::new(BufReader::new(tokio::io::stdin()))
}

/// Decoder replaying a capture file, one payload per line
///
/// # Errors
///
/// Returns [`DecoderError::Unavailable`] if the file cannot be opened.
pub async fn file_decoder(path: &Path) -> Result<LineDecoder<BufReader<File>>, DecoderError> {
    let file = File::open(path)
        .await
        .map_err(|e| DecoderError::Unavailable(format!("{}: {e}", path.display())))?;
    Ok(LineDecoder::new(BufReader::new(file)))
}

impl<R> QrDecoder for LineDecoder<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn start(&self) -> Result<BoxStream<'static, DecodeEvent>, DecoderError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(DecoderError::AlreadyRunning);
        }

        let state = (Arc::clone(&self.lines), Arc::clone(&self.running));
        Ok(stream::unfold(state, |(lines, running)| async move {
            if !running.load(Ordering::Acquire) {
                return None;
            }
            let next = lines.lock().await.next_line().await;
            match next {
                Ok(Some(line)) => {
                    let event = if line.trim().is_empty() {
                        DecodeEvent::NotFound
                    } else {
                        DecodeEvent::Decoded(line.trim_end_matches('\r').to_string())
                    };
                    Some((event, (lines, running)))
                },
                Ok(None) => None,
                Err(error) => {
                    tracing::warn!(error = %error, "Decoder source failed");
                    None
                },
            }
        })
        .boxed())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

// ============================================================================
// Scripted decoder
// ============================================================================

/// Decoder that replays a fixed list of events
///
/// Counts starts and stops so tests can check the session releases it.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDecoder {
    events: Vec<DecodeEvent>,
    hold_open: bool,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl ScriptedDecoder {
    /// Decoder that yields `events` and then ends
    #[must_use]
    pub fn new(events: Vec<DecodeEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Decoder that yields one `Decoded` event per text
    #[must_use]
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .map(|t| DecodeEvent::Decoded(t.into()))
                .collect(),
        )
    }

    /// Keep the stream open after the script, like a camera with nothing in view
    #[must_use]
    pub fn then_wait(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Number of `start` calls
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls
    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl QrDecoder for ScriptedDecoder {
    fn start(&self) -> Result<BoxStream<'static, DecodeEvent>, DecoderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let script = stream::iter(self.events.clone());
        if self.hold_open {
            Ok(script.chain(stream::pending()).boxed())
        } else {
            Ok(script.boxed())
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn line_decoder_maps_lines_to_events() {
        let input: &[u8] = b"first\n\nsecond\r\n";
        let decoder = LineDecoder::new(BufReader::new(input));
        let mut subscription = Subscription::open(&decoder).unwrap();

        assert_eq!(
            subscription.next_event().await,
            Some(DecodeEvent::Decoded("first".to_string()))
        );
        assert_eq!(subscription.next_event().await, Some(DecodeEvent::NotFound));
        assert_eq!(
            subscription.next_event().await,
            Some(DecodeEvent::Decoded("second".to_string()))
        );
        assert_eq!(subscription.next_event().await, None);
    }

    #[tokio::test]
    async fn line_decoder_refuses_double_start() {
        let input: &[u8] = b"a\n";
        let decoder = LineDecoder::new(BufReader::new(input));
        let _events = decoder.start().unwrap();
        assert!(matches!(decoder.start(), Err(DecoderError::AlreadyRunning)));

        decoder.stop();
        decoder.stop();
        assert!(decoder.start().is_ok());
    }

    #[tokio::test]
    async fn missing_capture_file_is_unavailable() {
        let result = file_decoder(Path::new("/nonexistent/capture.txt")).await;
        assert!(matches!(result, Err(DecoderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn stopped_subscription_yields_nothing() {
        let decoder = ScriptedDecoder::from_texts(["a", "b"]);
        let mut subscription = Subscription::open(&decoder).unwrap();
        subscription.stop();
        subscription.stop();

        assert_eq!(subscription.next_event().await, None);
        assert_eq!(decoder.stops(), 1);
    }

    #[test]
    fn dropping_subscription_stops_decoder_once() {
        let decoder = ScriptedDecoder::from_texts(["a"]);
        {
            let _subscription = Subscription::open(&decoder).unwrap();
        }
        assert_eq!(decoder.starts(), 1);
        assert_eq!(decoder.stops(), 1);
    }
}
