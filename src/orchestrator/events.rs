//! Client event interface.
//!
//! The automation client reports its connection lifecycle as
//! newline-delimited JSON objects tagged by `event`:
//!
//! | `event`          | Meaning                                        |
//! |------------------|------------------------------------------------|
//! | `auth_challenge` | The client needs the user to authenticate      |
//! | `authenticated`  | Authentication succeeded                       |
//! | `ready`          | The client is connected and usable             |
//! | `auth_failure`   | Authentication was rejected                    |
//! | `disconnected`   | The connection dropped (`reason` optional)     |
//! | `shutdown`       | The client is exiting; release the lock        |
//!
//! Rendering an authentication challenge is a UI concern; observers
//! implement [`ClientEventListener`] and never touch session state.

use bytes::BytesMut;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Maximum accepted event line: 64 KiB.
pub const MAX_EVENT_LINE_BYTES: usize = 64 * 1024;

/// Disconnect reason that means the remote side revoked the session.
pub const LOGOUT_REASON: &str = "logout";

/// Lifecycle event reported by the automation client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The user must complete an authentication challenge.
    AuthChallenge {
        /// Opaque challenge payload for UI observers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge: Option<String>,
    },
    /// Authentication succeeded.
    Authenticated,
    /// The client is connected and usable.
    Ready,
    /// Authentication was rejected.
    AuthFailure {
        /// Client-supplied reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The connection dropped.
    Disconnected {
        /// Client-supplied reason; `logout` resets the session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The client is exiting.
    Shutdown,
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthChallenge { .. } => "auth_challenge",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Disconnected { .. } => "disconnected",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether this disconnect means the remote side logged the session out.
    #[must_use]
    pub fn is_logout(&self) -> bool {
        matches!(self, Self::Disconnected { reason: Some(reason) } if reason == LOGOUT_REASON)
    }
}

/// Observer of client events, for UI-side concerns.
pub trait ClientEventListener: Send + Sync {
    /// Called once per event, before the coordinator acts on it.
    fn on_event(&self, event: &ClientEvent);
}

/// Parse one NDJSON line.
///
/// Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns `AppError::Config` when the line is not a known event object.
pub fn parse_event_line(line: &str) -> Result<Option<ClientEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|err| AppError::Config(format!("malformed client event: {err}")))
}

/// Line codec for the event stream with a bounded line length.
#[derive(Debug)]
pub struct EventCodec(LinesCodec);

impl EventCodec {
    /// Codec with the default [`MAX_EVENT_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_EVENT_LINE_BYTES))
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Config(format!("event line too long (max {MAX_EVENT_LINE_BYTES} bytes)"))
        }
        LinesCodecError::Io(err) => AppError::Io(err.to_string()),
    }
}

/// Read events from `input` and forward them to `tx`.
///
/// Malformed lines are logged and skipped. Returns on EOF, on an I/O error,
/// when `tx` is closed, or when `cancel` fires; dropping `tx` then tells the
/// receiver the stream has ended.
pub async fn run_event_reader<R>(input: R, tx: mpsc::Sender<ClientEvent>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(input, EventCodec::new());
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("event reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => match item {
                None => {
                    debug!("event reader: EOF");
                    break;
                }
                Some(Err(AppError::Io(msg))) => {
                    warn!(error = msg.as_str(), "event reader: input error, stopping");
                    break;
                }
                Some(Err(err)) => {
                    warn!(%err, "event reader: framing error, skipping line");
                }
                Some(Ok(line)) => match parse_event_line(&line) {
                    Ok(Some(event)) => {
                        if tx.send(event).await.is_err() {
                            debug!("event reader: receiver closed, stopping");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, "event reader: skipping line"),
                },
            },
        }
    }
}
