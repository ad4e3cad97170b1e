//! Realtime voice transport to the Gemini Live API
//!
//! A [`Connector`] opens a [`LiveSession`]: a bidirectional stream where
//! microphone frames go out and transcript/audio fragments come back.
//!
//! # Architecture
//!
//! ```text
//!                      LiveSession
//! send(AudioFrame) ──▶ outbound channel ──▶ writer task ──▶ WebSocket
//!                                                              │
//! events ◀── SessionEvent channel ◀── reader task ◀────────────┘
//!             Opened | Fragment | Interrupted | Closed
//! ```
//!
//! Connection failures are returned from `connect`; anything that goes wrong
//! afterwards arrives as `SessionEvent::Closed`.

mod client;
pub mod protocol;

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioFrame;

pub use client::{connect, GeminiConnector};
pub use protocol::{ClientMessage, ServerEvent, ServerMessage, LIVE_API_URL};

/// Errors that can occur while opening a live session
#[derive(Debug, Clone, thiserror::Error)]
pub enum LiveError {
    #[error("Gemini API key not configured. Set GEMINI_API_KEY or API_KEY.")]
    MissingApiKey,
    #[error("Failed to connect to Gemini Live API: {0}")]
    ConnectionFailed(String),
    #[error("Session setup failed: {0}")]
    SetupFailed(String),
    #[error("WebSocket protocol error: {0}")]
    ProtocolError(String),
    #[error("WebSocket disconnected: {0}")]
    Disconnected(String),
}

/// One piece of server-pushed content
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFragment {
    /// Transcript of the model's speech, append-only
    Transcript(String),
    /// Raw PCM16 audio
    Audio {
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    },
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Closed locally via `close()`
    Local,
    /// Server closed the connection
    Remote(String),
    /// Network or protocol failure
    Error(String),
}

/// Events delivered by a live session, consumed by exactly one reader
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened,
    Fragment(InboundFragment),
    Interrupted,
    Closed(CloseReason),
}

/// Everything needed to open a mentor voice session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub response_modalities: Vec<String>,
    /// Ask the server to transcribe its own speech
    pub output_transcription: bool,
    pub connect_timeout: Duration,
    pub setup_timeout: Duration,
}

impl LiveConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: LIVE_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            voice_name: "Puck".to_string(),
            system_instruction: String::new(),
            response_modalities: vec!["AUDIO".to_string()],
            output_transcription: true,
            connect_timeout: Duration::from_secs(10),
            setup_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to an open live session.
///
/// `send` never blocks. `close` is idempotent and also runs on drop.
pub struct LiveSession {
    outbound: mpsc::UnboundedSender<AudioFrame>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    cancel: CancellationToken,
}

impl LiveSession {
    /// Assemble a session from its channels. The transport behind them must
    /// stop when `cancel` fires.
    pub fn from_parts(
        outbound: mpsc::UnboundedSender<AudioFrame>,
        events: mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            events: Some(events),
            cancel,
        }
    }

    /// Queue a frame for transmission. Returns false once the session is closed.
    pub fn send(&self, frame: AudioFrame) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.outbound.send(frame).is_ok()
    }

    /// Take the event receiver for a dedicated consumer
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminate the connection and release the transport tasks.
    pub fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            log::info!("Live: closing session");
            self.cancel.cancel();
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens live sessions. Passed into the voice session explicitly so tests can
/// substitute a fake transport.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, config: LiveConfig) -> BoxFuture<'static, Result<LiveSession, LiveError>>;
}

/// Get the Gemini API key from the environment
pub fn get_api_key() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> AudioFrame {
        AudioFrame {
            samples: vec![0; 4],
            sample_rate: 16000,
            sequence,
        }
    }

    #[test]
    fn test_live_error_display() {
        assert!(LiveError::MissingApiKey.to_string().contains("GEMINI_API_KEY"));
        let err = LiveError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_config_defaults() {
        let config = LiveConfig::new("key", "gemini-live");
        assert_eq!(config.voice_name, "Puck");
        assert_eq!(config.response_modalities, vec!["AUDIO".to_string()]);
        assert!(config.output_transcription);
        assert_eq!(config.endpoint, LIVE_API_URL);
    }

    #[tokio::test]
    async fn test_session_send_and_close() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_ev_tx, ev_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut session = LiveSession::from_parts(out_tx, ev_rx, cancel.clone());

        assert!(session.send(frame(0)));
        assert_eq!(out_rx.recv().await.map(|f| f.sequence), Some(0));

        session.close();
        session.close();
        assert!(cancel.is_cancelled());
        assert!(session.is_closed());
        assert!(!session.send(frame(1)));
    }

    #[tokio::test]
    async fn test_drop_cancels_transport() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_ev_tx, ev_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        drop(LiveSession::from_parts(out_tx, ev_rx, cancel.clone()));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_events_can_be_taken_once() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::channel(4);
        let mut session = LiveSession::from_parts(out_tx, ev_rx, CancellationToken::new());

        ev_tx.send(SessionEvent::Opened).await.unwrap();
        let mut rx = session.take_events().unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::Opened));
        assert!(session.take_events().is_none());
    }
}
