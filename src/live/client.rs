//! Gemini Live API WebSocket client
//!
//! Manages the WebSocket connection lifecycle for a voice session.
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket, send `setup`, wait for `setupComplete`
//! 2. `LiveSession::send()` - Stream audio frames (non-blocking)
//! 3. `LiveSession` events - transcripts, audio, interruptions, close (including `goAway`)
//! 4. `LiveSession::close()` - Clean shutdown
//!
//! # Retry Strategy
//!
//! Opening the socket retries up to 3 times with exponential backoff
//! (1s, 2s). Setup errors are not retried, and mid-session disconnects end
//! the session.

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use super::protocol::{ClientMessage, ServerEvent, ServerMessage};
use super::{CloseReason, Connector, InboundFragment, LiveConfig, LiveError, LiveSession, SessionEvent};
use crate::audio::AudioFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Maximum attempts for opening the socket
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the inbound event channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// How long the final `Closed` event may wait for room in a full channel
const CLOSE_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Connector`] for the hosted Gemini Live API
#[derive(Debug, Default, Clone)]
pub struct GeminiConnector;

impl GeminiConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for GeminiConnector {
    fn connect(&self, config: LiveConfig) -> BoxFuture<'static, Result<LiveSession, LiveError>> {
        Box::pin(connect(config))
    }
}

/// Connect to the Gemini Live API and complete the setup handshake
pub async fn connect(config: LiveConfig) -> Result<LiveSession, LiveError> {
    if config.api_key.is_empty() {
        return Err(LiveError::MissingApiKey);
    }

    let ws = open_socket(&config).await?;
    let (mut write, mut read) = ws.split();

    let setup = ClientMessage::setup(
        &config.model,
        &config.voice_name,
        &config.system_instruction,
        &config.response_modalities,
        config.output_transcription,
    );
    send_message(&mut write, &setup).await?;

    log::info!("Live: setup sent ({}), waiting for setupComplete...", config.model);

    timeout(config.setup_timeout, wait_for_setup(&mut read))
        .await
        .map_err(|_| LiveError::SetupFailed("Session setup timeout".to_string()))??;

    log::info!("Live: session open (voice: {})", config.voice_name);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<AudioFrame>();
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    // Opened is the first event any consumer sees
    let _ = events_tx.try_send(SessionEvent::Opened);

    tokio::spawn(run_writer(write, outbound_rx, events_tx.clone(), cancel.clone()));
    tokio::spawn(run_reader(read, events_tx, cancel.clone()));

    Ok(LiveSession::from_parts(outbound_tx, events_rx, cancel))
}

/// Open the WebSocket, retrying transient failures
async fn open_socket(config: &LiveConfig) -> Result<WsStream, LiveError> {
    let mut last_error = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
            log::info!(
                "Live: retrying connection in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                MAX_ATTEMPTS
            );
            tokio::time::sleep(delay).await;
        }

        match try_open_socket(config).await {
            Ok(ws) => return Ok(ws),
            Err(e) => {
                log::warn!("Live: connection attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| LiveError::ConnectionFailed("Max retries exceeded".to_string())))
}

async fn try_open_socket(config: &LiveConfig) -> Result<WsStream, LiveError> {
    let url = format!("{}?key={}", config.endpoint, config.api_key);
    let request = url
        .into_client_request()
        .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

    log::info!("Live: connecting to {}...", config.endpoint);

    let (ws, _response) = timeout(
        config.connect_timeout,
        connect_async_with_config(request, None, true),
    )
    .await
    .map_err(|_| LiveError::ConnectionFailed("Connection timeout".to_string()))?
    .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

    Ok(ws)
}

async fn wait_for_setup(read: &mut WsRead) -> Result<(), LiveError> {
    while let Some(msg_result) = read.next().await {
        let payload = match msg_result {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "no reason given".to_string());
                return Err(LiveError::SetupFailed(format!(
                    "Connection closed before setup completed: {}",
                    reason
                )));
            }
            Err(e) => return Err(LiveError::ProtocolError(e.to_string())),
            _ => continue, // ping/pong
        };

        match serde_json::from_slice::<ServerMessage>(&payload) {
            Ok(msg) if msg.is_setup_complete() => return Ok(()),
            Ok(_) => log::debug!("Live: ignoring message while waiting for setupComplete"),
            Err(e) => log::warn!("Live: failed to parse message: {}", e),
        }
    }
    Err(LiveError::Disconnected("Stream ended".to_string()))
}

async fn send_message(write: &mut WsWrite, msg: &ClientMessage) -> Result<(), LiveError> {
    let json = serde_json::to_string(msg).map_err(|e| LiveError::ProtocolError(e.to_string()))?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| LiveError::ConnectionFailed(e.to_string()))
}

/// Drain outbound frames onto the socket until cancelled
async fn run_writer(
    mut write: WsWrite,
    mut outbound: mpsc::UnboundedReceiver<AudioFrame>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut frames_sent: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = send_message(&mut write, &ClientMessage::audio(&frame)).await {
                    log::warn!("Live: failed to send audio: {}", e);
                    // Error must reach the consumer before the reader's Local close
                    send_closed(&events, CloseReason::Error(e.to_string())).await;
                    cancel.cancel();
                    break;
                }
                frames_sent += 1;
                // Every 50 frames is ~13 seconds of audio
                if frames_sent % 50 == 0 {
                    log::debug!("Live: sent {} frames", frames_sent);
                }
            }
        }
    }

    if let Err(e) = write.send(Message::Close(None)).await {
        log::debug!("Live: close frame not sent: {}", e);
    }
    let _ = write.close().await;
    log::debug!("Live: writer exiting after {} frames", frames_sent);
}

/// Turn socket messages into session events until cancelled or closed
async fn run_reader(mut read: WsRead, events: mpsc::Sender<SessionEvent>, cancel: CancellationToken) {
    let reason = loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Local,
            next = read.next() => next,
        };

        let payload = match msg_result {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                log::info!("Live: WebSocket closed by server");
                break CloseReason::Remote(
                    frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string()),
                );
            }
            Some(Ok(_)) => continue, // ping/pong
            Some(Err(e)) => {
                log::warn!("Live: WebSocket error: {}", e);
                break CloseReason::Error(e.to_string());
            }
            None => break CloseReason::Remote("stream ended".to_string()),
        };

        let msg = match serde_json::from_slice::<ServerMessage>(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Live: failed to parse message: {}", e);
                continue;
            }
        };

        for event in msg.into_events().into_iter().filter_map(to_session_event) {
            let closing = matches!(event, SessionEvent::Closed(_));
            if events.send(event).await.is_err() {
                log::debug!("Live: event receiver dropped");
                cancel.cancel();
                return;
            }
            if closing {
                cancel.cancel();
                log::debug!("Live: reader exiting after goAway");
                return;
            }
        }
    };

    cancel.cancel();
    send_closed(&events, reason).await;
    log::debug!("Live: reader exiting");
}

/// Deliver the terminal event, waiting for the consumer to make room.
///
/// Gives up when the receiver is gone or stays full past
/// [`CLOSE_DELIVERY_TIMEOUT`].
async fn send_closed(events: &mpsc::Sender<SessionEvent>, reason: CloseReason) {
    match timeout(CLOSE_DELIVERY_TIMEOUT, events.send(SessionEvent::Closed(reason))).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => log::debug!("Live: event receiver dropped before close"),
        Err(_) => log::warn!("Live: close event not delivered, event channel stayed full"),
    }
}

fn to_session_event(event: ServerEvent) -> Option<SessionEvent> {
    match event {
        ServerEvent::Transcript(text) => Some(SessionEvent::Fragment(InboundFragment::Transcript(text))),
        ServerEvent::Audio {
            data,
            sample_rate,
            channels,
        } => Some(SessionEvent::Fragment(InboundFragment::Audio {
            data,
            sample_rate,
            channels,
        })),
        ServerEvent::Interrupted => Some(SessionEvent::Interrupted),
        ServerEvent::GoAway(time_left) => {
            log::warn!("Live: server going away (time left: {:?})", time_left);
            Some(SessionEvent::Closed(CloseReason::Remote(match time_left {
                Some(t) => format!("server going away in {}", t),
                None => "server going away".to_string(),
            })))
        }
        ServerEvent::TurnComplete => {
            log::debug!("Live: turn complete");
            None
        }
        ServerEvent::SetupComplete => None,
    }
}
