//! Voice session host
//!
//! One task (`run_voice_loop`) owns everything a mentor conversation needs:
//! the microphone, the live session, the playback scheduler and the
//! transcript. Callers talk to it through a cloneable [`VoiceHandle`].
//!
//! ```text
//! VoiceHandle ──commands──▶ ┌──────────────────┐ ◀── mic / connect results
//!      ▲                    │  run_voice_loop  │ ◀── captured frames
//!      └──watch snapshot─── │  reduce + effects│ ◀── session events
//!                           └──────────────────┘ ◀── playback completions
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::audio::{AudioError, AudioFrame, CaptureHandle, Microphone};
use crate::live::{CloseReason, Connector, InboundFragment, LiveError, LiveSession, SessionEvent};
use crate::model::Language;
use crate::playback::{AudioOutput, PlaybackScheduler, SourceId, Speaker};
use crate::settings::AppSettings;
use crate::state_machine::{reduce, Effect, RemoteEvent, VoiceEvent, VoiceState};

/// Captured frames buffered between the audio thread and the loop
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceStatus {
    Idle,
    Connecting,
    Active,
    Closed,
}

/// What subscribers see of a voice session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSnapshot {
    pub status: VoiceStatus,
    pub transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for VoiceSnapshot {
    fn default() -> Self {
        Self {
            status: VoiceStatus::Idle,
            transcript: String::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VoiceError {
    #[error("Voice loop has shut down")]
    LoopClosed,
}

/// Devices and transport a voice session runs on
#[derive(Clone)]
pub struct VoiceBackend {
    pub microphone: Arc<dyn Microphone>,
    pub speaker: Arc<dyn Speaker>,
    pub connector: Arc<dyn Connector>,
}

enum Command {
    Start {
        language: Language,
        ack: oneshot::Sender<()>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
}

/// Results of work done off the loop
enum Completion {
    Microphone {
        id: Uuid,
        result: Result<(CaptureHandle, Box<dyn AudioOutput>), AudioError>,
    },
    Connect {
        id: Uuid,
        result: Result<LiveSession, LiveError>,
    },
}

/// Live session bound to the session id it was opened for
struct LiveLink {
    id: Uuid,
    session: LiveSession,
    events: mpsc::Receiver<SessionEvent>,
}

/// Everything owned by the voice loop
struct SessionContext {
    backend: VoiceBackend,
    settings: AppSettings,
    api_key: String,
    state: VoiceState,
    transcript: String,

    capture: Option<CaptureHandle>,
    scheduler: Option<PlaybackScheduler>,
    pending_session: Option<(Uuid, LiveSession)>,
    link: Option<LiveLink>,
    deadline: Option<(Uuid, Instant)>,

    snapshot_tx: watch::Sender<VoiceSnapshot>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    frames_tx: mpsc::Sender<AudioFrame>,
    frames_rx: mpsc::Receiver<AudioFrame>,
    ended_tx: mpsc::UnboundedSender<SourceId>,
    ended_rx: mpsc::UnboundedReceiver<SourceId>,
}

impl SessionContext {
    fn new(
        backend: VoiceBackend,
        settings: AppSettings,
        api_key: String,
        snapshot_tx: watch::Sender<VoiceSnapshot>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        Self {
            backend,
            settings,
            api_key,
            state: VoiceState::Idle,
            transcript: String::new(),
            capture: None,
            scheduler: None,
            pending_session: None,
            link: None,
            deadline: None,
            snapshot_tx,
            completion_tx,
            completion_rx,
            frames_tx,
            frames_rx,
            ended_tx,
            ended_rx,
        }
    }

    fn snapshot(&self) -> VoiceSnapshot {
        let (status, error) = match &self.state {
            VoiceState::Idle => (VoiceStatus::Idle, None),
            VoiceState::Connecting { .. } => (VoiceStatus::Connecting, None),
            VoiceState::Active { .. } => (VoiceStatus::Active, None),
            VoiceState::Closed { error } => (VoiceStatus::Closed, error.clone()),
        };
        VoiceSnapshot {
            status,
            transcript: self.transcript.clone(),
            error,
        }
    }

    fn dispatch(&mut self, event: VoiceEvent) {
        let (next, effects) = reduce(&self.state, event);
        if next != self.state {
            log::info!("Voice: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::ResetTranscript => self.transcript.clear(),
            Effect::AcquireMicrophone { id } => self.acquire_devices(id),
            Effect::Connect { id, language } => {
                let config = self.settings.live_config(&self.api_key, language);
                let connecting = self.backend.connector.connect(config);
                let tx = self.completion_tx.clone();
                tokio::spawn(async move {
                    let result = connecting.await;
                    let _ = tx.send(Completion::Connect { id, result });
                });
            }
            Effect::BeginStreaming { id } => self.begin_streaming(id),
            Effect::AppendTranscript(text) => append_fragment(&mut self.transcript, &text),
            Effect::InterruptPlayback => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.on_interrupted();
                }
            }
            Effect::Teardown => self.teardown(),
            Effect::Publish => {
                self.snapshot_tx.send_replace(self.snapshot());
            }
        }
    }

    /// Opening devices blocks until the audio threads report back
    fn acquire_devices(&mut self, id: Uuid) {
        let microphone = self.backend.microphone.clone();
        let speaker = self.backend.speaker.clone();
        let frames_tx = self.frames_tx.clone();
        let ended_tx = self.ended_tx.clone();
        let tx = self.completion_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = microphone.open(frames_tx).and_then(|capture| {
                let output = speaker.open(ended_tx)?;
                Ok((capture, output))
            });
            let _ = tx.send(Completion::Microphone { id, result });
        });
    }

    fn begin_streaming(&mut self, id: Uuid) {
        let Some((session_id, mut session)) = self.pending_session.take() else {
            log::warn!("Voice: no live session to stream to");
            return;
        };
        if session_id != id {
            return;
        }
        let Some(events) = session.take_events() else {
            log::warn!("Voice: live session events already taken");
            return;
        };

        if let Some(capture) = self.capture.as_ref() {
            capture.set_streaming(true);
        }
        self.link = Some(LiveLink {
            id,
            session,
            events,
        });
        self.deadline = self
            .settings
            .max_session()
            .map(|limit| (id, Instant::now() + limit));
        log::info!("Voice: streaming session {}", id);
    }

    /// Release capture, transport and playback. Safe to call repeatedly.
    fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut link) = self.link.take() {
            link.session.close();
        }
        self.pending_session = None;
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.on_interrupted();
        }
        self.deadline = None;

        // Nothing queued belongs to the next session
        while self.frames_rx.try_recv().is_ok() {}
        while self.ended_rx.try_recv().is_ok() {}
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Microphone { id, result } => match result {
                Ok((capture, output)) => {
                    if self.state.session_id() == Some(id) {
                        self.capture = Some(capture);
                        self.scheduler = Some(PlaybackScheduler::new(output));
                    }
                    self.dispatch(VoiceEvent::MicrophoneReady { id });
                }
                Err(e) => {
                    log::error!("Voice: microphone unavailable: {}", e);
                    self.dispatch(VoiceEvent::MicrophoneFailed {
                        id,
                        err: e.to_string(),
                    });
                }
            },
            Completion::Connect { id, result } => match result {
                Ok(session) => {
                    if self.state.session_id() == Some(id) {
                        self.pending_session = Some((id, session));
                    }
                    self.dispatch(VoiceEvent::Connected { id });
                    // Not picked up means the session was abandoned
                    self.pending_session = None;
                }
                Err(e) => {
                    log::error!("Voice: connection failed: {}", e);
                    self.dispatch(VoiceEvent::ConnectFailed {
                        id,
                        err: e.to_string(),
                    });
                }
            },
        }
    }

    fn on_session_event(&mut self, id: Uuid, event: Option<SessionEvent>) {
        let remote = match event {
            Some(SessionEvent::Opened) => {
                log::debug!("Voice: session {} opened", id);
                return;
            }
            Some(SessionEvent::Fragment(InboundFragment::Audio {
                data,
                sample_rate,
                channels,
            })) => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    if let Err(e) = scheduler.on_audio_fragment(&data, sample_rate, channels) {
                        log::warn!("Voice: dropping malformed audio fragment: {}", e);
                    }
                }
                return;
            }
            Some(SessionEvent::Fragment(InboundFragment::Transcript(text))) => {
                RemoteEvent::Transcript(text)
            }
            Some(SessionEvent::Interrupted) => RemoteEvent::Interrupted,
            Some(SessionEvent::Closed(reason)) => RemoteEvent::Closed(reason),
            None => {
                self.link = None;
                RemoteEvent::Closed(CloseReason::Remote("event stream ended".to_string()))
            }
        };
        self.dispatch(VoiceEvent::Remote { id, event: remote });
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if let Some(link) = self.link.as_ref() {
            if !link.session.send(frame) {
                log::debug!("Voice: frame dropped, session closed");
            }
        }
    }

    fn on_source_ended(&mut self, id: SourceId) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.on_source_ended(id);
        }
    }
}

/// Join transcript fragments with a single space
fn append_fragment(transcript: &mut String, fragment: &str) {
    if !transcript.is_empty() {
        transcript.push(' ');
    }
    transcript.push_str(fragment);
}

async fn next_session_event(link: &mut Option<LiveLink>) -> (Uuid, Option<SessionEvent>) {
    match link {
        Some(link) => (link.id, link.events.recv().await),
        None => std::future::pending().await,
    }
}

async fn session_deadline(deadline: Option<(Uuid, Instant)>) -> Uuid {
    match deadline {
        Some((id, at)) => {
            tokio::time::sleep_until(at).await;
            id
        }
        None => std::future::pending().await,
    }
}

async fn run_voice_loop(mut ctx: SessionContext, mut commands: mpsc::Receiver<Command>) {
    log::info!("Voice: loop started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start { language, ack }) => {
                    ctx.dispatch(VoiceEvent::Start { language });
                    let _ = ack.send(());
                }
                Some(Command::Stop { ack }) => {
                    ctx.dispatch(VoiceEvent::Stop);
                    let _ = ack.send(());
                }
                None => break,
            },
            Some(completion) = ctx.completion_rx.recv() => ctx.on_completion(completion),
            Some(frame) = ctx.frames_rx.recv() => ctx.on_frame(frame),
            (id, event) = next_session_event(&mut ctx.link) => ctx.on_session_event(id, event),
            Some(source) = ctx.ended_rx.recv() => ctx.on_source_ended(source),
            id = session_deadline(ctx.deadline) => {
                ctx.deadline = None;
                ctx.dispatch(VoiceEvent::SessionTimeout { id });
            }
        }
    }

    // Every handle is gone
    ctx.dispatch(VoiceEvent::Stop);
    ctx.teardown();
    log::info!("Voice: loop exiting");
}

/// Cloneable handle to the voice loop
#[derive(Clone)]
pub struct VoiceHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<VoiceSnapshot>,
}

impl VoiceHandle {
    /// Spawn the voice loop on the current tokio runtime.
    /// The loop runs until every handle is dropped.
    pub fn spawn(backend: VoiceBackend, settings: AppSettings, api_key: impl Into<String>) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(VoiceSnapshot::default());
        let (commands, commands_rx) = mpsc::channel(16);
        let ctx = SessionContext::new(backend, settings, api_key.into(), snapshot_tx);

        tokio::spawn(run_voice_loop(ctx, commands_rx));

        Self { commands, snapshot }
    }

    /// Begin a session. Ignored while one is connecting or active.
    pub async fn start(&self, language: Language) -> Result<(), VoiceError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Start { language, ack })
            .await
            .map_err(|_| VoiceError::LoopClosed)?;
        done.await.map_err(|_| VoiceError::LoopClosed)
    }

    /// End the session. Capture and playback have stopped when this returns.
    pub async fn stop(&self) -> Result<(), VoiceError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Stop { ack })
            .await
            .map_err(|_| VoiceError::LoopClosed)?;
        done.await.map_err(|_| VoiceError::LoopClosed)
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceSnapshot> {
        self.snapshot.clone()
    }
}
