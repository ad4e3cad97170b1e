//! State machine for mentor voice sessions
//!
//! This module implements the session lifecycle using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new state and a list of effects for the voice loop to execute.

use uuid::Uuid;

use crate::live::CloseReason;
use crate::model::Language;

/// Internal state of a voice session.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    Connecting {
        session_id: Uuid,
        language: Language,
    },
    Active {
        session_id: Uuid,
        language: Language,
    },
    Closed {
        error: Option<String>,
    },
}

impl VoiceState {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            VoiceState::Connecting { session_id, .. } | VoiceState::Active { session_id, .. } => {
                Some(*session_id)
            }
            VoiceState::Idle | VoiceState::Closed { .. } => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, VoiceState::Active { .. })
    }
}

/// Server-side happenings routed through the reducer
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Transcript(String),
    Interrupted,
    Closed(CloseReason),
}

/// Events that can trigger state transitions.
/// Completion events carry the session id they belong to so that results
/// from an abandoned session are dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Host asked for a new session
    Start { language: Language },
    /// Host asked to end the session
    Stop,

    // Device events
    MicrophoneReady { id: Uuid },
    MicrophoneFailed { id: Uuid, err: String },

    // Transport events
    Connected { id: Uuid },
    ConnectFailed { id: Uuid, err: String },
    Remote { id: Uuid, event: RemoteEvent },

    /// Maximum session duration reached
    SessionTimeout { id: Uuid },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ResetTranscript,
    /// Open microphone and speaker with capture paused
    AcquireMicrophone { id: Uuid },
    /// Open the live session
    Connect { id: Uuid, language: Language },
    /// Unpause capture and install the live session
    BeginStreaming { id: Uuid },
    AppendTranscript(String),
    InterruptPlayback,
    /// Release capture, transport and playback
    Teardown,
    /// Push a fresh snapshot to subscribers
    Publish,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session IDs
/// - Always emit Publish after state changes
pub fn reduce(state: &VoiceState, event: VoiceEvent) -> (VoiceState, Vec<Effect>) {
    use Effect::*;
    use VoiceEvent::*;
    use VoiceState::*;

    let current_id = state.session_id();
    let is_current = |eid: Uuid| current_id == Some(eid);

    match (state, event) {
        // -----------------
        // Idle / Closed
        // -----------------
        (Idle | Closed { .. }, Start { language }) => {
            let id = Uuid::new_v4();
            (
                Connecting {
                    session_id: id,
                    language,
                },
                vec![ResetTranscript, AcquireMicrophone { id }, Publish],
            )
        }
        (Idle | Closed { .. }, Stop) => (state.clone(), vec![]),

        // -----------------
        // Connecting
        // -----------------
        (
            Connecting {
                session_id,
                language,
            },
            MicrophoneReady { id },
        ) if *session_id == id => (state.clone(), vec![Connect { id, language: *language }]),
        (Connecting { session_id, .. }, MicrophoneFailed { id, err }) if *session_id == id => (
            Closed { error: Some(err) },
            vec![Teardown, Publish],
        ),
        (
            Connecting {
                session_id,
                language,
            },
            Connected { id },
        ) if *session_id == id => (
            Active {
                session_id: *session_id,
                language: *language,
            },
            vec![BeginStreaming { id }, Publish],
        ),
        (Connecting { session_id, .. }, ConnectFailed { id, err }) if *session_id == id => (
            Closed { error: Some(err) },
            vec![Teardown, Publish],
        ),

        // -----------------
        // Active
        // -----------------
        (Active { session_id, .. }, Remote { id, event }) if *session_id == id => match event {
            RemoteEvent::Transcript(text) => (state.clone(), vec![AppendTranscript(text), Publish]),
            RemoteEvent::Interrupted => (state.clone(), vec![InterruptPlayback]),
            RemoteEvent::Closed(reason) => {
                log::info!("Session {} closed remotely: {:?}", session_id, reason);
                let error = match reason {
                    CloseReason::Error(e) => Some(e),
                    CloseReason::Local | CloseReason::Remote(_) => None,
                };
                (Closed { error }, vec![Teardown, Publish])
            }
        },
        (Active { session_id, .. }, SessionTimeout { id }) if *session_id == id => {
            log::warn!("Session {} auto-stopped (max duration reached)", session_id);
            (Closed { error: None }, vec![Teardown, Publish])
        }

        // -----------------
        // Connecting / Active
        // -----------------
        (Connecting { .. } | Active { .. }, Stop) => (Closed { error: None }, vec![Teardown, Publish]),
        (Connecting { session_id, .. }, Remote { id, event: RemoteEvent::Closed(reason) })
            if *session_id == id =>
        {
            let error = match reason {
                CloseReason::Error(e) => Some(e),
                CloseReason::Local | CloseReason::Remote(_) => None,
            };
            (Closed { error }, vec![Teardown, Publish])
        }
        // A second session is never started while one is running
        (Connecting { .. } | Active { .. }, Start { .. }) => (state.clone(), vec![]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, MicrophoneReady { id }) if !is_current(id) => (state.clone(), vec![]),
        (_, MicrophoneFailed { id, .. }) if !is_current(id) => (state.clone(), vec![]),
        (_, Connected { id }) if !is_current(id) => (state.clone(), vec![]),
        (_, ConnectFailed { id, .. }) if !is_current(id) => (state.clone(), vec![]),
        (_, Remote { id, .. }) if !is_current(id) => (state.clone(), vec![]),
        (_, SessionTimeout { id }) if !is_current(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connecting() -> (Uuid, VoiceState) {
        let id = Uuid::new_v4();
        (
            id,
            VoiceState::Connecting {
                session_id: id,
                language: Language::En,
            },
        )
    }

    fn active() -> (Uuid, VoiceState) {
        let id = Uuid::new_v4();
        (
            id,
            VoiceState::Active {
                session_id: id,
                language: Language::Pt,
            },
        )
    }

    #[test]
    fn idle_start_transitions_to_connecting() {
        let (next, effects) = reduce(&VoiceState::Idle, VoiceEvent::Start { language: Language::Pt });
        let VoiceState::Connecting { session_id, language } = next else {
            panic!("expected Connecting, got {:?}", next);
        };
        assert_eq!(language, Language::Pt);
        assert_eq!(
            effects,
            vec![
                Effect::ResetTranscript,
                Effect::AcquireMicrophone { id: session_id },
                Effect::Publish
            ]
        );
    }

    #[test]
    fn closed_start_opens_a_fresh_session() {
        let state = VoiceState::Closed {
            error: Some("boom".to_string()),
        };
        let (next, effects) = reduce(&state, VoiceEvent::Start { language: Language::En });
        assert!(matches!(next, VoiceState::Connecting { .. }));
        assert!(effects.contains(&Effect::ResetTranscript));
    }

    #[test]
    fn microphone_ready_requests_connection() {
        let (id, state) = connecting();
        let (next, effects) = reduce(&state, VoiceEvent::MicrophoneReady { id });
        assert_eq!(next, state);
        assert_eq!(
            effects,
            vec![Effect::Connect {
                id,
                language: Language::En
            }]
        );
    }

    #[test]
    fn microphone_failure_closes_with_error() {
        let (id, state) = connecting();
        let (next, effects) = reduce(
            &state,
            VoiceEvent::MicrophoneFailed {
                id,
                err: "denied".to_string(),
            },
        );
        assert_eq!(
            next,
            VoiceState::Closed {
                error: Some("denied".to_string())
            }
        );
        assert!(effects.contains(&Effect::Teardown));
        assert!(effects.contains(&Effect::Publish));
    }

    #[test]
    fn connected_transitions_to_active() {
        let (id, state) = connecting();
        let (next, effects) = reduce(&state, VoiceEvent::Connected { id });
        assert!(next.is_active());
        assert_eq!(effects, vec![Effect::BeginStreaming { id }, Effect::Publish]);
    }

    #[test]
    fn connect_failure_closes_with_error() {
        let (id, state) = connecting();
        let (next, _) = reduce(
            &state,
            VoiceEvent::ConnectFailed {
                id,
                err: "timeout".to_string(),
            },
        );
        assert!(matches!(next, VoiceState::Closed { error: Some(ref e) } if e == "timeout"));
    }

    #[test]
    fn stale_event_is_ignored() {
        let (_, state) = connecting();
        let (next, effects) = reduce(&state, VoiceEvent::Connected { id: Uuid::new_v4() });
        assert_eq!(next, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn late_completion_after_close_is_ignored() {
        let (id, state) = connecting();
        let (closed, _) = reduce(&state, VoiceEvent::Stop);
        let (next, effects) = reduce(&closed, VoiceEvent::Connected { id });
        assert_eq!(next, VoiceState::Closed { error: None });
        assert!(effects.is_empty());
    }

    // =========================================================================
    // Stop semantics
    // =========================================================================

    #[test]
    fn stop_during_connecting_tears_down() {
        let (_, state) = connecting();
        let (next, effects) = reduce(&state, VoiceEvent::Stop);
        assert_eq!(next, VoiceState::Closed { error: None });
        assert_eq!(effects, vec![Effect::Teardown, Effect::Publish]);
    }

    #[test]
    fn stop_twice_is_a_no_op() {
        let (_, state) = active();
        let (closed, _) = reduce(&state, VoiceEvent::Stop);
        let (next, effects) = reduce(&closed, VoiceEvent::Stop);
        assert_eq!(next, closed);
        assert!(effects.is_empty());

        let (idle, effects) = reduce(&VoiceState::Idle, VoiceEvent::Stop);
        assert_eq!(idle, VoiceState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn start_while_active_is_ignored() {
        let (_, state) = active();
        let (next, effects) = reduce(&state, VoiceEvent::Start { language: Language::En });
        assert_eq!(next, state);
        assert!(effects.is_empty());
    }

    // =========================================================================
    // Remote events
    // =========================================================================

    #[test]
    fn transcript_is_appended_while_active() {
        let (id, state) = active();
        let (next, effects) = reduce(
            &state,
            VoiceEvent::Remote {
                id,
                event: RemoteEvent::Transcript("hello".to_string()),
            },
        );
        assert_eq!(next, state);
        assert_eq!(
            effects,
            vec![Effect::AppendTranscript("hello".to_string()), Effect::Publish]
        );
    }

    #[test]
    fn interruption_keeps_state() {
        let (id, state) = active();
        let (next, effects) = reduce(
            &state,
            VoiceEvent::Remote {
                id,
                event: RemoteEvent::Interrupted,
            },
        );
        assert_eq!(next, state);
        assert_eq!(effects, vec![Effect::InterruptPlayback]);
    }

    #[test]
    fn remote_error_close_carries_error() {
        let (id, state) = active();
        let (next, effects) = reduce(
            &state,
            VoiceEvent::Remote {
                id,
                event: RemoteEvent::Closed(CloseReason::Error("reset".to_string())),
            },
        );
        assert_eq!(
            next,
            VoiceState::Closed {
                error: Some("reset".to_string())
            }
        );
        assert!(effects.contains(&Effect::Teardown));
    }

    #[test]
    fn remote_orderly_close_has_no_error() {
        let (id, state) = active();
        let (next, _) = reduce(
            &state,
            VoiceEvent::Remote {
                id,
                event: RemoteEvent::Closed(CloseReason::Remote("bye".to_string())),
            },
        );
        assert_eq!(next, VoiceState::Closed { error: None });
    }

    #[test]
    fn session_timeout_stops_active_session() {
        let (id, state) = active();
        let (next, effects) = reduce(&state, VoiceEvent::SessionTimeout { id });
        assert_eq!(next, VoiceState::Closed { error: None });
        assert!(effects.contains(&Effect::Teardown));

        let (stale, effects) = reduce(&state, VoiceEvent::SessionTimeout { id: Uuid::new_v4() });
        assert_eq!(stale, state);
        assert!(effects.is_empty());
    }
}
