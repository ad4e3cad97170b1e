//! Gemini Live API protocol types
//!
//! JSON messages exchanged over the `BidiGenerateContent` WebSocket.
//!
//! # Protocol Overview
//!
//! 1. Connect to the endpoint with `?key=<api key>`
//! 2. Send `setup` (model, voice, system instruction, modalities)
//! 3. Receive `setupComplete`
//! 4. Stream microphone audio via `realtimeInput.mediaChunks`
//! 5. Receive `serverContent` carrying output transcription, inline audio,
//!    and the `interrupted` flag when the user barges in
//! 6. `goAway` announces that the server will close the connection soon

use serde::{Deserialize, Serialize};

use crate::audio::pcm::{decode_base64, encode_base64};
use crate::audio::AudioFrame;

/// Gemini Live API endpoint
pub const LIVE_API_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Sample rate of model audio when the MIME type does not say
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24000;

// ============================================================================
// Client Messages (sent TO Gemini)
// ============================================================================

/// Messages sent from client to the Live API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on the socket; configures the session
    Setup(Setup),
    /// Streamed microphone audio
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully-qualified model name, e.g. `models/gemini-2.5-flash-native-audio-preview-12-2025`
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty object that switches on transcription of the model's speech
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload tagged with its MIME type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl ClientMessage {
    /// Build the setup message
    pub fn setup(
        model: &str,
        voice_name: &str,
        system_instruction: &str,
        response_modalities: &[String],
        output_transcription: bool,
    ) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: response_modalities.to_vec(),
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(system_instruction.to_string()),
                    inline_data: None,
                }],
            },
            output_audio_transcription: output_transcription.then(TranscriptionConfig::default),
        })
    }

    /// Create a realtime input message from one captured frame
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: frame.mime_type(),
                data: encode_base64(&frame.samples),
            }],
        })
    }
}

// ============================================================================
// Server Messages (received FROM Gemini)
// ============================================================================

/// One message from the Live API. Fields are independent; a single message
/// may carry transcription, audio and the interruption flag together.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Decoded content of a server message, in processing order
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Transcript(String),
    Audio {
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    },
    Interrupted,
    TurnComplete,
    GoAway(Option<String>),
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into events: transcript first, then audio, then interruption.
    ///
    /// Audio parts whose base64 payload cannot be decoded are dropped here.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if let Some(text) = content.output_transcription.and_then(|t| t.text) {
                events.push(ServerEvent::Transcript(text));
            }

            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for blob in parts.into_iter().filter_map(|p| p.inline_data) {
                if !blob.mime_type.starts_with("audio/") {
                    continue;
                }
                match decode_base64(&blob.data) {
                    Ok(data) => events.push(ServerEvent::Audio {
                        data,
                        sample_rate: parse_sample_rate(&blob.mime_type)
                            .unwrap_or(DEFAULT_OUTPUT_SAMPLE_RATE),
                        channels: 1,
                    }),
                    Err(e) => log::warn!("Live: dropping audio part: {}", e),
                }
            }

            if content.interrupted == Some(true) {
                events.push(ServerEvent::Interrupted);
            }
            if content.turn_complete == Some(true) {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway(go_away.time_left));
        }

        events
    }
}

/// Extract `rate=N` from a MIME type such as `audio/pcm;rate=24000`
pub fn parse_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup(
            "gemini-2.5-flash-native-audio-preview-12-2025",
            "Puck",
            "Be encouraging.",
            &["AUDIO".to_string()],
            true,
        );
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        let setup = &json["setup"];

        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-12-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be encouraging.");
        assert!(setup["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_setup_without_transcription_omits_field() {
        let msg = ClientMessage::setup("models/x", "Puck", "", &["AUDIO".to_string()], false);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"model\":\"models/x\""));
        assert!(!json.contains("outputAudioTranscription"));
    }

    #[test]
    fn test_audio_serialization() {
        let frame = AudioFrame {
            samples: vec![0x1234, 0x5678],
            sample_rate: 16000,
            sequence: 0,
        };
        let json: serde_json::Value = serde_json::to_value(ClientMessage::audio(&frame)).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];

        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        let bytes = STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
        assert_eq!(bytes, vec![0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_setup_complete_deserialization() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert_eq!(msg.into_events(), vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn test_server_content_events_in_order() {
        let audio = STANDARD.encode([0u8, 0, 1, 0]);
        let json = format!(
            r#"{{
                "serverContent": {{
                    "modelTurn": {{ "parts": [ {{ "inlineData": {{ "mimeType": "audio/pcm;rate=24000", "data": "{}" }} }} ] }},
                    "outputTranscription": {{ "text": "Keep going" }},
                    "interrupted": true
                }}
            }}"#,
            audio
        );
        let msg: ServerMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(
            msg.into_events(),
            vec![
                ServerEvent::Transcript("Keep going".to_string()),
                ServerEvent::Audio {
                    data: vec![0, 0, 1, 0],
                    sample_rate: 24000,
                    channels: 1,
                },
                ServerEvent::Interrupted,
            ]
        );
    }

    #[test]
    fn test_bad_audio_part_is_dropped() {
        let json = r#"{
            "serverContent": {
                "modelTurn": { "parts": [ { "inlineData": { "mimeType": "audio/pcm", "data": "%%%" } } ] },
                "turnComplete": true
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.into_events(), vec![ServerEvent::TurnComplete]);
    }

    #[test]
    fn test_go_away_and_unknown_fields() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"goAway": {"timeLeft": "10s"}, "usageMetadata": {"x": 1}}"#)
                .unwrap();
        assert_eq!(
            msg.into_events(),
            vec![ServerEvent::GoAway(Some("10s".to_string()))]
        );

        let msg: ServerMessage = serde_json::from_str(r#"{"toolCall": {}}"#).unwrap();
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_parse_sample_rate() {
        assert_eq!(parse_sample_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(parse_sample_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(parse_sample_rate("audio/pcm"), None);
        assert_eq!(parse_sample_rate("audio/pcm;rate=abc"), None);
    }
}
