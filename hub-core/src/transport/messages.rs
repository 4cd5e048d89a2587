//! JSON wire types for the live bidirectional session.
//!
//! Only the fields the session uses are modelled; everything else in a server
//! message is ignored by serde.

use serde::{Deserialize, Serialize};

use super::{LiveModelConfig, SessionEvent};
use crate::error::Result;

/// One media payload (`{ data, mimeType }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// A message queued for the remote model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub media: MediaBlob,
}

impl OutboundMessage {
    /// Realtime audio input, `data` already base64 encoded.
    pub fn audio(data: String, mime_type: impl Into<String>) -> Self {
        Self {
            media: MediaBlob {
                data,
                mime_type: mime_type.into(),
            },
        }
    }

    /// Serialize as a `realtimeInput` client message.
    ///
    /// # Errors
    /// Propagates serde failures.
    pub fn to_json(&self) -> Result<String> {
        let msg = ClientMessage::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![self.media.clone()],
            },
        };
        Ok(serde_json::to_string(&msg)?)
    }
}

// ── Client → server ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ClientMessage {
    Setup {
        setup: Setup,
    },
    RealtimeInput {
        #[serde(rename = "realtimeInput")]
        realtime_input: RealtimeInput,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaBlob>,
}

/// Resource name for the model, adding the `models/` prefix when missing.
pub fn model_resource_name(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// The first message on a new connection: audio-only responses in the
/// configured voice and persona.
///
/// # Errors
/// Propagates serde failures.
pub fn setup_message(config: &LiveModelConfig) -> Result<String> {
    let msg = ClientMessage::Setup {
        setup: Setup {
            model: model_resource_name(&config.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
        },
    };
    Ok(serde_json::to_string(&msg)?)
}

// ── Server → client ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    model_turn: Option<ModelTurn>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

/// Translate one server message into session events, in delivery order.
///
/// An interruption is reported before any audio carried by the same message,
/// so that audio starts a fresh playback queue.
///
/// # Errors
/// `HubError::Json` when the text is not a JSON object.
pub fn parse_server_message(text: &str) -> Result<Vec<SessionEvent>> {
    let msg: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(SessionEvent::Opened);
    }

    if let Some(content) = msg.server_content {
        if content.interrupted {
            events.push(SessionEvent::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .filter(|d| !d.data.is_empty())
                    .map(|d| SessionEvent::AudioReceived(d.data)),
            );
        }
    }

    Ok(events)
}
