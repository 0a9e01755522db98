//! JSON messages of the bidirectional generate-content stream.
//!
//! Only the fields this crate acts on are modelled; unknown fields are
//! ignored on input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::LiveSetup;
use crate::codec::EncodedChunk;

// ---------------------------------------------------------------------------
// Shared content types
// ---------------------------------------------------------------------------

/// Base64 payload tagged with its MIME type. Inbound audio may omit the
/// type; it is then treated as 24 kHz PCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl From<EncodedChunk> for Blob {
    fn from(chunk: EncodedChunk) -> Self {
        Self {
            mime_type: chunk.mime_type,
            data: chunk.data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
            role: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupConfig),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn setup(setup: &LiveSetup) -> Self {
        Self::Setup(SetupConfig::from(setup))
    }

    pub fn audio(chunk: EncodedChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk.into()],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    /// Fully qualified, e.g. `models/gemini-2.5-flash-native-audio-preview-09-2025`.
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

impl From<&LiveSetup> for SetupConfig {
    fn from(setup: &LiveSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };
        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: Content::text(setup.system_instruction.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Base64 audio of every inline-data part in the model turn, in order.
    pub fn audio_payloads(&self) -> Vec<&str> {
        self.server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
            .map(|turn| {
                turn.parts
                    .iter()
                    .filter_map(|p| p.inline_data.as_ref())
                    .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
                    .map(|blob| blob.data.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Text parts of the model turn (transcripts, when enabled).
    pub fn text_parts(&self) -> Vec<&str> {
        self.server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
            .map(|turn| turn.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.turn_complete)
            .unwrap_or(false)
    }

    /// A model turn carrying one inline PCM payload.
    pub fn with_audio(data: impl Into<String>) -> Self {
        Self {
            setup_complete: None,
            server_content: Some(ServerContent {
                model_turn: Some(Content {
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(Blob {
                            mime_type: "audio/pcm;rate=24000".into(),
                            data: data.into(),
                        }),
                    }],
                    role: Some("model".into()),
                }),
                ..ServerContent::default()
            }),
        }
    }

    /// The server's barge-in signal.
    pub fn interruption() -> Self {
        Self {
            setup_complete: None,
            server_content: Some(ServerContent {
                interrupted: Some(true),
                ..ServerContent::default()
            }),
        }
    }
}
