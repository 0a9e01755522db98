//! Request/response client for the text model: scenario chat and
//! vocabulary cards.

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use devtalk_core::live::protocol::Content;
use devtalk_core::tutor::{scenario_instruction, SCENARIO_KICKOFF, VOCABULARY_PROMPT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<TextGenerationConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextGenerationConfig {
    pub response_mime_type: String,
    pub response_schema: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

impl GenerateResponse {
    /// Text parts of the first candidate, concatenated.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

fn with_role(mut content: Content, role: &str) -> Content {
    content.role = Some(role.to_string());
    content
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One blocking generate-content round trip.
pub trait GenerateContent {
    fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;
}

impl<T: GenerateContent + ?Sized> GenerateContent for &T {
    fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        (**self).generate(request)
    }
}

pub struct GeminiTextClient {
    http: reqwest::blocking::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTextClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_API_BASE.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

impl GenerateContent for GeminiTextClient {
    fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .context("text model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, "text model returned non-success status");
            bail!("text model returned {status}: {}", body.trim());
        }

        response
            .json::<GenerateResponse>()
            .context("text model response was not valid JSON")
    }
}

// ---------------------------------------------------------------------------
// Scenario chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    fn wire_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A role-play conversation for one scenario.
///
/// `messages` is the visible transcript. `turns` is what the model sees: it
/// also holds the hidden kickoff turn, and a user turn only lands there once
/// the model has answered it.
pub struct ChatSession<C> {
    client: C,
    scenario: String,
    system_instruction: Content,
    turns: Vec<Content>,
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl<C: GenerateContent> ChatSession<C> {
    /// Opens the scenario and fetches the model's first line.
    pub fn start(client: C, scenario: &str) -> anyhow::Result<Self> {
        let mut session = Self {
            client,
            scenario: scenario.to_string(),
            system_instruction: Content::text(scenario_instruction(scenario)),
            turns: Vec::new(),
            messages: Vec::new(),
            next_id: 0,
        };
        let reply = session
            .exchange(SCENARIO_KICKOFF)
            .with_context(|| format!("could not start scenario '{scenario}'"))?;
        session.push_message(ChatRole::Model, reply);
        Ok(session)
    }

    /// Sends a user line. The user message stays in the transcript even when
    /// the request fails.
    pub fn send(&mut self, text: &str) -> anyhow::Result<&ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            bail!("message is empty");
        }
        self.push_message(ChatRole::User, text.to_string());
        let reply = self.exchange(text)?;
        Ok(self.push_message(ChatRole::Model, reply))
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn exchange(&mut self, text: &str) -> anyhow::Result<String> {
        let user_turn = with_role(Content::text(text), ChatRole::User.wire_name());
        let mut contents = self.turns.clone();
        contents.push(user_turn.clone());

        let request = GenerateRequest {
            contents,
            system_instruction: Some(self.system_instruction.clone()),
            generation_config: None,
        };
        let reply = self
            .client
            .generate(&request)?
            .text()
            .context("text model returned no text")?;

        debug!(turns = self.turns.len() + 2, "chat exchange complete");
        self.turns.push(user_turn);
        self.turns.push(with_role(
            Content::text(reply.clone()),
            ChatRole::Model.wire_name(),
        ));
        Ok(reply)
    }

    fn push_message(&mut self, role: ChatRole, text: String) -> &ChatMessage {
        let timestamp = Utc::now();
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id: format!("{}-{}", timestamp.timestamp_millis(), self.next_id),
            role,
            text,
            timestamp,
        });
        &self.messages[self.messages.len() - 1]
    }
}

// ---------------------------------------------------------------------------
// Vocabulary cards
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub term: String,
    pub definition: String,
    pub example: String,
}

pub fn vocabulary_request() -> GenerateRequest {
    GenerateRequest {
        contents: vec![with_role(Content::text(VOCABULARY_PROMPT), "user")],
        system_instruction: None,
        generation_config: Some(TextGenerationConfig {
            response_mime_type: "application/json".into(),
            response_schema: json!({
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "term": { "type": "STRING" },
                        "definition": { "type": "STRING" },
                        "example": { "type": "STRING" }
                    },
                    "required": ["term", "definition", "example"]
                }
            }),
        }),
    }
}

pub fn parse_vocabulary(text: &str) -> anyhow::Result<Vec<VocabularyItem>> {
    serde_json::from_str(text.trim()).context("vocabulary response did not match the card schema")
}

/// Fetches one batch of cards. Failures are returned as-is; there is no retry.
pub fn fetch_vocabulary(client: &impl GenerateContent) -> anyhow::Result<Vec<VocabularyItem>> {
    let response = client.generate(&vocabulary_request())?;
    let text = response.text().context("vocabulary response was empty")?;
    parse_vocabulary(&text)
}
