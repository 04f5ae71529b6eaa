//! Gemini `generateContent` client for the judging model
//!
//! One request per agent round: the full conversation history, the system
//! instruction (template + rubric) and the tool declaration go up; free text
//! and zero or more tool calls come back.

use serde::Deserialize;

use super::tool_use::{FunctionCall, FunctionDeclaration, Part, Turn};

/// What one model round produced: optional free text and the tool calls
/// requested this round, in emission order.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: Option<String>,
    pub tool_calls: Vec<FunctionCall>,
}

impl ModelReply {
    /// Rebuild the `model` turn this reply corresponds to, text part first,
    /// then the tool-call parts in order.
    pub fn to_model_turn(&self) -> Turn {
        let mut parts = Vec::new();
        if let Some(text) = &self.text {
            parts.push(Part::text(text.clone()));
        }
        for call in &self.tool_calls {
            parts.push(Part::call(call.clone()));
        }
        Turn::model(parts)
    }
}

/// Error type for judging-model calls
#[derive(Debug)]
pub enum ModelError {
    Request(reqwest::Error),
    Status { code: u16, body: String },
    Parse(serde_json::Error),
    EmptyCandidates,
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Request(e) => write!(f, "Request error: {}", e),
            ModelError::Status { code, body } => {
                write!(f, "Model API returned HTTP {}: {}", code, body)
            }
            ModelError::Parse(e) => write!(f, "Parse error: {}", e),
            ModelError::EmptyCandidates => write!(f, "Model returned no candidates"),
        }
    }
}

impl std::error::Error for ModelError {}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Request(e)
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Parse(e)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

/// Client for Gemini's `generateContent` endpoint
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - API base (e.g., "https://generativelanguage.googleapis.com")
    /// * `api_key` - Gemini API key
    /// * `model` - Model name (e.g., "gemini-2.5-flash")
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one round: full history + system instruction + tool declarations.
    ///
    /// Grading runs at temperature 0 so repeated runs of the same submission
    /// stay as comparable as the model allows.
    pub async fn generate(
        &self,
        history: &[Turn],
        system_instruction: &str,
        tools: &[FunctionDeclaration],
    ) -> Result<ModelReply, ModelError> {
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let body = serde_json::json!({
            "contents": history,
            "systemInstruction": {
                "parts": [{ "text": system_instruction }]
            },
            "tools": [{ "functionDeclarations": tools }],
            "generationConfig": { "temperature": 0.0 }
        });

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ModelError::Status {
                code: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or(ModelError::EmptyCandidates)?;

        Ok(reply_from_parts(content.parts))
    }
}

/// Fold a candidate's parts into a `ModelReply`: text parts concatenate in
/// order, functionCall parts keep their emission order.
fn reply_from_parts(parts: Vec<Part>) -> ModelReply {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(call);
        }
    }

    ModelReply {
        text: if text.is_empty() { None } else { Some(text) },
        tool_calls,
    }
}
