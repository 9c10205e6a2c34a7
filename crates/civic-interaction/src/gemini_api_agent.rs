//! Gemini `generateContent` client behind the inference backend trait.
//!
//! Calls `generateContent` for chat, JSON-mode, image understanding and
//! image generation requests. One agent serves one model; the inference
//! gateway chains several agents for fallback.

use async_trait::async_trait;
use civic_core::dialogue::{ConversationMessage, MessageRole, coalesce};
use civic_core::inference::{
    InferenceBackend, InferenceError, InferenceRequest, InferenceResponse, InlineImage, Modality,
    ResponseFormat,
};
use reqwest::{Client, StatusCode, header::HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Calls one Gemini model over HTTPS with an API key.
#[derive(Clone)]
pub struct GeminiApiAgent {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiApiAgent {
    /// The key is sent as a query parameter and never logged.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Shares one connection pool between agents.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Targets a different model with the same key.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_request(
        &self,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, InferenceError> {
        // The key travels in the query string; never log this URL.
        let url = format!(
            "{}/{model}:generateContent?key={api_key}",
            self.base_url,
            model = self.model,
            api_key = self.api_key
        );

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                let retryable = err.is_connect() || err.is_timeout();
                InferenceError::Http {
                    status: None,
                    message: format!("Gemini API request failed: {}", err.without_url()),
                    retryable,
                    retry_after: None,
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, body_text, retry_after));
        }

        response.json().await.map_err(|err| InferenceError::Http {
            status: None,
            message: format!("Failed to parse Gemini response: {}", err.without_url()),
            retryable: false,
            retry_after: None,
        })
    }
}

#[async_trait]
impl InferenceBackend for GeminiApiAgent {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        let body = build_request(request);
        debug!(
            model = %self.model,
            contents = body.contents.len(),
            json = request.response_format == ResponseFormat::Json,
            image = request.wants_image(),
            "Sending Gemini request"
        );
        let parsed = self.send_request(&body).await?;
        extract_response(parsed, &self.model)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineDataPayload,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPayload {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<InlineDataPayload>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[allow(dead_code)]
    code: Option<i32>,
    message: Option<String>,
    status: Option<String>,
}

// ============================================================================
// Mapping
// ============================================================================

fn wire_role(role: MessageRole) -> String {
    match role {
        MessageRole::User => "user".to_string(),
        MessageRole::Agent => "model".to_string(),
    }
}

fn build_request(request: &InferenceRequest) -> GenerateContentRequest {
    let mut turns: Vec<ConversationMessage> = request.history.clone();
    if !request.message.trim().is_empty() {
        turns.push(ConversationMessage::user(request.message.clone()));
    }
    // Conversations must open with a user turn
    let first_user = turns
        .iter()
        .position(|m| m.role == MessageRole::User)
        .unwrap_or(turns.len());
    let turns = coalesce(&turns[first_user..]);

    let mut contents: Vec<Content> = turns
        .into_iter()
        .map(|m| Content {
            role: Some(wire_role(m.role)),
            parts: vec![Part::Text { text: m.content }],
        })
        .collect();

    if !request.attachments.is_empty() {
        let needs_user_turn = contents
            .last()
            .map(|c| c.role.as_deref() != Some("user"))
            .unwrap_or(true);
        if needs_user_turn {
            contents.push(Content {
                role: Some("user".to_string()),
                parts: Vec::new(),
            });
        }
        if let Some(last) = contents.last_mut() {
            for attachment in &request.attachments {
                if let Some(label) = &attachment.label {
                    last.parts.push(Part::Text {
                        text: label.clone(),
                    });
                }
                last.parts.push(Part::InlineData {
                    inline_data: InlineDataPayload {
                        mime_type: attachment.image.mime_type.clone(),
                        data: attachment.image.data.clone(),
                    },
                });
            }
        }
    }

    let system_instruction = request.system_instruction.as_ref().map(|text| Content {
        role: None,
        parts: vec![Part::Text {
            text: text.to_string(),
        }],
    });

    let mut config = GenerationConfig {
        temperature: request.temperature,
        ..GenerationConfig::default()
    };
    if request.response_format == ResponseFormat::Json {
        config.response_mime_type = Some("application/json".to_string());
    }
    if request.wants_image() {
        config.response_modalities = Some(
            request
                .modalities
                .iter()
                .map(|m| match m {
                    Modality::Text => "TEXT".to_string(),
                    Modality::Image => "IMAGE".to_string(),
                })
                .collect(),
        );
    }
    let has_config = config.temperature.is_some()
        || config.response_mime_type.is_some()
        || config.response_modalities.is_some();

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: has_config.then_some(config),
    }
}

fn extract_response(
    response: GenerateContentResponse,
    model: &str,
) -> Result<InferenceResponse, InferenceError> {
    let parts = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    let mut text = String::new();
    let mut images = Vec::new();
    for part in parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(inline) = part.inline_data {
            images.push(InlineImage {
                mime_type: inline.mime_type,
                data: inline.data,
            });
        }
    }

    if text.trim().is_empty() && images.is_empty() {
        return Err(InferenceError::EmptyResponse);
    }

    Ok(InferenceResponse {
        text,
        images,
        backend: model.to_string(),
    })
}

fn map_http_error(
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> InferenceError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.clone());

    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    InferenceError::Http {
        status: Some(status.as_u16()),
        message,
        retryable,
        retry_after,
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // Only delta-seconds; HTTP-date values fall back to the default backoff.
    None
}
