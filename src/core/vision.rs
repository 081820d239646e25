//! Vision model client.
//!
//! [`VisionClient`] is the seam between the analysis flows and the model
//! API. [`OpenAiVisionClient`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint and sends the image inline as a data URL.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::VisionError;

/// Base64-encoded image ready to send to the model.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type, e.g. `image/jpeg`
    pub media_type: String,
}

impl ImageInput {
    /// Encode raw bytes of the given MIME type.
    pub fn from_bytes(bytes: &[u8], media_type: &str) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.to_string(),
        }
    }

    /// Data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// System message
    pub system_prompt: String,
    /// Optional text sent alongside the image
    pub user_text: Option<String>,
    /// The image
    pub image: ImageInput,
    /// Overrides the client's default model
    pub model: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Image detail hint (`low`, `high`, `auto`)
    pub detail: Option<String>,
}

impl VisionRequest {
    /// A request with the given system prompt and image, 1000 tokens at 0.1.
    pub fn new(system_prompt: impl Into<String>, image: ImageInput) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_text: None,
            image,
            model: None,
            max_tokens: 1000,
            temperature: 0.1,
            detail: None,
        }
    }

    /// Set the generation limits.
    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Attach text to the user message.
    pub fn with_user_text(mut self, text: impl Into<String>) -> Self {
        self.user_text = Some(text.into());
        self
    }

    /// Use a different model for this call.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the image detail hint.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// What the model said.
#[derive(Debug, Clone)]
pub struct VisionResponse {
    /// Message content, trimmed
    pub text: String,
    /// Model that answered
    pub model: String,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

/// A vision-capable chat model.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Client name for logs.
    fn name(&self) -> &str;

    /// Default model identifier.
    fn model(&self) -> &str;

    /// Send one request.
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, VisionError>;
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiVisionClient {
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiVisionClient {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Whether an API key is set.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for OpenAiVisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiVisionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("configured", &self.is_configured())
            .finish()
    }
}

// --- Request types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ChatContent>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ChatContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn build_body<'a>(request: &VisionRequest, model: &'a str) -> ChatRequest<'a> {
    let mut parts = Vec::with_capacity(2);
    if let Some(text) = request.user_text.as_ref().filter(|t| !t.is_empty()) {
        parts.push(ChatContent::Text { text: text.clone() });
    }
    parts.push(ChatContent::ImageUrl {
        image_url: ImageUrl {
            url: request.image.data_url(),
            detail: request.detail.clone(),
        },
    });

    ChatRequest {
        model,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        messages: vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(request.system_prompt.clone()),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(parts),
            },
        ],
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, VisionError> {
        if !self.is_configured() {
            return Err(VisionError::NotConfigured(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }

        let start = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = build_body(request, model);
        let timeout_ms = self.timeout.as_millis() as u64;

        log::debug!(
            "calling {} model {} ({} bytes of image data)",
            self.name(),
            model,
            request.image.data.len()
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout(timeout_ms)
                } else {
                    VisionError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VisionError::Http {
                status: status.as_u16(),
                message: text.chars().take(500).collect(),
            });
        }

        let chat: ChatResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                VisionError::Timeout(timeout_ms)
            } else {
                VisionError::Parse(e.to_string())
            }
        })?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(VisionError::EmptyContent)?;

        let latency_ms = start.elapsed().as_millis() as u64;
        log::info!("{} answered in {}ms", self.name(), latency_ms);

        Ok(VisionResponse {
            text,
            model: chat.model.unwrap_or_else(|| model.to_string()),
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageInput {
        ImageInput::from_bytes(b"\x89PNG", "image/png")
    }

    #[test]
    fn test_data_url() {
        assert_eq!(image().data_url(), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_body_shape() {
        let req = VisionRequest::new("system", image())
            .with_user_text("hello")
            .with_detail("high")
            .with_sampling(1500, 0.1);
        let body = serde_json::to_value(build_body(&req, "gpt-test")).unwrap();

        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_tokens"], 1500);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system");
        let parts = &body["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["detail"], "high");
    }

    #[test]
    fn test_body_without_text_or_detail() {
        let req = VisionRequest::new("system", image());
        let body = serde_json::to_value(build_body(&req, "m")).unwrap();
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0]["image_url"].get("detail").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = OpenAiVisionClient::new("", "http://localhost:1", "m", Duration::from_secs(1));
        let err = client
            .complete(&VisionRequest::new("s", image()))
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::NotConfigured(_)));
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let client = OpenAiVisionClient::new("k", "https://api.example.com/v1/", "m", Duration::from_secs(1));
        assert_eq!(client.endpoint, "https://api.example.com/v1/chat/completions");
    }
}
