//! OpenAI chat-completions client for the relay's single upstream call.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info};

use crate::error::Error;
use crate::input::InquiryInput;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Bounded output budget. One reply plus a small JSON object fits well under this.
const MAX_COMPLETION_TOKENS: u32 = 1000;

/// Seam between handlers and the completion service, so tests substitute fakes.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Dispatch one prompt (attaching the image when the input carries one)
    /// and return the raw model text. Never retried: each call may incur cost.
    async fn complete(&self, prompt: &str, input: &InquiryInput) -> Result<String, Error>;
}

/// OpenAI client for chat completions.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    /// Create a new client, reading API key from OPENAI_API_KEY env var.
    /// OPENAI_MODEL overrides the default model.
    pub fn from_env(client: Client) -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client,
            api_key,
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        })
    }

}

#[async_trait]
impl CompletionGateway for OpenAiClient {
    async fn complete(&self, prompt: &str, input: &InquiryInput) -> Result<String, Error> {
        let message = match input {
            InquiryInput::Image { bytes, mime_type } => {
                Message::user_with_image(prompt, bytes, mime_type)
            }
            InquiryInput::Text { .. } => Message::user(prompt),
        };

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![message],
            max_tokens: Some(MAX_COMPLETION_TOKENS),
        };

        debug!("Sending request to OpenAI: model={}", request.model);

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("malformed response envelope: {}", e)))?;

        if let Some(usage) = &response.usage {
            info!(
                "OpenAI response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Upstream("completion has no message content".to_string()))
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    role: Role,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

impl Message {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with text and one base64 data-URL image.
    fn user_with_image(text: impl Into<String>, bytes: &[u8], mime_type: &str) -> Self {
        let data_url = format!("data:{};base64,{}", mime_type, BASE64.encode(bytes));
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }
    }
}
