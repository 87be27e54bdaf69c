//! Chat model providers
//!
//! `ChatModel` is the seam between the broker and whatever serves the
//! completions. `OpenAiChat` speaks the OpenAI-compatible chat-completions
//! protocol, which also covers local deployments via `LLM_BASE_URL`.

use std::time::Duration;

use async_trait::async_trait;
use langhook_config::LlmSettings;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::Result;

/// Default request timeout for completions
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// One completed chat exchange
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A chat-completion capable model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one system+user exchange
    async fn chat(&self, system: &str, user: &str) -> Result<ChatOutcome>;

    /// Model identifier, used for cost estimation
    fn model(&self) -> &str;
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Build a client from settings; `None` when no API key is configured
    pub fn from_settings(settings: &LlmSettings) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url,
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatOutcome> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "llm provider returned an error");
            return Err(LlmError::Unavailable(format!(
                "provider returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("no completion choices".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        // providers occasionally omit usage; fall back to a 4-chars-per-token guess
        let prompt_tokens = if usage.prompt_tokens > 0 {
            usage.prompt_tokens
        } else {
            ((system.len() + user.len()) / 4) as u32
        };
        let completion_tokens = if usage.completion_tokens > 0 {
            usage.completion_tokens
        } else {
            (content.len() / 4) as u32
        };

        Ok(ChatOutcome {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
