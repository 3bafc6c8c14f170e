use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use cirrus_core::config::{LlmConfig, LlmProvider};

use crate::prompts::PromptError;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One call to the text-generation capability.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// System-level context; empty when the prompt stands alone.
    pub context: String,
    /// Ask the backend for a JSON document instead of free text.
    pub structured: bool,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>, temperature: f32) -> Self {
        Self { prompt: prompt.into(), context: String::new(), structured: false, temperature }
    }

    pub fn structured(prompt: impl Into<String>, temperature: f32) -> Self {
        Self { structured: true, ..Self::text(prompt, temperature) }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("prompt rendering failed: {0}")]
    Prompt(#[from] PromptError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("text generation is misconfigured: {0}")]
    Configuration(String),
}

/// Opaque `prompt -> text` capability. Implementations are treated as stateless.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

/// Text generation over the provider's HTTP API.
pub struct HttpTextGenerator {
    provider: LlmProvider,
    model: String,
    api_key: Option<SecretString>,
    base_url: String,
    max_tokens: u32,
    http: Client,
}

impl HttpTextGenerator {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Anthropic) => ANTHROPIC_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => {
                return Err(GenerationError::Configuration(
                    "ollama requires llm.base_url".to_string(),
                ))
            }
        };

        if config.provider != LlmProvider::Ollama && config.api_key.is_none() {
            return Err(GenerationError::Configuration(format!(
                "{:?} requires llm.api_key",
                config.provider
            )));
        }

        let http =
            Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            provider: config.provider,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            base_url,
            max_tokens: config.max_tokens,
            http,
        })
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/v1/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/v1/messages", self.base_url),
            LlmProvider::Ollama => format!("{}/api/generate", self.base_url),
        }
    }

    fn build_request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        match self.provider {
            LlmProvider::OpenAi => {
                let mut messages = Vec::new();
                if !request.context.is_empty() {
                    messages.push(serde_json::json!({ "role": "system", "content": request.context }));
                }
                messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

                let mut body = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "temperature": request.temperature,
                    "max_tokens": self.max_tokens,
                });
                if request.structured {
                    body["response_format"] = serde_json::json!({ "type": "json_object" });
                }
                body
            }
            LlmProvider::Anthropic => {
                let mut body = serde_json::json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "temperature": request.temperature,
                    "messages": [{ "role": "user", "content": request.prompt }],
                });
                if !request.context.is_empty() {
                    body["system"] = serde_json::json!(request.context);
                }
                body
            }
            LlmProvider::Ollama => {
                let mut body = serde_json::json!({
                    "model": self.model,
                    "prompt": request.prompt,
                    "stream": false,
                    "options": {
                        "temperature": request.temperature,
                        "num_predict": self.max_tokens,
                    },
                });
                if !request.context.is_empty() {
                    body["system"] = serde_json::json!(request.context);
                }
                if request.structured {
                    body["format"] = serde_json::json!("json");
                }
                body
            }
        }
    }

    fn extract_text(&self, payload: &str) -> Result<String, GenerationError> {
        let invalid = |error: serde_json::Error| GenerationError::InvalidResponse(error.to_string());

        let text = match self.provider {
            LlmProvider::OpenAi => {
                let response: OpenAiResponse = serde_json::from_str(payload).map_err(invalid)?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| GenerationError::InvalidResponse("no choices".to_string()))?
            }
            LlmProvider::Anthropic => {
                let response: AnthropicResponse =
                    serde_json::from_str(payload).map_err(invalid)?;
                response
                    .content
                    .into_iter()
                    .filter(|block| block.kind == "text")
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("")
            }
            LlmProvider::Ollama => {
                let response: OllamaResponse = serde_json::from_str(payload).map_err(invalid)?;
                response.response
            }
        };

        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        debug!(
            event_name = "llm.request_started",
            provider = ?self.provider,
            model = %self.model,
            structured = request.structured,
            temperature = request.temperature,
            "sending generation request"
        );

        let mut builder = self.http.post(self.endpoint()).json(&self.build_request_body(&request));
        builder = match (self.provider, &self.api_key) {
            (LlmProvider::OpenAi, Some(key)) => builder.bearer_auth(key.expose_secret()),
            (LlmProvider::Anthropic, Some(key)) => builder
                .header("x-api-key", key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION),
            _ => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let payload = response.text().await?;

        if !status.is_success() {
            return Err(GenerationError::Api { status: status.as_u16(), message: payload });
        }

        self.extract_text(&payload)
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Deterministic generator that replays queued replies in order and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedTextGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedTextGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let generator = Self::default();
        for reply in replies {
            generator.push_reply(reply);
        }
        generator
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    /// Queues a failure that surfaces as `GenerationError::Api { status: 503, .. }`.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock_replies().push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        match self.replies.lock() {
            Ok(replies) => replies,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }

        match self.lock_replies().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(GenerationError::Api { status: 503, message }),
            None => Err(GenerationError::InvalidResponse("no scripted reply left".to_string())),
        }
    }
}
