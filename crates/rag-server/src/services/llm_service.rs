use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::LiteLlmConfig;
use crate::models::Usage;
use crate::utils::error::AppError;
use crate::utils::limiters::Limiters;
use crate::utils::sanitize::sanitize_error_message;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Overrides the configured gateway timeout (the grounding verifier
    /// doubles it).
    pub timeout_override: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: None,
            temperature: 0.3,
            max_tokens: 1000,
            timeout_override: None,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// Chat-completion capability consumed by the coordinators.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AppError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// OpenAI-compatible chat gateway client. No caching at this layer.
pub struct LlmClient {
    client: Client,
    config: LiteLlmConfig,
    limiters: Arc<Limiters>,
}

impl LlmClient {
    pub fn new(config: LiteLlmConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            // Per-request deadlines are enforced via tokio::time::timeout so
            // the grounding verifier can stretch them.
            client: Client::new(),
            config,
            limiters,
        }
    }
}

#[async_trait]
impl ChatCompleter for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AppError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm.clone(),
            self.limiters.acquire_timeout,
            "llm",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "llm", "wait_queue");

        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let body = ChatCompletionBody {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.llm_model.clone()),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let timeout = request.timeout_override.unwrap_or(self.config.timeout);
        let url = format!("{}/chat/completions", self.config.base_url);

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| AppError::Timeout(format!("LLM request timed out after {:?}", timeout)))?
            .map_err(AppError::from)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            // Full detail stays server-side; callers get a sanitized message
            error!("LLM API error ({}): {}", status, detail);
            return Err(AppError::from_status(
                status,
                format!("LLM error: {}", sanitize_error_message(&detail)),
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("LLM response parse error: {}", e)))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(Completion {
            content,
            model: parsed.model,
            usage: parsed.usage,
        })
    }
}
