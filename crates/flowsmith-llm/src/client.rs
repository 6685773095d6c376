use std::future::Future;

use crate::types::*;
use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            // LM Studio default
            base_url: "http://localhost:1234/v1".to_string(),
            api_key: None,
            model: "local-model".to_string(),
            temperature: Some(0.2),
            max_tokens: Some(4096),
        }
    }
}

/// A chat-completions endpoint. Implemented by [`LlmClient`] and by test doubles.
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    fn chat(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
    ) -> impl Future<Output = Result<ChatResponse>> + Send;
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

impl ChatBackend for LlmClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let tool_choice = tools.as_ref().map(|_| "auto".to_string());
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            tools,
            tool_choice,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(url = %url, messages = request.messages.len(), "LLM request");

        let mut req_builder = self.http.post(&url).json(&request);

        if let Some(api_key) = &self.config.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let response = req_builder
            .send()
            .await
            .context("Failed to send request to LLM")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM request failed ({}): {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        info!(
            "LLM response: finish_reason={:?}, tool_calls={:?}",
            chat_response
                .choices
                .first()
                .and_then(|c| c.finish_reason.as_ref()),
            chat_response.choices.first().and_then(|c| c
                .message
                .tool_calls
                .as_ref()
                .map(|tc| tc.len()))
        );

        Ok(chat_response)
    }
}
