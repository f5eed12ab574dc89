//! # LLM Helpers
//!
//! HTTP transport behind the [`Generator`] trait. One client covers the
//! Anthropic Messages API and every OpenAI-compatible chat completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::models::ModelConfig;
use crate::skills::generator::{GenerationRequest, Generator};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `Generator` over a provider's HTTP API
pub struct HttpGenerator {
    client: Client,
    config: ModelConfig,
    api_key: String,
    endpoint: String,
}

impl HttpGenerator {
    pub fn new(config: ModelConfig, api_key: impl Into<String>) -> Self {
        let endpoint = config.endpoint();
        Self {
            client: Client::new(),
            config,
            api_key: api_key.into(),
            endpoint,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Request body in the provider's format
    pub fn payload(&self, request: &GenerationRequest) -> Value {
        let prompt = request.render_prompt();
        if self.config.provider.is_openai_compatible() {
            let mut messages = Vec::new();
            if !request.system.is_empty() {
                messages.push(json!({ "role": "system", "content": request.system }));
            }
            messages.push(json!({ "role": "user", "content": prompt }));
            json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "messages": messages,
            })
        } else {
            let mut payload = json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "messages": [{ "role": "user", "content": prompt }],
            });
            if !request.system.is_empty() {
                payload["system"] = json!(request.system);
            }
            payload
        }
    }

    /// Pull the generated text out of a provider response
    pub fn extract_text(&self, body: &Value) -> Result<String, TransportError> {
        let text = if self.config.provider.is_openai_compatible() {
            body["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string)
        } else {
            body["content"].as_array().map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
        };

        text.filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TransportError::Response("response contained no text".into()))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let payload = self.payload(request);

        tracing::debug!(
            provider = self.config.provider.display_name(),
            model = %self.config.model,
            label = %request.label,
            "sending generation request"
        );

        let builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        let builder = if self.config.provider.is_openai_compatible() {
            builder.bearer_auth(&self.api_key)
        } else {
            builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
        };

        let response = builder
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(TransportError::RateLimited);
            }
            return Err(TransportError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Response(e.to_string()))?;
        self.extract_text(&body)
    }

    fn name(&self) -> &str {
        self.config.provider.display_name()
    }
}
