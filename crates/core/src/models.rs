//! # Pressroom Models
//!
//! LLM provider selection. Every stage uses the same `ModelConfig` unless
//! the coordinator configuration overrides it per stage.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::TransportError;
use crate::skills::generator::Generator;
use crate::skills::llm_helpers::HttpGenerator;

/// Supported LLM providers
///
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Anthropic,
            LlmProvider::OpenAI,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "https://api.anthropic.com/v1/messages",
            LlmProvider::OpenAI => "https://api.openai.com/v1/chat/completions",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            LlmProvider::Grok => "https://api.x.ai/v1/chat/completions",
            LlmProvider::DeepSeek => "https://api.deepseek.com/chat/completions",
        }
    }

    /// Whether requests use the OpenAI chat completions format
    pub fn is_openai_compatible(&self) -> bool {
        !matches!(self, LlmProvider::Anthropic)
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

/// Configuration for LLM model selection
///
/// ## Example
/// ```rust,ignore
/// use pressroom_core::models::{ModelConfig, LlmProvider};
///
/// let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o");
/// let generator = config.create_generator()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.4
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new("claude-sonnet-4-20250514")
    }
}

impl ModelConfig {
    /// Anthropic model
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_provider(LlmProvider::Anthropic, model)
    }

    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> String {
        match (&self.base_url, self.provider.supports_base_url()) {
            (Some(base), true) => format!("{}/chat/completions", base.trim_end_matches('/')),
            _ => self.provider.default_endpoint().to_string(),
        }
    }

    /// Create a generator for the configured provider, reading the API key
    /// from the environment
    pub fn create_generator(&self) -> Result<Arc<dyn Generator>, TransportError> {
        let key_var = self.provider.api_key_env();
        let api_key = std::env::var(key_var)
            .map_err(|_| TransportError::Config(format!("{} is not set", key_var)))?;
        Ok(Arc::new(HttpGenerator::new(self.clone(), api_key)))
    }
}
