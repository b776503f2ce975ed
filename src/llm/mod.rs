//! LLM capability layer.
//!
//! Provider-agnostic chat messages, the [`LlmProvider`] trait, an
//! `OpenAI`-compatible implementation covering all supported vendors,
//! and tolerant JSON extraction for model output.
//!
//! Provider selection is explicit: [`create_provider`] resolves a name
//! against [`LlmConfig`](crate::config::LlmConfig) and returns a boxed
//! provider that callers inject into agents. There is no process-global
//! provider registry.

pub mod extract;
pub mod message;
pub mod provider;
pub mod providers;

use std::sync::Arc;

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::LlmError;

pub use extract::{extract_json_object, first_json_object, strip_code_fences};
pub use message::{
    ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, assistant_message, system_message,
    user_message,
};
pub use provider::LlmProvider;
pub use providers::OpenAiCompatProvider;

/// Known provider names.
pub const PROVIDER_NAMES: [&str; 4] = ["naver", "openai", "cerebras", "gemini"];

/// Creates a provider by name from the LLM configuration.
///
/// # Errors
///
/// Returns [`LlmError::UnknownProvider`] for unrecognized names and
/// [`LlmError::ApiKeyMissing`] when no key can be resolved.
pub fn create_provider(name: &str, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider_config = config
        .providers
        .get(name)
        .ok_or_else(|| LlmError::UnknownProvider {
            name: name.to_string(),
        })?;
    let provider = OpenAiCompatProvider::new(name, provider_config)?;
    Ok(Arc::new(provider))
}

/// Creates the configured default provider.
///
/// # Errors
///
/// Same failure modes as [`create_provider`].
pub fn create_default_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    create_provider(&config.default_provider, config)
}

/// A provider bound to its model and sampling settings.
///
/// This is the `generate(messages) → text` capability agents consume;
/// cloning is cheap and every clone shares the underlying provider.
#[derive(Clone)]
pub struct LlmHandle {
    provider: Arc<dyn LlmProvider>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
}

impl std::fmt::Debug for LlmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmHandle")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

impl LlmHandle {
    /// Binds a provider to a model and sampling settings.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, config: &ProviderConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Binds a provider with explicit settings (used by tests).
    #[must_use]
    pub fn with_settings(
        provider: Arc<dyn LlmProvider>,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            model: model.to_string(),
            temperature,
            max_tokens,
        }
    }

    /// Name of the underlying provider.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Executes a chat completion over an ordered message sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on provider failure.
    pub async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        json_mode: bool,
    ) -> Result<ChatResponse, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            json_mode,
        };
        self.provider.chat(&request).await
    }

    /// Convenience: optional system prompt plus a single user message,
    /// returning the text content.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on provider failure.
    pub async fn generate_simple(
        &self,
        system: Option<&str>,
        user: &str,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(system_message(system));
        }
        messages.push(user_message(user));
        Ok(self.generate(messages, false).await?.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig::default();
        let result = create_provider("mistral", &config);
        assert!(matches!(result, Err(LlmError::UnknownProvider { .. })));
    }

    #[test]
    fn test_provider_names_match_config() {
        let config = LlmConfig::default();
        for name in PROVIDER_NAMES {
            assert!(config.providers.contains_key(name));
        }
    }
}
