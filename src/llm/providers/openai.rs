//! `OpenAI`-compatible provider implementation using the `async-openai` crate.
//!
//! All four supported vendors (`openai`, `naver`, `cerebras`, `gemini`)
//! expose `OpenAI`-style chat completion endpoints, so a single
//! implementation parameterized by base URL and model covers them.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, ResponseFormat,
};
use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::LlmError;
use crate::llm::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::llm::provider::LlmProvider;

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions. Compatible
/// with any API that follows the `OpenAI` chat completion spec.
pub struct OpenAiCompatProvider {
    name: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiCompatProvider {
    /// Creates a new provider from per-provider configuration.
    ///
    /// The API key is taken from `config.api_key` or the vendor's
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ApiKeyMissing`] if no key can be resolved.
    pub fn new(name: &str, config: &ProviderConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(crate::config::LlmConfig::api_key_env(name)).ok())
            .ok_or_else(|| LlmError::ApiKeyMissing {
                provider: name.to_string(),
            })?;

        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);

        if let Some(ref base_url) = config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Ok(Self {
            name: name.to_string(),
            client: Client::with_config(openai_config),
        })
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                        msg.content.clone(),
                    ),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                    msg.content.clone(),
                ),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(
                        async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(
                            msg.content.clone(),
                        ),
                    ),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let response_format = if request.json_mode {
            Some(ResponseFormat::JsonObject)
        } else {
            None
        };

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature.filter(|&t| t != 0.0),
            max_completion_tokens: request.max_tokens,
            response_format,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let openai_request = Self::build_request(request);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| LlmError::ApiRequest {
                message: e.to_string(),
                status: None,
            })?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message;

    #[test]
    fn test_convert_system_message() {
        let msg = message::system_message("test");
        let converted = OpenAiCompatProvider::convert_message(&msg);
        assert!(matches!(converted, ChatCompletionRequestMessage::System(_)));
    }

    #[test]
    fn test_convert_user_message() {
        let msg = message::user_message("hello");
        let converted = OpenAiCompatProvider::convert_message(&msg);
        assert!(matches!(converted, ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_convert_assistant_message() {
        let msg = message::assistant_message("reply");
        let converted = OpenAiCompatProvider::convert_message(&msg);
        assert!(matches!(
            converted,
            ChatCompletionRequestMessage::Assistant(_)
        ));
    }

    #[test]
    fn test_build_request_json_mode() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![message::user_message("test")],
            temperature: Some(0.0),
            max_tokens: Some(100),
            json_mode: true,
        };
        let built = OpenAiCompatProvider::build_request(&request);
        assert!(built.response_format.is_some());
        // temperature of exactly 0.0 is omitted for providers that reject it
        assert!(built.temperature.is_none());
    }

    #[test]
    fn test_build_request_plain() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![message::user_message("test")],
            temperature: Some(0.7),
            max_tokens: None,
            json_mode: false,
        };
        let built = OpenAiCompatProvider::build_request(&request);
        assert!(built.response_format.is_none());
        assert_eq!(built.temperature, Some(0.7));
    }

    #[test]
    fn test_missing_api_key() {
        let config = ProviderConfig {
            model: "m".to_string(),
            temperature: 0.0,
            max_tokens: 128,
            base_url: None,
            api_key: None,
        };
        // Use a vendor whose env var is almost certainly unset
        let result = OpenAiCompatProvider::new("cerebras", &config);
        if std::env::var("CEREBRAS_API_KEY").is_err() {
            assert!(matches!(result, Err(LlmError::ApiKeyMissing { .. })));
        }
    }
}
