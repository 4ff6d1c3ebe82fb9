pub mod providers;
pub mod retry;
pub mod streaming;

use futures::StreamExt;
use tracing::debug;

use blogsmith_core::config::ModelConfig;
use blogsmith_core::error::{BlogsmithError, Result};
use blogsmith_core::traits::LlmClient;
use blogsmith_core::types::{ChatMessage, Completion, StreamDelta};

pub use providers::anthropic::AnthropicClient;
pub use providers::gemini::GeminiClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" | "google" => Ok(Box::new(GeminiClient::new())),
        "anthropic" | "claude" => Ok(Box::new(AnthropicClient::new())),
        "openai" => Ok(Box::new(OpenAiClient::new())),
        other => match providers::presets::get_preset(other) {
            Some(preset) => Ok(Box::new(OpenAiClient::with_preset(preset))),
            None if config.base_url.is_some() => Ok(Box::new(OpenAiClient::new())),
            None => Err(BlogsmithError::UnsupportedProvider(other.to_string())),
        },
    }
}

/// Build the configured client stack: the primary provider, wrapped in a
/// [`RetryingClient`] when `[model.retry]` or fallback models are configured.
pub fn build_client(primary: &ModelConfig, fallbacks: &[ModelConfig]) -> Result<Box<dyn LlmClient>> {
    let client = create_client(primary)?;
    if primary.retry.is_none() && fallbacks.is_empty() {
        return Ok(client);
    }

    let fallback_clients = fallbacks
        .iter()
        .map(|fb| create_client(fb).map(|c| (fb.clone(), c)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Box::new(RetryingClient::new(
        client,
        fallback_clients,
        primary.retry.clone().unwrap_or_default(),
    )))
}

/// Send a single user prompt and collect the streamed reply into one
/// [`Completion`]. A stream error aborts the call.
pub async fn complete(llm: &dyn LlmClient, config: &ModelConfig, prompt: &str) -> Result<Completion> {
    let messages = vec![ChatMessage::user(prompt)];
    let mut stream = llm.chat_stream(config, messages).await?;

    let mut completion = Completion::default();
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::TextDelta(text) => completion.content.push_str(&text),
            StreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => {
                completion.input_tokens += input_tokens;
                completion.output_tokens += output_tokens;
            }
            StreamDelta::Stop(reason) => completion.stop_reason = Some(reason),
            StreamDelta::MessageId(_) => {}
        }
    }

    debug!(
        model = %config.model_id,
        chars = completion.content.len(),
        input_tokens = completion.input_tokens,
        output_tokens = completion.output_tokens,
        "LLM completion collected"
    );

    Ok(completion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogsmith_core::types::StopReason;
    use futures::future::BoxFuture;
    use futures::stream::BoxStream;

    struct CannedClient {
        deltas: Vec<std::result::Result<StreamDelta, String>>,
    }

    impl LlmClient for CannedClient {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let items: Vec<Result<StreamDelta>> = self
                .deltas
                .iter()
                .cloned()
                .map(|d| d.map_err(BlogsmithError::LlmStream))
                .collect();
            Box::pin(async move {
                Ok(Box::pin(futures::stream::iter(items)) as BoxStream<'_, Result<StreamDelta>>)
            })
        }
    }

    #[tokio::test]
    async fn test_complete_concatenates_text() {
        let client = CannedClient {
            deltas: vec![
                Ok(StreamDelta::MessageId("m1".into())),
                Ok(StreamDelta::TextDelta("Hello, ".into())),
                Ok(StreamDelta::TextDelta("world".into())),
                Ok(StreamDelta::Usage {
                    input_tokens: 12,
                    output_tokens: 3,
                }),
                Ok(StreamDelta::Stop(StopReason::EndTurn)),
            ],
        };
        let config = ModelConfig::new("gemini", "gemini-2.5-flash");
        let completion = complete(&client, &config, "hi").await.unwrap();
        assert_eq!(completion.content, "Hello, world");
        assert_eq!(completion.input_tokens, 12);
        assert_eq!(completion.output_tokens, 3);
        assert_eq!(completion.stop_reason, Some(StopReason::EndTurn));
    }

    #[tokio::test]
    async fn test_complete_propagates_stream_error() {
        let client = CannedClient {
            deltas: vec![
                Ok(StreamDelta::TextDelta("partial".into())),
                Err("connection reset".into()),
            ],
        };
        let config = ModelConfig::new("gemini", "gemini-2.5-flash");
        let err = complete(&client, &config, "hi").await.unwrap_err();
        assert!(matches!(err, BlogsmithError::LlmStream(_)));
    }

    #[test]
    fn test_create_client_known_providers() {
        for provider in ["gemini", "anthropic", "openai", "ollama", "groq"] {
            let config = ModelConfig::new(provider, "m");
            assert!(create_client(&config).is_ok(), "provider {}", provider);
        }
    }

    #[test]
    fn test_create_client_unknown_provider() {
        let config = ModelConfig::new("carrier-pigeon", "m");
        assert!(matches!(
            create_client(&config),
            Err(BlogsmithError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_create_client_custom_base_url() {
        let mut config = ModelConfig::new("vllm", "m");
        config.base_url = Some("http://localhost:8000/v1/chat/completions".into());
        assert!(create_client(&config).is_ok());
    }
}
