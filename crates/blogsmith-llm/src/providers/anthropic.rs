use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use blogsmith_core::config::ModelConfig;
use blogsmith_core::error::{BlogsmithError, Result};
use blogsmith_core::traits::LlmClient;
use blogsmith_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
#[allow(dead_code)]
enum SseData {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageInfo },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: usize },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: DeltaInfo },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaInfo,
        usage: Option<UsageInfo>,
    },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "error")]
    Error { error: ApiError },
}

#[derive(Deserialize, Debug)]
struct MessageInfo {
    id: String,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum DeltaInfo {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system = None;
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system = Some(msg.content),
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: msg.content,
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: msg.content,
            }),
        }
    }

    (system, api_msgs)
}

fn parse_sse_to_deltas(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(d) => d,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            return vec![];
        }
    };

    match data {
        SseData::MessageStart { message } => {
            let mut deltas = vec![Ok(StreamDelta::MessageId(message.id))];
            // Output tokens are reported cumulatively by message_delta
            if let Some(usage) = message.usage {
                deltas.push(Ok(StreamDelta::Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: 0,
                }));
            }
            deltas
        }
        SseData::ContentBlockDelta {
            delta: DeltaInfo::TextDelta { text },
            ..
        } => vec![Ok(StreamDelta::TextDelta(text))],
        SseData::MessageDelta { delta, usage } => {
            let mut deltas = Vec::new();
            // message_delta usage carries output tokens only
            if let Some(usage) = usage {
                deltas.push(Ok(StreamDelta::Usage {
                    input_tokens: 0,
                    output_tokens: usage.output_tokens,
                }));
            }
            let stop = match delta.stop_reason.as_deref() {
                Some("end_turn") => Some(StopReason::EndTurn),
                Some("max_tokens") => Some(StopReason::MaxTokens),
                Some("stop_sequence") => Some(StopReason::StopSequence),
                _ => None,
            };
            if let Some(stop) = stop {
                deltas.push(Ok(StreamDelta::Stop(stop)));
            }
            deltas
        }
        SseData::Error { error } => vec![Err(BlogsmithError::LlmStream(error.message))],
        _ => vec![],
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| BlogsmithError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(messages);

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                messages: api_messages,
                system,
                stream: true,
            };

            let mut req = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json");
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .json(&body)
                .send()
                .await
                .map_err(|e| BlogsmithError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(BlogsmithError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let byte_stream = response.bytes_stream();
            let sse_stream = SseStream::new(byte_stream);

            let delta_stream = sse_stream
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_sse_to_deltas(event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_system_prompt_is_lifted() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("house style"),
            ChatMessage::user("write"),
        ]);
        assert_eq!(system.as_deref(), Some("house style"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn test_message_start_emits_id_and_usage() {
        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":20,"output_tokens":1}}}"#,
        ));
        assert_eq!(deltas.len(), 2);
        assert!(matches!(&deltas[0], Ok(StreamDelta::MessageId(id)) if id == "msg_1"));
        assert!(matches!(
            &deltas[1],
            Ok(StreamDelta::Usage { input_tokens: 20, output_tokens: 0 })
        ));
    }

    #[test]
    fn test_text_delta_and_stop() {
        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ));
        assert!(matches!(&deltas[0], Ok(StreamDelta::TextDelta(t)) if t == "Hello"));

        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":50}}"#,
        ));
        assert!(matches!(
            &deltas[0],
            Ok(StreamDelta::Usage { input_tokens: 0, output_tokens: 50 })
        ));
        assert!(matches!(&deltas[1], Ok(StreamDelta::Stop(StopReason::MaxTokens))));
    }

    #[test]
    fn test_error_event_surfaces() {
        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(&deltas[0], Err(BlogsmithError::LlmStream(m)) if m == "Overloaded"));
    }

    #[test]
    fn test_ping_is_ignored() {
        assert!(parse_sse_to_deltas(event(r#"{"type":"ping"}"#)).is_empty());
    }
}
