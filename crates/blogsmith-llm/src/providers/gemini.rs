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

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini native API client.
pub struct GeminiClient {
    http: Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

// ── Request types ────────────────────────────────────────────────

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default, rename = "responseId")]
    response_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u64,
}

// ── Conversion ───────────────────────────────────────────────────

fn convert_messages(messages: Vec<ChatMessage>) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let mut system = None;
    let mut contents = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system = Some(GeminiContent {
                    role: None,
                    parts: vec![GeminiPart { text: msg.content }],
                });
                continue;
            }
            Role::User => "user",
            Role::Assistant => "model",
        };
        if msg.content.is_empty() {
            continue;
        }
        contents.push(GeminiContent {
            role: Some(role.to_string()),
            parts: vec![GeminiPart { text: msg.content }],
        });
    }

    (system, contents)
}

/// Convert one SSE chunk into deltas.
///
/// Gemini repeats cumulative `usageMetadata` on every chunk, so usage is only
/// reported alongside the finish reason.
fn parse_gemini_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: GeminiStreamChunk = match serde_json::from_str(&event.data) {
        Ok(c) => c,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse Gemini SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();
    if let Some(id) = chunk.response_id {
        deltas.push(Ok(StreamDelta::MessageId(id)));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return deltas;
    };

    if let Some(content) = candidate.content {
        for part in content.parts {
            if !part.text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(part.text)));
            }
        }
    }

    if let Some(reason) = candidate.finish_reason {
        if let Some(usage) = chunk.usage_metadata {
            deltas.push(Ok(StreamDelta::Usage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            }));
        }
        match reason.as_str() {
            "STOP" => deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn))),
            "MAX_TOKENS" => deltas.push(Ok(StreamDelta::Stop(StopReason::MaxTokens))),
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
                deltas.push(Err(BlogsmithError::LlmStream(format!(
                    "Gemini stopped generation: {}",
                    reason
                ))));
            }
            _ => deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn))),
        }
    }

    deltas
}

/// Temperature is always sent so that 0.0 stays deterministic instead of
/// falling back to the API default.
fn build_request(config: &ModelConfig, messages: Vec<ChatMessage>) -> GeminiRequest {
    let (system_instruction, contents) = convert_messages(messages);
    GeminiRequest {
        contents,
        system_instruction,
        generation_config: Some(GenerationConfig {
            max_output_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        }),
    }
}

impl LlmClient for GeminiClient {
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
                .ok_or_else(|| BlogsmithError::Config("Gemini: api_key is required".into()))?;

            let base = config
                .base_url
                .as_deref()
                .unwrap_or(GEMINI_API_BASE)
                .trim_end_matches('/');
            let url = format!("{}/{}:streamGenerateContent?alt=sse", base, config.model_id);

            let body = build_request(&config, messages);

            let response = self
                .http
                .post(&url)
                .header("content-type", "application/json")
                .header("x-goog-api-key", api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| BlogsmithError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(BlogsmithError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let byte_stream = response.bytes_stream();
            let sse_stream = SseStream::new(byte_stream);

            let delta_stream = sse_stream
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_gemini_chunk(event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
