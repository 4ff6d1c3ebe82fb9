//! Shared test doubles and fixtures for the Blogsmith crates.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use blogsmith_core::config::{ModelConfig, PipelineConfig};
use blogsmith_core::error::{BlogsmithError, Result};
use blogsmith_core::traits::LlmClient;
use blogsmith_core::types::{ChatMessage, StopReason, StreamDelta};
use blogsmith_core::workflow::{Stage, StateUpdate, WorkflowState};
use blogsmith_pipeline::graph::Node;

/// Substrings that identify each stage's prompt.
pub const RESEARCH_MARKER: &str = "research specialist";
pub const WRITE_MARKER: &str = "content writer";
pub const EDIT_MARKER: &str = "professional editor";
pub const QUALITY_MARKER: &str = "quality assurance specialist";

enum Reply {
    Text(String),
    Fail(String),
}

struct Rule {
    marker: String,
    replies: VecDeque<Reply>,
}

/// An [`LlmClient`] that answers from a script.
///
/// Each rule matches prompts containing its marker and hands out its replies
/// in order; the last reply repeats once the rest are used up. Every prompt
/// is recorded.
#[derive(Default)]
pub struct ScriptedLlm {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `text` to prompts containing `marker`.
    pub fn reply(self, marker: &str, text: &str) -> Self {
        self.push(marker, Reply::Text(text.to_string()))
    }

    /// Reply with each of `texts` in turn to prompts containing `marker`.
    pub fn replies<'a>(self, marker: &str, texts: impl IntoIterator<Item = &'a str>) -> Self {
        texts.into_iter().fold(self, |llm, t| llm.reply(marker, t))
    }

    /// Fail requests whose prompt contains `marker`.
    pub fn fail(self, marker: &str, message: &str) -> Self {
        self.push(marker, Reply::Fail(message.to_string()))
    }

    /// Wait this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Standard replies for all four stages, quality_check scoring `score`.
    pub fn blog(score: u8) -> Self {
        Self::new()
            .reply(RESEARCH_MARKER, "- point one\n- point two\n- point three")
            .reply(WRITE_MARKER, "A first draft about the topic.")
            .reply(EDIT_MARKER, "A polished post about the topic.")
            .reply(QUALITY_MARKER, &quality_json(score, "Looks good."))
    }

    /// Every prompt received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Prompts containing `marker`.
    pub fn calls_matching(&self, marker: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.contains(marker)).collect()
    }

    fn push(self, marker: &str, reply: Reply) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.marker == marker) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    marker: marker.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    fn next_reply(&self, prompt: &str) -> std::result::Result<String, String> {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| prompt.contains(&r.marker)) else {
            return Err(format!("no scripted reply for prompt: {:.60}", prompt));
        };
        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().map(|r| match r {
                Reply::Text(t) => Reply::Text(t.clone()),
                Reply::Fail(m) => Reply::Fail(m.clone()),
            })
        };
        match reply {
            Some(Reply::Text(t)) => Ok(t),
            Some(Reply::Fail(m)) => Err(m),
            None => Err(format!("script for '{}' is empty", rule.marker)),
        }
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let prompt = messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n");
        self.calls.lock().unwrap().push(prompt.clone());
        let reply = self.next_reply(&prompt);
        let delay = self.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let text = reply.map_err(BlogsmithError::LlmRequest)?;

            // Split the reply so callers exercise delta collection
            let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
            let (head, tail) = text.split_at(mid);
            let deltas = vec![
                Ok(StreamDelta::MessageId("scripted".into())),
                Ok(StreamDelta::TextDelta(head.to_string())),
                Ok(StreamDelta::TextDelta(tail.to_string())),
                Ok(StreamDelta::Usage {
                    input_tokens: prompt.len() as u64 / 4,
                    output_tokens: text.len() as u64 / 4,
                }),
                Ok(StreamDelta::Stop(StopReason::EndTurn)),
            ];
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

/// A quality_check reply body.
pub fn quality_json(score: u8, feedback: &str) -> String {
    serde_json::json!({ "score": score, "feedback": feedback }).to_string()
}

/// Deterministic stage handlers that append a marker to their input and
/// record the order in which stages ran.
///
/// research → `"{topic}|R"`, write → `"{research}|W{n}"` (n counts write
/// calls), edit → `"{draft}|E"`. quality_check sets the next score from the
/// script, or leaves the score unset for `None` or once the script runs out.
#[derive(Clone)]
pub struct ScriptedStages {
    scores: Arc<Mutex<VecDeque<Option<u8>>>>,
    trace: Arc<Mutex<Vec<Stage>>>,
}

impl ScriptedStages {
    pub fn new(scores: impl IntoIterator<Item = Option<u8>>) -> Self {
        Self {
            scores: Arc::new(Mutex::new(scores.into_iter().collect())),
            trace: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Same as [`new`](Self::new) with every pass scored.
    pub fn scored(scores: impl IntoIterator<Item = u8>) -> Self {
        Self::new(scores.into_iter().map(Some))
    }

    /// Stages in the order they ran.
    pub fn trace(&self) -> Vec<Stage> {
        self.trace.lock().unwrap().clone()
    }

    /// How many times `stage` ran.
    pub fn count(&self, stage: Stage) -> usize {
        self.trace().into_iter().filter(|s| *s == stage).count()
    }

    pub fn nodes(&self) -> Vec<Node> {
        Stage::ALL
            .into_iter()
            .map(|stage| {
                let this = self.clone();
                Node::from_fn(stage, move |state| this.handle(stage, state))
            })
            .collect()
    }

    fn handle(&self, stage: Stage, state: &WorkflowState) -> Result<StateUpdate> {
        let mut trace = self.trace.lock().unwrap();
        trace.push(stage);
        let input = |v: &Option<String>| v.clone().unwrap_or_default();

        Ok(match stage {
            Stage::Research => StateUpdate::research_notes(format!("{}|R", state.topic)),
            Stage::Write => {
                let n = trace.iter().filter(|s| **s == Stage::Write).count();
                StateUpdate::draft(format!("{}|W{}", input(&state.research_notes), n))
            }
            Stage::Edit => StateUpdate::final_content(format!("{}|E", input(&state.draft_content))),
            Stage::QualityCheck => match self.scores.lock().unwrap().pop_front().flatten() {
                Some(score) => StateUpdate::quality(score, format!("score {}", score)),
                None => StateUpdate::default(),
            },
        })
    }
}

/// Pipeline config with no pass bound and no stage timeout.
pub fn unbounded_pipeline() -> PipelineConfig {
    PipelineConfig {
        max_passes: 0,
        stage_timeout_secs: 0,
        ..PipelineConfig::default()
    }
}

pub fn test_model_config() -> ModelConfig {
    let mut model = ModelConfig::new("gemini", "gemini-2.5-flash");
    model.api_key = Some("test-key".into());
    model
}

/// A complete config file exercising every section.
pub const SAMPLE_CONFIG: &str = r#"
workspace = "/tmp/blogsmith-test"

[model]
provider = "gemini"
model_id = "gemini-2.5-flash"
api_key = "test-key"
temperature = 0.5
max_tokens = 4096

[model.retry]
max_retries = 2
initial_backoff_ms = 10

[[fallback_models]]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "fallback-key"

[pipeline]
quality_threshold = 8
default_score = 10
max_passes = 4
on_exhausted = "return_best"
stage_timeout_secs = 60

[log]
enabled = true
log_dir = "/tmp/blogsmith-test/logs"
level = 3
"#;

/// Write `content` to `blogsmith.toml` inside `dir` and return its path.
pub fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("blogsmith.toml");
    std::fs::write(&path, content).unwrap();
    path
}
