use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use blogsmith_core::config::ModelConfig;
use blogsmith_core::error::{BlogsmithError, Result};
use blogsmith_core::traits::LlmClient;
use blogsmith_core::workflow::{Stage, StateUpdate, WorkflowState};

use crate::graph::{Node, StageFn};
use crate::prompts;
use crate::quality::parse_quality_report;

/// A pipeline stage that builds its prompt from the state and makes one LLM call.
pub struct LlmStage {
    stage: Stage,
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
}

impl LlmStage {
    pub fn new(stage: Stage, llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self { stage, llm, model }
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let completion = blogsmith_llm::complete(self.llm.as_ref(), &self.model, &prompt).await?;
        debug!(
            stage = %self.stage,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "Stage reply received"
        );
        if completion.content.trim().is_empty() {
            return Err(BlogsmithError::MalformedResponse {
                stage: self.stage.name().to_string(),
                reason: "empty reply".into(),
            });
        }
        Ok(completion.content)
    }

    async fn execute(&self, state: &WorkflowState) -> Result<StateUpdate> {
        match self.stage {
            Stage::Research => {
                let notes = self.ask(prompts::research(&state.topic)).await?;
                Ok(StateUpdate::research_notes(notes))
            }
            Stage::Write => {
                let research = require(self.stage, "research_notes", &state.research_notes)?;
                let prompt = prompts::write(&state.topic, research, state.quality_feedback.as_deref());
                Ok(StateUpdate::draft(self.ask(prompt).await?))
            }
            Stage::Edit => {
                let draft = require(self.stage, "draft_content", &state.draft_content)?;
                Ok(StateUpdate::final_content(self.ask(prompts::edit(draft)).await?))
            }
            Stage::QualityCheck => {
                let post = require(self.stage, "final_content", &state.final_content)?;
                let reply = self.ask(prompts::quality_check(post)).await?;
                let report = parse_quality_report(&reply)?;
                Ok(StateUpdate::quality(report.score, report.feedback))
            }
        }
    }
}

impl StageFn for LlmStage {
    fn call<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(self.execute(state))
    }
}

fn require<'a>(stage: Stage, field: &str, value: &'a Option<String>) -> Result<&'a str> {
    value.as_deref().ok_or_else(|| BlogsmithError::MissingInput {
        stage: stage.name().to_string(),
        field: field.to_string(),
    })
}

/// One LLM-backed node per stage, all sharing the same client and model.
pub fn llm_nodes(llm: Arc<dyn LlmClient>, model: &ModelConfig) -> Vec<Node> {
    Stage::ALL
        .into_iter()
        .map(|stage| Node::new(stage, LlmStage::new(stage, llm.clone(), model.clone())))
        .collect()
}
