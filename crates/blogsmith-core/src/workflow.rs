//! Workflow state shared by the pipeline stages.
//!
//! `WorkflowState` is created fresh for every run with only the topic set.
//! Each stage returns a `StateUpdate`; only the fields it sets are merged
//! back, everything else is left as it was.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Write,
    Edit,
    QualityCheck,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [Stage::Research, Stage::Write, Stage::Edit, Stage::QualityCheck];

    /// Stable stage name used in logs, events, and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Write => "write",
            Self::Edit => "edit",
            Self::QualityCheck => "quality_check",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Outcome of the routing predicate evaluated after quality_check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Loop back to the write stage.
    Write,
    /// Finish the run.
    Stop,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state threaded through a single workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
}

impl WorkflowState {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Merge a stage's partial output into this state.
    pub fn apply(&mut self, update: &StateUpdate) {
        if let Some(ref v) = update.research_notes {
            self.research_notes = Some(v.clone());
        }
        if let Some(ref v) = update.draft_content {
            self.draft_content = Some(v.clone());
        }
        if let Some(ref v) = update.final_content {
            self.final_content = Some(v.clone());
        }
        if let Some(ref v) = update.quality_feedback {
            self.quality_feedback = Some(v.clone());
        }
        if let Some(score) = update.quality_score {
            self.quality_score = Some(score);
        }
    }
}

/// Partial state returned by a stage. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
}

impl StateUpdate {
    pub fn research_notes(notes: impl Into<String>) -> Self {
        Self {
            research_notes: Some(notes.into()),
            ..Self::default()
        }
    }

    pub fn draft(content: impl Into<String>) -> Self {
        Self {
            draft_content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn final_content(content: impl Into<String>) -> Self {
        Self {
            final_content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn quality(score: u8, feedback: impl Into<String>) -> Self {
        Self {
            quality_score: Some(score),
            quality_feedback: Some(feedback.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.research_notes.is_none()
            && self.draft_content.is_none()
            && self.final_content.is_none()
            && self.quality_feedback.is_none()
            && self.quality_score.is_none()
    }

    /// The set fields as `(key, rendered value)` pairs, in state order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(ref v) = self.research_notes {
            out.push(("research_notes", v.clone()));
        }
        if let Some(ref v) = self.draft_content {
            out.push(("draft_content", v.clone()));
        }
        if let Some(ref v) = self.final_content {
            out.push(("final_content", v.clone()));
        }
        if let Some(ref v) = self.quality_feedback {
            out.push(("quality_feedback", v.clone()));
        }
        if let Some(score) = self.quality_score {
            out.push(("quality_score", score.to_string()));
        }
        out
    }
}
