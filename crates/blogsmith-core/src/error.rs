use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlogsmithError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Pipeline errors
    #[error("Malformed response from stage {stage}: {reason}")]
    MalformedResponse { stage: String, reason: String },

    #[error("Stage {stage} is missing required input: {field}")]
    MissingInput { stage: String, field: String },

    #[error("Stage timeout after {timeout_secs}s: {stage}")]
    StageTimeout { stage: String, timeout_secs: u64 },

    #[error("Revision limit reached after {passes} passes (last score: {last_score})")]
    RevisionsExhausted { passes: u32, last_score: u8 },

    #[error("Invalid pipeline graph: {0}")]
    InvalidGraph(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BlogsmithError {
    /// Whether the error came from the remote generation service rather than
    /// from the pipeline itself.
    pub fn is_external_call(&self) -> bool {
        matches!(
            self,
            Self::LlmRequest(_) | Self::LlmStream(_) | Self::UnsupportedProvider(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BlogsmithError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_call_classification() {
        assert!(BlogsmithError::LlmRequest("HTTP 500".into()).is_external_call());
        assert!(BlogsmithError::LlmStream("reset".into()).is_external_call());
        assert!(!BlogsmithError::MalformedResponse {
            stage: "quality_check".into(),
            reason: "not json".into(),
        }
        .is_external_call());
    }

    #[test]
    fn test_display_messages() {
        let err = BlogsmithError::StageTimeout {
            stage: "write".into(),
            timeout_secs: 30,
        };
        assert_eq!(err.to_string(), "Stage timeout after 30s: write");

        let err = BlogsmithError::RevisionsExhausted {
            passes: 3,
            last_score: 4,
        };
        assert!(err.to_string().contains("3 passes"));
    }
}
