use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlogsmithError, Result};

/// Top-level Blogsmith configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

fn default_workspace() -> String { "~/.blogsmith".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Extra HTTP headers sent with every request (OpenAI-compatible providers).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "gemini".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.7 }

impl ModelConfig {
    /// Minimal config for a provider/model pair with all other fields defaulted.
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
            extra_headers: HashMap::new(),
        }
    }

    /// Fill `api_key` from the provider's conventional environment variable
    /// when it was not set in the file.
    pub fn resolve_api_key(&mut self) {
        let unset = self
            .api_key
            .as_deref()
            .map_or(true, |k| k.is_empty() || k.starts_with("${"));
        if !unset {
            return;
        }
        for var in provider_env_vars(&self.provider) {
            if let Ok(val) = std::env::var(var) {
                if !val.is_empty() {
                    self.api_key = Some(val);
                    return;
                }
            }
        }
    }

    /// Whether a usable API key is present.
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty() && !k.starts_with("${"))
    }
}

/// Conventional API key environment variables, in lookup order.
pub fn provider_env_vars(provider: &str) -> &'static [&'static str] {
    match provider {
        "gemini" | "google" => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        "openai" => &["OPENAI_API_KEY"],
        "anthropic" | "claude" => &["ANTHROPIC_API_KEY"],
        "groq" => &["GROQ_API_KEY"],
        "openrouter" => &["OPENROUTER_API_KEY"],
        "together" => &["TOGETHER_API_KEY"],
        "mistral" => &["MISTRAL_API_KEY"],
        "deepseek" => &["DEEPSEEK_API_KEY"],
        _ => &[],
    }
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// What to do when the revision loop hits `max_passes` without a passing score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Abort the run with `RevisionsExhausted`.
    #[default]
    Fail,
    /// Return the state from the highest-scoring pass.
    ReturnBest,
}

/// Pipeline executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Scores below this route back to the write stage.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u8,
    /// Score assumed when quality_check leaves `quality_score` unset.
    #[serde(default = "default_score")]
    pub default_score: u8,
    /// Maximum write/edit/quality_check passes (0 = unlimited).
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
    #[serde(default)]
    pub on_exhausted: ExhaustedPolicy,
    /// Per-stage timeout in seconds (0 = no timeout).
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            default_score: default_score(),
            max_passes: default_max_passes(),
            on_exhausted: ExhaustedPolicy::default(),
            stage_timeout_secs: default_stage_timeout(),
        }
    }
}

fn default_quality_threshold() -> u8 { 7 }
fn default_score() -> u8 { 10 }
fn default_max_passes() -> u32 { 3 }
fn default_stage_timeout() -> u64 { 120 }

/// JSONL run log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: <workspace>/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Verbosity: 1=run summary, 2=+routing decisions, 3=+every stage.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BlogsmithError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse, resolve API keys, and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let mut config: AppConfig =
            toml::from_str(&expanded).map_err(|e| BlogsmithError::Config(e.to_string()))?;

        config.model.resolve_api_key();
        for fallback in &mut config.fallback_models {
            fallback.resolve_api_key();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the executor cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(BlogsmithError::Config("model.model_id must not be empty".into()));
        }
        let p = &self.pipeline;
        if !(1..=10).contains(&p.quality_threshold) {
            return Err(BlogsmithError::Config(format!(
                "pipeline.quality_threshold must be between 1 and 10, got {}",
                p.quality_threshold
            )));
        }
        if !(1..=10).contains(&p.default_score) {
            return Err(BlogsmithError::Config(format!(
                "pipeline.default_score must be between 1 and 10, got {}",
                p.default_score
            )));
        }
        Ok(())
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.workspace)
    }

    /// Directory for JSONL run logs, or `None` when logging is disabled.
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref().filter(|l| l.enabled)?;
        Some(match log.log_dir {
            Some(ref dir) => expand_home(dir),
            None => self.workspace_dir().join("logs"),
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
