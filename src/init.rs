use std::path::{Path, PathBuf};

use blogsmith_core::config::{provider_env_vars, AppConfig, LogConfig, ModelConfig, PipelineConfig};
use blogsmith_llm::providers::presets::get_preset;

/// Flags accepted by `blogsmith init`.
#[derive(Debug, Default)]
pub struct InitOptions {
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub api_key: Option<String>,
    pub force: bool,
}

/// Write a starter config to `path` and return where it went.
///
/// An existing file is left alone unless `force` is set.
pub fn run_init(path: &Path, options: &InitOptions) -> anyhow::Result<PathBuf> {
    if path.exists() && !options.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let config = starter_config(options)?;
    // Serialized config must load back cleanly
    config.validate()?;
    let content = toml::to_string_pretty(&config)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(path.to_path_buf())
}

fn starter_config(options: &InitOptions) -> anyhow::Result<AppConfig> {
    let provider = options
        .provider
        .clone()
        .unwrap_or_else(detect_provider);

    let model_id = match options.model_id.clone().or_else(|| default_model(&provider)) {
        Some(id) => id,
        None => anyhow::bail!("No default model for provider '{}'; pass --model-id", provider),
    };

    let mut model = ModelConfig::new(provider.clone(), model_id);
    model.api_key = options.api_key.clone().or_else(|| api_key_reference(&provider));

    Ok(AppConfig {
        workspace: "~/.blogsmith".to_string(),
        model,
        fallback_models: Vec::new(),
        pipeline: PipelineConfig::default(),
        log: Some(LogConfig::default()),
    })
}

/// First provider whose API key is present in the environment, else gemini.
fn detect_provider() -> String {
    ["gemini", "anthropic", "openai", "openrouter", "groq"]
        .into_iter()
        .find(|p| provider_env_vars(p).iter().any(|v| std::env::var(v).is_ok()))
        .unwrap_or("gemini")
        .to_string()
}

fn default_model(provider: &str) -> Option<String> {
    let id = match provider {
        "gemini" | "google" => "gemini-2.5-flash",
        "openai" => "gpt-4o-mini",
        "anthropic" | "claude" => "claude-sonnet-4-20250514",
        "ollama" => "llama3.2",
        "groq" => "llama-3.3-70b-versatile",
        "openrouter" => "google/gemini-2.5-flash",
        _ => return None,
    };
    Some(id.to_string())
}

/// `${VAR}` for the first set key variable, so the secret stays out of the
/// file. Keyless providers get nothing.
fn api_key_reference(provider: &str) -> Option<String> {
    if get_preset(provider).is_some_and(|p| !p.needs_api_key) {
        return None;
    }
    provider_env_vars(provider)
        .iter()
        .find(|v| std::env::var(v).is_ok())
        .map(|v| format!("${{{}}}", v))
}
