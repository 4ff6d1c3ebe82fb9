use std::io::Write;
use std::path::PathBuf;

use blogsmith_core::config::{AppConfig, ExhaustedPolicy};
use blogsmith_core::error::BlogsmithError;
use blogsmith_test_utils::{write_config, SAMPLE_CONFIG};

#[test]
fn test_load_full_config_from_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = write_config(dir.path(), SAMPLE_CONFIG);

    let config = AppConfig::load(&path).expect("load config");

    assert_eq!(config.workspace, "/tmp/blogsmith-test");
    assert_eq!(config.model.provider, "gemini");
    assert_eq!(config.model.model_id, "gemini-2.5-flash");
    assert_eq!(config.model.api_key, Some("test-key".to_string()));
    assert_eq!(config.model.max_tokens, 4096);
    assert_eq!(config.model.temperature, 0.5);

    let retry = config.model.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 2);
    assert_eq!(retry.initial_backoff_ms, 10);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "openai");
    assert_eq!(config.fallback_models[0].api_key.as_deref(), Some("fallback-key"));

    assert_eq!(config.pipeline.quality_threshold, 8);
    assert_eq!(config.pipeline.default_score, 10);
    assert_eq!(config.pipeline.max_passes, 4);
    assert_eq!(config.pipeline.on_exhausted, ExhaustedPolicy::ReturnBest);
    assert_eq!(config.pipeline.stage_timeout_secs, 60);

    assert_eq!(config.log.as_ref().map(|l| l.level), Some(3));
    assert_eq!(config.log_dir(), Some(PathBuf::from("/tmp/blogsmith-test/logs")));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
model_id = "llama3.2"
provider = "ollama"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.workspace, "~/.blogsmith");
    assert_eq!(config.model.max_tokens, 8192);
    assert!(config.model.retry.is_none());
    assert!(config.fallback_models.is_empty());
    assert_eq!(config.pipeline.quality_threshold, 7);
    assert_eq!(config.pipeline.default_score, 10);
    assert_eq!(config.pipeline.max_passes, 3);
    assert_eq!(config.pipeline.on_exhausted, ExhaustedPolicy::Fail);
    assert_eq!(config.pipeline.stage_timeout_secs, 120);
    assert!(config.log.is_none());
    assert_eq!(config.log_dir(), None);
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, BlogsmithError::ConfigNotFound(p) if p.ends_with("absent.toml")));
}

#[test]
fn test_invalid_threshold_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = write_config(
        dir.path(),
        "[model]\nmodel_id = \"m\"\n\n[pipeline]\nquality_threshold = 11\n",
    );
    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, BlogsmithError::Config(ref m) if m.contains("quality_threshold")));
}

#[test]
fn test_unknown_exhausted_policy_rejected() {
    let err = AppConfig::from_toml_str(
        "[model]\nmodel_id = \"m\"\n\n[pipeline]\non_exhausted = \"retry_forever\"\n",
    )
    .unwrap_err();
    assert!(matches!(err, BlogsmithError::Config(_)));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("BLOGSMITH_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "test-model"
api_key = "${BLOGSMITH_TEST_API_KEY}"
"#;

    let config = AppConfig::from_toml_str(toml_content).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("BLOGSMITH_TEST_API_KEY");
}

#[test]
fn test_provider_env_key_fills_missing_api_key() {
    std::env::set_var("DEEPSEEK_API_KEY", "ds-from-env");

    let config = AppConfig::from_toml_str(
        "[model]\nprovider = \"deepseek\"\nmodel_id = \"deepseek-chat\"\n",
    )
    .expect("load config");
    assert_eq!(config.model.api_key.as_deref(), Some("ds-from-env"));
    assert!(config.model.has_api_key());

    std::env::remove_var("DEEPSEEK_API_KEY");
}

#[test]
fn test_log_dir_defaults_under_workspace() {
    let config = AppConfig::from_toml_str(
        "workspace = \"/srv/blog\"\n\n[model]\nmodel_id = \"m\"\n\n[log]\n",
    )
    .expect("load config");
    assert_eq!(config.log_dir(), Some(PathBuf::from("/srv/blog/logs")));

    let disabled = AppConfig::from_toml_str(
        "[model]\nmodel_id = \"m\"\n\n[log]\nenabled = false\n",
    )
    .expect("load config");
    assert_eq!(disabled.log_dir(), None);
}
