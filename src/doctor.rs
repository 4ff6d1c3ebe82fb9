use std::path::Path;

use blogsmith_core::config::{AppConfig, ExhaustedPolicy, ModelConfig};
use blogsmith_llm::providers::presets::get_preset;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig) {
    let mut checks = Vec::new();

    // 1. Providers resolvable and keyed
    checks.push(check_provider("Model", &config.model));
    checks.push(check_api_key("API Key", &config.model));
    for (i, fallback) in config.fallback_models.iter().enumerate() {
        let label = format!("Fallback {}", i + 1);
        checks.push(check_provider(&label, fallback));
        checks.push(check_api_key(&format!("{} API Key", label), fallback));
    }

    // 2. Revision loop bounded
    checks.push(check_pipeline(config));

    // 3. Workspace and log dir writable
    checks.push(check_writable("Workspace", &config.workspace_dir()));
    checks.push(match config.log_dir() {
        Some(dir) => check_writable("Run Logs", &dir),
        None => CheckResult {
            label: "Run Logs".into(),
            ok: true,
            detail: "disabled".into(),
        },
    });

    // Print results
    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_provider(label: &str, model: &ModelConfig) -> CheckResult {
    match blogsmith_llm::create_client(model) {
        Ok(_) => CheckResult {
            label: label.into(),
            ok: true,
            detail: format!("{} ({})", model.model_id, model.provider),
        },
        Err(e) => CheckResult {
            label: label.into(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

fn check_api_key(label: &str, model: &ModelConfig) -> CheckResult {
    let needs_key = get_preset(&model.provider).map_or(true, |p| p.needs_api_key);

    if !needs_key || model.has_api_key() {
        CheckResult {
            label: label.into(),
            ok: true,
            detail: if needs_key { "configured".into() } else { "not required".into() },
        }
    } else {
        CheckResult {
            label: label.into(),
            ok: false,
            detail: format!("No API key set for provider '{}'", model.provider),
        }
    }
}

fn check_pipeline(config: &AppConfig) -> CheckResult {
    let p = &config.pipeline;
    let policy = match p.on_exhausted {
        ExhaustedPolicy::Fail => "fail",
        ExhaustedPolicy::ReturnBest => "return_best",
    };

    if p.max_passes == 0 {
        CheckResult {
            label: "Pipeline".into(),
            ok: false,
            detail: format!(
                "max_passes = 0: revisions are unbounded until a score reaches {}",
                p.quality_threshold
            ),
        }
    } else {
        CheckResult {
            label: "Pipeline".into(),
            ok: true,
            detail: format!(
                "threshold {}, up to {} passes, then {}",
                p.quality_threshold, p.max_passes, policy
            ),
        }
    }
}

fn check_writable(label: &str, dir: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult {
            label: label.into(),
            ok: false,
            detail: format!("{} (cannot create: {})", dir.display(), e),
        };
    }

    // Check writable by attempting to create a temp file
    let test_file = dir.join(".doctor_test");
    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            std::fs::remove_file(&test_file).ok();
            CheckResult {
                label: label.into(),
                ok: true,
                detail: format!("{}", dir.display()),
            }
        }
        Err(e) => CheckResult {
            label: label.into(),
            ok: false,
            detail: format!("{} (not writable: {})", dir.display(), e),
        },
    }
}
