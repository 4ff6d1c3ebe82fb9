use std::io::{self, Write};

use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};

use blogsmith_core::config::AppConfig;
use blogsmith_core::workflow::{Stage, WorkflowState};
use blogsmith_pipeline::StageOutput;

/// Renders stage outputs as they stream in and remembers each pass so the
/// right post can be shown at the end.
pub struct Printer {
    clear: bool,
    state: WorkflowState,
    /// State after each quality_check, by pass.
    passes: Vec<(u32, WorkflowState)>,
}

impl Printer {
    pub fn new(topic: String, clear: bool) -> Self {
        Self {
            clear,
            state: WorkflowState::new(topic),
            passes: Vec::new(),
        }
    }

    pub fn show(&mut self, output: &StageOutput) -> io::Result<()> {
        self.state.apply(&output.update);
        if output.stage == Stage::QualityCheck {
            self.passes.push((output.pass, self.state.clone()));
        }

        let mut stdout = io::stdout();
        if self.clear {
            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
        }
        write!(stdout, "{}", render_stage(output))?;
        stdout.flush()
    }

    /// Print the finished post. `best_pass` is set when the revision limit was
    /// hit and the run fell back to its best-scoring pass.
    pub fn finish(&self, best_pass: Option<u32>) -> io::Result<()> {
        let (pass, state) = best_pass
            .and_then(|bp| self.passes.iter().find(|(p, _)| *p == bp))
            .map(|(p, s)| (*p, s))
            .unwrap_or_else(|| (self.passes.last().map_or(1, |(p, _)| *p), &self.state));

        let mut stdout = io::stdout();
        writeln!(stdout)?;
        match state.quality_score {
            Some(score) => writeln!(stdout, "=== FINAL POST (pass {}, score {}/10) ===", pass, score)?,
            None => writeln!(stdout, "=== FINAL POST (pass {}) ===", pass)?,
        }
        writeln!(stdout)?;
        writeln!(stdout, "{}", state.final_content.as_deref().unwrap_or_default())?;
        stdout.flush()
    }
}

fn render_stage(output: &StageOutput) -> String {
    let mut out = format!("--- {} (pass {}) ---\n", output.stage.name().to_uppercase(), output.pass);
    for (key, value) in output.update.fields() {
        out.push_str(&format!("{}:\n{}\n\n", key, value));
    }
    out.push_str(&"=".repeat(30));
    out.push('\n');
    out
}

/// Copy of `config` with every API key masked.
pub fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    for model in std::iter::once(&mut config.model).chain(config.fallback_models.iter_mut()) {
        if let Some(ref key) = model.api_key {
            model.api_key = Some(mask_key(key));
        }
    }
    config
}

pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "****".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogsmith_core::workflow::StateUpdate;

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-a...ijkl");
    }

    #[test]
    fn test_redacted_masks_all_models() {
        let config = AppConfig::from_toml_str(
            r#"
[model]
model_id = "gemini-2.5-flash"
api_key = "AIzaSyExampleKey1234"

[[fallback_models]]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-fallback-secret"
"#,
        )
        .unwrap();
        let masked = redacted(&config);
        assert_eq!(masked.model.api_key.as_deref(), Some("AIza...1234"));
        assert_eq!(masked.fallback_models[0].api_key.as_deref(), Some("sk-f...cret"));
        assert_eq!(config.model.api_key.as_deref(), Some("AIzaSyExampleKey1234"));
    }

    #[test]
    fn test_render_stage() {
        let output = StageOutput {
            stage: Stage::QualityCheck,
            pass: 2,
            update: StateUpdate::quality(8, "Tighten the intro."),
        };
        let text = render_stage(&output);
        assert!(text.starts_with("--- QUALITY_CHECK (pass 2) ---\n"));
        assert!(text.contains("quality_feedback:\nTighten the intro.\n"));
        assert!(text.contains("quality_score:\n8\n"));
        assert!(text.ends_with(&format!("{}\n", "=".repeat(30))));
    }

    #[test]
    fn test_finish_prefers_best_pass() {
        let mut printer = Printer::new("Rust".into(), false);
        for (pass, score, post) in [(1, 6, "first"), (2, 4, "second")] {
            printer
                .show(&StageOutput {
                    stage: Stage::Edit,
                    pass,
                    update: StateUpdate::final_content(post),
                })
                .unwrap();
            printer
                .show(&StageOutput {
                    stage: Stage::QualityCheck,
                    pass,
                    update: StateUpdate::quality(score, "meh"),
                })
                .unwrap();
        }
        assert_eq!(printer.passes.len(), 2);
        assert_eq!(printer.passes[0].1.final_content.as_deref(), Some("first"));
        assert_eq!(printer.state.final_content.as_deref(), Some("second"));
        printer.finish(Some(1)).unwrap();
    }
}
