mod display;
mod doctor;
mod init;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blogsmith_core::config::AppConfig;
use blogsmith_core::error::BlogsmithError;
use blogsmith_core::event::EventBus;
use blogsmith_core::traits::LlmClient;
use blogsmith_core::types::{PipelineEvent, RunId};
use blogsmith_core::workflow::WorkflowState;
use blogsmith_pipeline::{llm_nodes, PipelineExecutor, RunLogger};

use crate::display::Printer;

#[derive(Parser)]
#[command(name = "blogsmith", version, about = "Research, write, edit and review a blog post with an LLM")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "blogsmith.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a blog post for a topic (reads stdin when no topic is given)
    Run {
        #[arg(trailing_var_arg = true)]
        topic: Vec<String>,
        /// Don't clear the terminal between stages
        #[arg(long)]
        no_clear: bool,
        /// Override pipeline.max_passes (0 = unlimited)
        #[arg(long)]
        max_passes: Option<u32>,
    },
    /// Show the resolved config with API keys masked
    Config,
    /// Check the environment and config
    Doctor,
    /// Write a starter config file
    Init {
        /// LLM provider (gemini, openai, anthropic, ollama, ...)
        #[arg(long)]
        provider: Option<String>,
        /// Model identifier
        #[arg(long)]
        model_id: Option<String>,
        /// API key (defaults to an ${ENV} reference when one is set)
        #[arg(long)]
        api_key: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("blogsmith=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut stdout = io::stdout();
            clap_complete::generate(shell, &mut Cli::command(), "blogsmith", &mut stdout);
        }
        Commands::Init {
            provider,
            model_id,
            api_key,
            force,
        } => {
            let options = init::InitOptions {
                provider,
                model_id,
                api_key,
                force,
            };
            let path = init::run_init(&cli.config, &options)?;
            println!("Config written to: {}", path.display());
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&display::redacted(&config))?);
        }
        Commands::Doctor => {
            let config = load_config(&cli.config)?;
            doctor::run_doctor(&config);
        }
        Commands::Run {
            topic,
            no_clear,
            max_passes,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(n) = max_passes {
                config.pipeline.max_passes = n;
            }

            let mut topic = topic.join(" ");
            if topic.is_empty() {
                topic = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            let topic = topic.trim().to_string();
            if topic.is_empty() {
                anyhow::bail!("No topic given. Usage: blogsmith run <topic>");
            }

            run_pipeline(&config, topic, !no_clear).await?;
        }
    }

    Ok(())
}

/// Config lookup order: the `--config` path, `~/.blogsmith/config.toml`,
/// then an environment-only config using the default Gemini model.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    if let Some(home) = blogsmith_core::config::dirs_home() {
        let home_config = home.join(".blogsmith").join("config.toml");
        if home_config.exists() {
            info!(path = %home_config.display(), "Using home config");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    let config = AppConfig::from_toml_str("[model]\nmodel_id = \"gemini-2.5-flash\"\n")?;
    if !config.model.has_api_key() {
        return Err(BlogsmithError::ConfigNotFound(format!(
            "{} (and no GOOGLE_API_KEY/GEMINI_API_KEY set; run `blogsmith init`)",
            path.display()
        ))
        .into());
    }
    warn!("No config file found, using environment defaults");
    Ok(config)
}

async fn run_pipeline(config: &AppConfig, topic: String, clear: bool) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> =
        Arc::from(blogsmith_llm::build_client(&config.model, &config.fallback_models)?);

    let event_bus = Arc::new(EventBus::default());
    let mut events = event_bus.subscribe();
    let run_id = RunId::new();
    let cancel = CancellationToken::new();

    let logger = config.log_dir().map(|dir| {
        let level = config.log.as_ref().map_or(2, |l| l.level);
        RunLogger::new(dir, level).spawn(&event_bus, run_id.clone(), cancel.clone())
    });

    let executor = PipelineExecutor::blog(llm_nodes(llm, &config.model), config.pipeline.clone())?
        .with_event_bus(event_bus.clone());

    let mut printer = Printer::new(topic.clone(), clear);
    let mut failure = None;
    {
        let mut stream = executor.stream_with_id(run_id.clone(), WorkflowState::new(topic));
        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => printer.show(&output)?,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
    }

    // The stream already published its terminal event; give the logger a
    // moment to write it.
    if let Some(handle) = logger {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            cancel.cancel();
        }
    }

    if let Some(e) = failure {
        return Err(e.into());
    }

    let mut best_pass = None;
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::PassesExhausted { best_pass: pass, .. }) => best_pass = Some(pass),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    printer.finish(best_pass)?;
    Ok(())
}
