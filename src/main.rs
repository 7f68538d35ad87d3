mod agent;
mod ai;
mod audio;
mod channel;
mod cmd_config;
mod config;
mod coordinator;
mod frontend;
mod interrupt;
mod protocol;
mod speech;
mod trace;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::anthropic::AnthropicAgent;
use crate::audio::{AudioRelay, CommandOutput};
use crate::coordinator::Coordinator;
use crate::speech::RemoteSpeech;
use crate::trace::TraceWriter;

#[derive(Parser)]
#[command(name = "agenthost", about = "Interactive streaming agent host", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// One-shot prompt
    #[arg(short, long)]
    prompt: Option<String>,

    /// Speak replies and accept /voice input (overrides config)
    #[arg(long)]
    speech: bool,

    /// Write a session trace to this directory before each turn
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Log at info level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create default settings.json
    Init,
    /// Show current configuration (secrets masked)
    Show,
    /// Set a config value (dot notation: engine.api_key)
    Set {
        /// Config key path
        key: String,
        /// Value to set
        value: String,
    },
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    if let Some(Commands::Config { action }) = &cli.command {
        return cmd_config::run(action, &config_path);
    }

    // Logs go to stderr so they never interleave with the transcript.
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = if config_path.exists() {
        config::AppConfig::load(&config_path)?.with_env_overrides()
    } else if config::AppConfig::has_required_env_vars() {
        config::AppConfig::default().with_env_overrides()
    } else {
        anyhow::bail!(
            "No config found at {}. Run `agenthost config init` or set {}.",
            config_path.display(),
            config::ENV_API_KEY
        );
    };
    if cli.speech {
        config.speech.enabled = true;
    }
    if let Some(dir) = cli.trace {
        config.trace_dir = Some(dir);
    }
    config.validate()?;
    info!("Config loaded");

    let mut coordinator = build_coordinator(&config).await?;
    let result = match &cli.prompt {
        Some(prompt) => frontend::cli::run_oneshot(&mut coordinator, prompt).await,
        None => frontend::cli::run_interactive(&mut coordinator).await,
    };

    // Let queued speech finish playing.
    tokio::task::spawn_blocking(move || coordinator.shutdown()).await??;
    result
}

async fn build_coordinator(config: &config::AppConfig) -> Result<Coordinator> {
    let agent = Arc::new(AnthropicAgent::new(config.engine.clone()));
    let mut coordinator = Coordinator::new(agent).with_output_capacity(config.output_capacity);

    if config.speech.enabled {
        let speech = RemoteSpeech::new(&config.speech.base_url);
        eprintln!("Preparing speech models; this may take a while on first run...");
        speech
            .prepare(&config.speech.tts_device, &config.speech.stt_device)
            .await?;
        let relay = AudioRelay::start(
            config.audio_capacity,
            CommandOutput::parse(&config.speech.player)?,
        )?;
        coordinator = coordinator.with_speech(Arc::new(speech), Some(relay));
        info!("Speech enabled");
    }

    if let Some(dir) = &config.trace_dir {
        let trace = TraceWriter::new(dir)?;
        info!("Tracing session to {}", trace.path().display());
        coordinator = coordinator.with_trace(trace);
    }

    Ok(coordinator)
}
