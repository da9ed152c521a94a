//! smart-cache CLI - Plan prompt-cache breakpoints for LLM requests

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smart_cache::{
    analysis::{Content, SegmentKind},
    config::{Config, EngineConfig},
    orchestrator::{RequestPayload, SmartCache},
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "smart-cache")]
#[command(about = "Plan prompt-cache breakpoints for LLM API requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/smart-cache/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (overrides the config file)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan cache markers for one or more JSON requests, in order
    Plan {
        /// Request files; later files see cache entries from earlier ones
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print each annotated request as JSON
        #[arg(long)]
        emit: bool,
    },

    /// Estimate the token count of text or a file
    Estimate {
        /// Text to estimate
        text: Option<String>,

        /// Read the content from a file instead (JSON files are sized structurally)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Print an example config file instead
        #[arg(long)]
        example: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_required(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    if let Some(level) = &cli.log_level {
        config.logging.log_level = level.clone();
    }

    let engine_config = config.validate().context("Invalid configuration")?;
    init_logging(engine_config.log_level)?;

    match cli.command {
        Commands::Plan { files, emit } => run_plan(engine_config, &files, emit)?,
        Commands::Estimate { text, file } => run_estimate(engine_config, text, file)?,
        Commands::Config { example } => {
            if example {
                println!("{}", Config::example());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn init_logging(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn read_request(path: &Path) -> Result<RequestPayload> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let payload = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a request payload", path.display()))?;
    Ok(payload)
}

fn run_plan(config: EngineConfig, files: &[PathBuf], emit: bool) -> Result<()> {
    let engine = SmartCache::new(config);

    for path in files {
        info!("Planning cache markers for {}", path.display());
        let payload = read_request(path)?;
        let processed = engine.process(payload);

        println!("\n=== {} ===", path.display());
        for (segment, decision) in processed.segments.iter().zip(&processed.decisions) {
            let marker = if decision.mark_cacheable { " [CACHE]" } else { "" };
            println!(
                "  [{}] {:<16} ~{:>6} tokens  {:?}{}",
                segment.position,
                segment.kind.as_str(),
                segment.estimated_tokens,
                decision.reason,
                marker
            );
        }

        if emit {
            println!("{}", serde_json::to_string_pretty(&processed.payload)?);
        }
    }

    println!("\n{}", engine.stats());
    Ok(())
}

fn run_estimate(config: EngineConfig, text: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let engine = SmartCache::new(config);
    let estimator = engine.classifier().estimator();

    let tokens = match (text, file) {
        (_, Some(path)) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => {
                    let analysis = engine.classifier().analyze(SegmentKind::Message, &value);
                    analysis.estimated_tokens
                }
                Err(_) => estimator.estimate(&Content::from(raw)),
            }
        }
        (Some(text), None) => estimator.estimate_text(&text),
        (None, None) => anyhow::bail!("Provide TEXT or --file"),
    };

    println!("~{} tokens ({:?})", tokens, estimator.kind());
    Ok(())
}
