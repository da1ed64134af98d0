//! KGX CLI - Command-line interface
//!
//! Usage:
//!   kgx extract [--file <path> | <text>] [--kind <kind>] [--mode <mode>]
//!   kgx kinds
//!   kgx config
//!
//! Text is read from stdin when neither a file nor inline text is given.
//!
//! Author: hephaex@gmail.com

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use kgx_core::{AppConfig, ExtractionKind, LoggingConfig, ProcessingMode};
use kgx_pipeline::Pipeline;
use tracing_subscriber::EnvFilter;

/// Crates whose logs are shown at the configured level
const LOG_TARGETS: [&str; 5] = [
    "kgx",
    "kgx_pipeline",
    "kgx_oracle",
    "kgx_extractor",
    "kgx_segmenter",
];

#[derive(Parser)]
#[command(name = "kgx")]
#[command(about = "Knowledge triple extraction CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables take precedence)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract triples from text and print the outcome as JSON
    Extract {
        /// Text to extract from
        text: Option<String>,

        /// Read the text from a file instead
        #[arg(long, short, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Extraction kind (unknown values fall back to "triples")
        #[arg(long, short, default_value = "triples")]
        kind: String,

        /// Processing mode: pass-through, enhanced or fusion
        #[arg(long, short, default_value = "enhanced")]
        mode: String,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// List supported extraction kinds
    Kinds,
    /// Print the effective configuration with API keys masked
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Extract {
            text,
            file,
            kind,
            mode,
            pretty,
        } => {
            let text = read_input(text, file.as_ref())?;
            let kind = ExtractionKind::parse_or_default(&kind);
            let mode: ProcessingMode = mode.parse()?;

            let pipeline = Pipeline::builder(config)
                .build()
                .context("failed to build extraction pipeline")?;
            let outcome = pipeline.extract(&text, kind, mode).await?;

            let json = if pretty {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string(&outcome)?
            };
            println!("{json}");
        }
        Commands::Kinds => {
            for kind in Pipeline::supported_kinds() {
                println!("{kind}");
            }
        }
        Commands::Config => {
            let mut shown = config;
            shown.llm = shown.llm.redacted();
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path.clone())?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={}", logging.level))
            .collect();
        EnvFilter::new(directives.join(","))
    });

    // logs go to stderr so stdout stays valid JSON
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_input(text: Option<String>, file: Option<&PathBuf>) -> anyhow::Result<String> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    if text.trim().is_empty() {
        bail!("no input text");
    }
    Ok(text)
}
