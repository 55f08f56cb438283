use clap::{Parser, Subcommand};
use logsift::config::resolve_config_path;
use logsift::layer::SinkLayer;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logsift")]
#[command(about = "Deduplicating log store with retention", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read NDJSON events and persist them until EOF or Ctrl+C
    ///
    /// Dedup windows are anchored at flush time, so replayed historical
    /// events only fold with repeats in the same flush.
    Run {
        /// Read events from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Also persist this process's own log events
        #[arg(long)]
        self_log: bool,
    },
    /// Run one retention sweep
    Sweep,
    /// Show record counts per level
    Stats {
        #[arg(long)]
        json: bool,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,

        /// Write to this path instead of ~/.config/logsift/config.yml
        #[arg(long)]
        path: Option<PathBuf>,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Installed up front, attached to the pipeline's sink once it exists
    let self_log = SinkLayer::new();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logsift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(self_log.clone())
        .init();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run { input, self_log: enabled }) => {
            let layer = enabled.then_some(self_log);
            logsift::cli::run::run(config_path, input, layer).await?;
        }
        None => {
            logsift::cli::run::run(config_path, None, None).await?;
        }
        Some(Commands::Sweep) => {
            logsift::cli::sweep::sweep(config_path).await?;
        }
        Some(Commands::Stats { json }) => {
            logsift::cli::stats::stats(config_path, json).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout, path } => {
                logsift::cli::config::init(stdout, path)?;
            }
            ConfigAction::Validate => {
                logsift::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
