//! Tellerline CLI, the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `ask`: Ask the model one question, no conversation state
//! - `config`: Print the effective configuration, secrets redacted

use clap::{Parser, Subcommand};
use tellerline_config::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "tellerline",
    about = "Tellerline: LLM turn orchestration for a banking chatbot",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question directly
    Ask {
        /// The question to send
        question: String,

        /// Reply language (uk or en)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(&config.logging, cli.verbose);

    match cli.command {
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Ask { question, language } => commands::ask::run(config, question, language).await?,
        Commands::Config => commands::config_cmd::run(&config),
    }

    Ok(())
}
