use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ollama_chat::config::{Config, Overrides};

mod commands;

#[derive(Parser)]
#[command(name = "ollama-chat")]
#[command(version)]
#[command(about = "Chat with a local Ollama model", long_about = None)]
struct Cli {
    /// Model to use instead of the configured one
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Server base URL, e.g. http://localhost:11434
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send a single prompt and print the reply
    Ask { prompt: String },
    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(Overrides {
        url: cli.url,
        model: cli.model,
    })?;
    init_tracing(&config.log_filter);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => commands::chat(&config).await,
        Commands::Ask { prompt } => commands::ask(&config, &prompt).await,
        Commands::Config { init: true } => commands::init_config(),
        Commands::Config { init: false } => commands::show_config(&config),
    }
}
