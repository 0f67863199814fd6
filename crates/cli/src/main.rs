use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use memgate_config::AppConfig;
use memgate_runtime::AppState;

#[derive(Debug, Parser)]
#[command(
    name = "memgate",
    version,
    about = "Memory-augmented OpenAI-compatible gateway"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "memgate.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the gateway (default).
    Serve {
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write the default configuration to the config path and exit.
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Environment first: .env may carry the API keys the config loader reads.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::InitConfig) => {
            let config = AppConfig::default();
            config.save_to(&cli.config)?;
            info!(path = %cli.config, "wrote default configuration");
            Ok(())
        }
        Some(Commands::Serve { port }) => serve(&cli.config, port).await,
        None => serve(&cli.config, None).await,
    }
}

async fn serve(config_path: &str, port: Option<u16>) -> Result<()> {
    let mut config = AppConfig::load_from(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(
        model = %config.llm.model,
        extraction_model = %config.memory_extraction.model,
        embedding_model = %config.embedding.model,
        "starting memgate"
    );

    let state = AppState::initialize(config).await?;
    memgate_runtime::serve(state).await
}
