use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use voice_relay::{
    ServerConfig, Voice, routes,
    state::AppState,
    talk::{self, TalkOptions},
};

/// Voice relay - realtime voice conversations with an upstream AI endpoint
#[derive(Parser, Debug)]
#[command(name = "voice-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP/WebSocket relay
    Serve,

    /// Talk to the upstream endpoint with the microphone and speaker
    Talk {
        /// Voice preset
        #[arg(long)]
        voice: Option<String>,

        /// Persona instructions
        #[arg(long)]
        instructions: Option<String>,

        /// Conversational goal (repeatable, in priority order)
        #[arg(long = "goal")]
        goals: Vec<String>,

        /// Send lines typed on stdin as text turns
        #[arg(long)]
        text: bool,

        /// Disable server turn detection; press Enter to end each spoken turn
        #[arg(long, conflicts_with = "text")]
        push_to_talk: bool,
    },

    /// List the voice presets
    Voices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if let Some(Commands::Voices) = cli.command {
        for voice in Voice::all() {
            println!("{voice}");
        }
        return Ok(());
    }

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command {
        Some(Commands::Talk {
            voice,
            instructions,
            goals,
            text,
            push_to_talk,
        }) => {
            let options = TalkOptions {
                voice,
                instructions,
                goals,
                text,
                push_to_talk,
            };
            talk::run(&config, options).await
        }
        _ => serve(config).await,
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let address = config.address();
    if config.api_key.is_none() {
        info!("XAI_API_KEY not set; /session and /ws will report a configuration error");
    }

    let app = routes::create_app(AppState::new(config));

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    println!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
