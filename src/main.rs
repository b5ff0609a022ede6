use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use redlens::client::repl;
use redlens::search::TavilyClient;
use redlens::server::{self, AppState};
use redlens::summarize::GeminiClient;
use redlens::{Config, SessionStore};

#[derive(Parser)]
#[command(name = "redlens", about = "Reddit sentiment research", version)]
struct Args {
    /// Run the research server instead of the interactive client.
    #[arg(long)]
    serve: bool,

    /// Port for the research server.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Server the client connects to.
    #[arg(long, env = "REDLENS_SERVER_URL")]
    server_url: Option<String>,

    /// Tavily search API key.
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    tavily_api_key: Option<String>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Path of the JSON session store.
    #[arg(long, env = "REDLENS_STORE")]
    store_path: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redlens=info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config load failed: {e}, using defaults");
        Config::default()
    });

    if args.serve {
        serve(args, config).await
    } else {
        let server_url = args
            .server_url
            .or(config.server_url)
            .unwrap_or_else(|| "http://localhost:8000".to_string());
        repl::run(&server_url).await
    }
}

async fn serve(args: Args, config: Config) -> Result<()> {
    let tavily_api_key = args
        .tavily_api_key
        .or(config.tavily_api_key.clone())
        .context("Tavily API key required: pass --tavily-api-key or set TAVILY_API_KEY")?;
    let gemini_api_key = args
        .gemini_api_key
        .or(config.gemini_api_key.clone())
        .context("Gemini API key required: pass --gemini-api-key or set GEMINI_API_KEY")?;

    let store_path = match args.store_path {
        Some(path) => path,
        None => config.store_path_or_default()?,
    };
    tracing::info!("session store: {}", store_path.display());
    let store = SessionStore::open(store_path).await?;

    let state = AppState {
        store: Arc::new(store),
        search: Arc::new(TavilyClient::new(tavily_api_key)),
        summarizer: Arc::new(GeminiClient::new(gemini_api_key)),
    };

    server::run(args.port, state).await
}
