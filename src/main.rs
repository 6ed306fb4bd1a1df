use clap::Parser;
use cohere_proxy::config::config_search_paths;
use cohere_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "cohere-proxy",
    about = "OpenAI-compatible chat completions in front of a Cohere backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend base URL, e.g. https://api.cohere.ai/v1 (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Log file path
    #[arg(long, default_value = "cohere-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohere_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("cohere-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", config.chat_url());
    info!("  Port:      {}", config.port);
    info!(
        "  API key:   {}",
        if config.resolve_api_key().is_some() {
            "from environment (used when clients send none)"
        } else {
            "client Authorization header only"
        }
    );
    info!("  Models:    {} advertised", config.models.len());
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting cohere-proxy backend={} port={}",
            config.chat_url(),
            config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.backend.timeout_secs))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}
