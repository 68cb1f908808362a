use anyhow::Context;
use asset_registry::api::build_router;
use asset_registry::config::RegistryConfig;
use asset_registry::Registry;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "asset-registry-server", about = "Content-addressed asset registry server")]
struct Args {
    /// Path to the registry TOML config
    #[arg(long, env = "ASSET_REGISTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory, used when no config file is given
    #[arg(long, env = "ASSET_REGISTRY_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8188")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RegistryConfig::load(path).context("failed to load config")?,
        None => RegistryConfig::with_data_dir(args.data_dir.clone()),
    };

    let registry = Registry::new(config)
        .await
        .context("failed to initialize registry")?;

    let app = build_router(registry.clone());
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("Asset registry listening on {}", args.listen);

    let shutdown_registry = registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = signal::ctrl_c().await;
            info!("Shutting down");
            shutdown_registry.shutdown().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
