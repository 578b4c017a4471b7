use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use gymauth::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    info!(target: "gymauth", "gymauth starting with {:?}", config);
    gymauth::server::run(config).await
}
