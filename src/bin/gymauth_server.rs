//!
//! gymauth server binary
//! ---------------------
//! Command-line entry point for the gymauth HTTP server. Every setting can come
//! from a flag or a `GYMAUTH_*` environment variable; flags win.

use anyhow::Result;
use std::env;

use gymauth::config::{has_flag, ServerConfig, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let config = ServerConfig::from_env_and_args(&args)?;
    println!("gymauth starting: http={}, data_dir={}", config.http_port, config.data_dir.display());
    tracing::info!("Using port: http={}, data_dir={:?}", config.http_port, config.data_dir);
    gymauth::server::run(config).await
}
