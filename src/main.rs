//! Transaction cache daemon.
//!
//! Fronts a node's RPC submission path with a per-account transaction cache:
//! - Admits signed transactions whose nonces are ahead of the chain
//! - Releases contiguous nonce runs as on-chain state advances
//! - Prunes by age and memory pressure in the background

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use txcache_chain::RpcChainClient;
use txcache_core::{CacheConfig, TxCacheManager};

/// Environment variable names.
mod env {
    pub const RPC_URL: &str = "TXCACHE_RPC_URL";
    pub const CONFIG: &str = "TXCACHE_CONFIG";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,txcache_core=debug")),
        )
        .init();

    let config = load_config()?;
    for warning in config.validate() {
        warn!(warning = %warning, "Configuration outside recommended range");
    }

    let rpc_url = std::env::var(env::RPC_URL)
        .map_err(|_| anyhow::anyhow!("Missing env var: {}", env::RPC_URL))?;
    let chain = Arc::new(RpcChainClient::new(&rpc_url).await?);

    let cache = Arc::new(TxCacheManager::new(config, Some(chain)));
    cache.start();
    info!("Transaction cache running");

    wait_for_shutdown().await?;
    info!("Shutdown signal received");

    cache.stop().await;
    info!(metrics = %cache.metrics(), "Final cache metrics");

    Ok(())
}

fn load_config() -> Result<CacheConfig> {
    match std::env::var(env::CONFIG) {
        Ok(path) => {
            info!(path = %path, "Loading cache configuration");
            CacheConfig::from_file(&path)
        }
        Err(_) => Ok(CacheConfig::default()),
    }
}

/// Block until SIGTERM or SIGINT (Ctrl+C elsewhere).
async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
