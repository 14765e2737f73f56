//! squabble - chat server
//!
//! Serves the NUL-framed squabble chat protocol over TCP, optionally with TLS.

use squabble_server::{tls, Config, Server};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SQUABBLE_CONFIG is set, then env overrides)
    let config_path = std::env::var("SQUABBLE_CONFIG").ok();
    let mut config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // An explicitly named config file must load
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.load_secrets() {
        tracing::error!("Failed to load auth secrets: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting {}", config.app_name);
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    match config.network.idle_timeout() {
        Some(timeout) => tracing::info!("  Idle timeout: {}s", timeout.as_secs()),
        None => tracing::info!("  Idle timeout: disabled"),
    }
    tracing::info!(
        "  Anonymous login: {}",
        if config.auth.anonymous { "enabled" } else { "disabled" }
    );
    tracing::info!("  Token login: {} token(s)", config.auth.tokens.len());
    if !config.auth.anonymous && config.auth.tokens.is_empty() {
        tracing::warn!("No authentication method configured, every login will be refused");
    }

    if let Err(e) = config.tls.validate() {
        tracing::error!("TLS configuration error: {}", e);
        return Err(e.into());
    }

    let mut server_config = config.server_config();
    if config.tls.enabled {
        server_config = server_config.with_tls(tls::create_tls_acceptor(&config.tls)?);
        tracing::info!("  TLS: enabled");
    } else {
        tracing::info!("  TLS: disabled");
    }

    let server = Arc::new(Server::new(server_config, config.auth.authenticators()));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.quit().await;
    });

    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
