//! Wire bindings for the MCP server.
//!
//! Exactly one binding runs per process, chosen once at startup from [`TransportMode`].

pub mod http;
pub mod sse;
pub mod stdio;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::{ServerConfig, TransportMode};
use crate::error::{McpError, Result};
use crate::server::McpServer;

/// Run the binding selected in `config` until it finishes or the process is signalled.
pub async fn serve(config: &ServerConfig, server: Arc<McpServer>) -> Result<()> {
    tracing::info!(transport = config.transport.as_str(), "Starting transport");
    match config.transport {
        TransportMode::Stdio => stdio::serve(server).await,
        TransportMode::HttpStream => {
            let addr = bind_addr(config)?;
            serve_router(addr, http::router(server)).await
        }
        TransportMode::Sse => {
            let addr = bind_addr(config)?;
            serve_router(addr, sse::router(server)).await
        }
    }
}

fn bind_addr(config: &ServerConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            McpError::Config(format!(
                "invalid listen address '{}:{}': {}",
                config.host, config.port, e
            ))
        })
}

async fn serve_router(addr: SocketAddr, app: axum::Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
