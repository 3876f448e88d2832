//! Portal request layer: a guarded `/api` pass-through to the REST backend,
//! authenticated with bearer tokens managed by `portal-auth`.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod compose;
pub mod config;
pub mod logging;
pub mod routes;
pub mod shutdown;

use std::net::SocketAddr;

use anyhow::{Context, Result};

pub use compose::{Portal, compose};
pub use config::AppConfig;

/// Bind, serve until a shutdown signal arrives, then drain.
///
/// # Errors
///
/// Fails on invalid configuration, if the listener cannot be bound, or if the
/// server stops with an I/O error.
pub async fn serve(config: AppConfig) -> Result<()> {
    let portal = compose(&config)?;

    // Not fatal: requests acquire on demand.
    match portal.provider.get_token().await {
        Ok(token) => tracing::info!(expires_at = %token.expires_at(), "initial token acquired"),
        Err(e) => tracing::warn!(error = %e, "initial token acquisition failed"),
    }

    let app = routes::router(portal, &config.auth.guard.api_prefix);
    let addr = SocketAddr::new(config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "portal-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = shutdown::wait_for_shutdown().await {
                tracing::error!(error = %e, "shutdown signal handling failed");
            }
        })
        .await
        .context("portal-server terminated with an error")?;

    tracing::info!("portal-server stopped");
    Ok(())
}
