//! Composition root: the only place that decides which token provider is
//! used and wires it to the outbound client and the inbound guard.

use std::sync::Arc;

use anyhow::{Context, Result};
use portal_auth::{
    ApiClient, AuthConfig, AuthRetryLayer, HttpIdentityExchange, HttpTransport,
    MockTokenProvider, ProviderKind, RefreshPolicy, RouteGuard, StoreTokenProvider,
    TokenProvider, TokenStore,
};

use crate::config::AppConfig;

/// Everything the HTTP surface needs, built once at startup.
#[derive(Debug, Clone)]
pub struct Portal {
    pub provider: Arc<dyn TokenProvider>,
    pub client: ApiClient,
    pub guard: RouteGuard,
    pub max_body_size: usize,
}

/// Build the token provider selected by `auth.provider`.
///
/// # Errors
///
/// Fails if the real provider is selected without a usable identity
/// configuration.
pub fn build_provider(auth: &AuthConfig, transport: &HttpTransport) -> Result<Arc<dyn TokenProvider>> {
    let provider: Arc<dyn TokenProvider> = match auth.provider {
        ProviderKind::Mock => {
            tracing::warn!("using mock token provider; tokens are not issued by an identity provider");
            Arc::new(MockTokenProvider::new(&auth.mock, auth.acquire_timeout))
        }
        ProviderKind::Real => {
            let identity = auth
                .identity
                .as_ref()
                .context("auth.identity is required for the real provider")?;
            let exchange = HttpIdentityExchange::new(identity, transport.clone())
                .context("failed to set up identity provider exchange")?;
            let store = TokenStore::new(
                Arc::new(exchange),
                RefreshPolicy {
                    safety_margin: auth.safety_margin,
                    acquire_timeout: auth.acquire_timeout,
                },
            );
            tracing::info!(token_endpoint = %identity.token_endpoint, "using identity provider");
            Arc::new(StoreTokenProvider::new(store))
        }
    };
    Ok(provider)
}

/// # Errors
///
/// Fails on invalid configuration or if the TLS stack cannot be set up.
pub fn compose(config: &AppConfig) -> Result<Portal> {
    config.validate()?;
    let base_url = config
        .backend
        .base_url
        .clone()
        .context("backend.base_url is required")?;

    let auth = &config.auth;
    let transport =
        HttpTransport::new(&auth.dispatch).context("failed to build outbound HTTP transport")?;
    let provider = build_provider(auth, &transport)?;

    let statuses = auth.dispatch.auth_failure_status_codes()?;
    let layer = AuthRetryLayer::new(Arc::clone(&provider)).with_auth_failure_statuses(statuses);
    let client = ApiClient::new(base_url, transport, &layer);

    Ok(Portal {
        provider,
        client,
        guard: RouteGuard::from_config(&auth.guard),
        max_body_size: auth.dispatch.max_body_size,
    })
}
