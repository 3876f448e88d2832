//! Inbound admission for the application's own API.
//!
//! The guard checks presence only: any non-empty `Authorization` header is
//! admitted. Signature and expiry are the backend's business.

use std::sync::Arc;

use http::header::{ACCESS_CONTROL_REQUEST_METHOD, AUTHORIZATION, ORIGIN};
use http::{HeaderMap, Method};

use crate::config::GuardConfig;
use crate::errors::AuthError;

#[derive(Debug, Clone)]
pub struct RouteGuard {
    /// Stored without a trailing `/`; `"/"` becomes the empty string.
    api_prefix: Arc<str>,
    allow_preflight: bool,
}

impl RouteGuard {
    #[must_use]
    pub fn new(api_prefix: &str) -> Self {
        Self {
            api_prefix: Arc::from(api_prefix.trim_end_matches('/')),
            allow_preflight: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(&config.api_prefix).with_preflight(config.allow_preflight)
    }

    #[must_use]
    pub fn with_preflight(mut self, allow: bool) -> Self {
        self.allow_preflight = allow;
        self
    }

    /// `true` for the prefix itself and anything below it, but not for
    /// sibling paths sharing the same leading characters (`/apix`).
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        path == &*self.api_prefix
            || path
                .strip_prefix(&*self.api_prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Decide admission for one request.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthorized`] when the path is protected and the
    /// `Authorization` header is missing or blank.
    pub fn check(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<(), AuthError> {
        if !self.is_protected(path) {
            return Ok(());
        }
        if self.allow_preflight && is_preflight_request(method, headers) {
            return Ok(());
        }
        if has_authorization(headers) {
            Ok(())
        } else {
            tracing::debug!(%method, path, "rejecting request without Authorization header");
            Err(AuthError::Unauthorized)
        }
    }
}

fn has_authorization(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .is_some_and(|v| !v.as_bytes().trim_ascii().is_empty())
}

/// OPTIONS with both `Origin` and `Access-Control-Request-Method`.
fn is_preflight_request(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers.contains_key(ORIGIN)
        && headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

/// Axum middleware running [`RouteGuard::check`] before any handler.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/{*path}", any(proxy))
///     .layer(axum::middleware::from_fn_with_state(guard, route_guard));
/// ```
#[cfg(feature = "axum-ext")]
pub async fn route_guard(
    axum::extract::State(guard): axum::extract::State<RouteGuard>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    match guard.check(request.method(), request.uri().path(), request.headers()) {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}
