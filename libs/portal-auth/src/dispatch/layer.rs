use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::AUTHORIZATION;
use http::request::Parts;
use http::{HeaderValue, Request, Response, StatusCode};
use tower::{Layer, Service, ServiceExt};

use super::error::DispatchError;
use crate::http::HttpError;
use crate::token::{Token, TokenProvider};

/// Tower layer that authenticates outbound requests with the provider's
/// bearer token and retries exactly once after an auth failure.
///
/// The request body must be `Clone` so the retry can resend it.
#[derive(Clone, Debug)]
pub struct AuthRetryLayer {
    provider: Arc<dyn TokenProvider>,
    auth_failure_statuses: Arc<[StatusCode]>,
}

impl AuthRetryLayer {
    /// Treat `401 Unauthorized` as the only auth failure.
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            auth_failure_statuses: Arc::from([StatusCode::UNAUTHORIZED]),
        }
    }

    /// Replace the set of statuses that trigger refresh-and-retry.
    #[must_use]
    pub fn with_auth_failure_statuses(
        mut self,
        statuses: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        self.auth_failure_statuses = statuses.into_iter().collect();
        self
    }
}

impl<S> Layer<S> for AuthRetryLayer {
    type Service = AuthRetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthRetryService {
            inner,
            provider: Arc::clone(&self.provider),
            auth_failure_statuses: Arc::clone(&self.auth_failure_statuses),
        }
    }
}

/// Created by [`AuthRetryLayer`].
#[derive(Clone, Debug)]
pub struct AuthRetryService<S> {
    inner: S,
    provider: Arc<dyn TokenProvider>,
    auth_failure_statuses: Arc<[StatusCode]>,
}

impl<S, B, ResBody> Service<Request<B>> for AuthRetryService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Clone + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(DispatchError::Http)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let provider = Arc::clone(&self.provider);
        let auth_failures = Arc::clone(&self.auth_failure_statuses);

        Box::pin(async move {
            let (parts, body) = req.into_parts();

            let token = provider
                .get_token()
                .await
                .map_err(|e| DispatchError::token("token acquisition failed", e))?;
            let response = inner
                .call(authenticated(&parts, body.clone(), &token)?)
                .await?;

            let status = response.status();
            if !auth_failures.contains(&status) {
                return Ok(response);
            }
            drop(response);

            tracing::info!(
                %status,
                method = %parts.method,
                path = parts.uri.path(),
                "backend rejected token, refreshing and retrying once"
            );
            let token = provider
                .refresh()
                .await
                .map_err(|e| DispatchError::token("token refresh failed", e))?;

            let response = inner
                .ready()
                .await?
                .call(authenticated(&parts, body, &token)?)
                .await?;

            let status = response.status();
            if auth_failures.contains(&status) {
                tracing::warn!(
                    %status,
                    method = %parts.method,
                    path = parts.uri.path(),
                    "backend rejected refreshed token"
                );
                return Err(DispatchError::Unauthenticated {
                    reason: format!("backend rejected refreshed token with HTTP {status}"),
                    source: None,
                });
            }
            Ok(response)
        })
    }
}

/// Rebuild the request from preserved parts with `Authorization: Bearer`.
fn authenticated<B>(parts: &Parts, body: B, token: &Token) -> Result<Request<B>, HttpError> {
    let raw = zeroize::Zeroizing::new(format!("Bearer {}", token.value().expose()));
    let mut value = HeaderValue::from_str(&raw)?;
    value.set_sensitive(true);

    let mut req = Request::from_parts(parts.clone(), body);
    req.headers_mut().insert(AUTHORIZATION, value);
    Ok(req)
}
