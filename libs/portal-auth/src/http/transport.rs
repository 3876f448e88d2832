use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tower::Service;

use super::error::HttpError;
use super::tls::build_https_connector;
use crate::config::DispatchConfig;

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Outbound HTTP service shared by the dispatcher and the identity exchange.
///
/// Each call is bounded by the request timeout and the response body is
/// buffered up to `max_body_size` bytes. Cloning is cheap (pooled client).
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: HyperClient,
    request_timeout: Duration,
    max_body_size: usize,
    allow_insecure_http: bool,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`HttpError::Tls`] if the configured root certificates cannot
    /// be loaded.
    pub fn new(config: &DispatchConfig) -> Result<Self, HttpError> {
        let connector = build_https_connector(config.tls_roots, config.allow_insecure_http)?;
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self {
            client,
            request_timeout: config.request_timeout,
            max_body_size: config.max_body_size,
            allow_insecure_http: config.allow_insecure_http,
        })
    }

    /// Reject plain-HTTP targets up front when insecure HTTP is disabled, so
    /// callers see a descriptive error instead of a connector failure.
    fn check_scheme(&self, req: &Request<Full<Bytes>>) -> Result<(), HttpError> {
        match req.uri().scheme_str() {
            Some("https") => Ok(()),
            Some("http") if self.allow_insecure_http => Ok(()),
            Some(other) => Err(HttpError::InvalidScheme {
                scheme: other.to_owned(),
                reason: "only https is permitted".into(),
            }),
            None => Err(HttpError::InvalidUri {
                url: req.uri().to_string(),
                reason: "missing scheme".into(),
            }),
        }
    }
}

impl Service<Request<Full<Bytes>>> for HttpTransport {
    type Response = Response<Bytes>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Bytes>, HttpError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        if let Err(e) = self.check_scheme(&req) {
            return Box::pin(async move { Err(e) });
        }

        let client = self.client.clone();
        let timeout = self.request_timeout;
        let limit = self.max_body_size;
        let method = req.method().clone();
        let host = req.uri().host().map(ToOwned::to_owned).unwrap_or_default();

        Box::pin(async move {
            let response = tokio::time::timeout(timeout, client.request(req))
                .await
                .map_err(|_| HttpError::Timeout(timeout))??;

            let (parts, body) = response.into_parts();
            let collected = tokio::time::timeout(timeout, Limited::new(body, limit).collect())
                .await
                .map_err(|_| HttpError::Timeout(timeout))?
                .map_err(|e| {
                    if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                        HttpError::BodyTooLarge { limit }
                    } else {
                        HttpError::Transport(e)
                    }
                })?;

            tracing::trace!(%method, %host, status = %parts.status, "outbound request completed");
            Ok(Response::from_parts(parts, collected.to_bytes()))
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tower::ServiceExt;

    fn insecure_config() -> DispatchConfig {
        DispatchConfig {
            allow_insecure_http: true,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn get(url: &str) -> Request<Full<Bytes>> {
        Request::get(url).body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn buffers_response_body() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/ping");
            then.status(200).body("pong");
        });

        let transport = HttpTransport::new(&insecure_config()).unwrap();
        let resp = transport.oneshot(get(&server.url("/ping"))).await.unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"pong");
    }

    #[tokio::test]
    async fn rejects_plain_http_by_default() {
        let transport = HttpTransport::new(&DispatchConfig::default()).unwrap();
        let err = transport
            .oneshot(get("http://localhost:1/never"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, HttpError::InvalidScheme { ref scheme, .. } if scheme == "http"),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn enforces_body_limit() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/big");
            then.status(200).body("x".repeat(64));
        });

        let config = DispatchConfig {
            max_body_size: 16,
            ..insecure_config()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .oneshot(get(&server.url("/big")))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 16 }), "got: {err:?}");
    }

    #[tokio::test]
    async fn times_out_slow_responses() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500));
        });

        let config = DispatchConfig {
            request_timeout: Duration::from_millis(50),
            ..insecure_config()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .oneshot(get(&server.url("/slow")))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Timeout(_)), "got: {err:?}");
    }
}
