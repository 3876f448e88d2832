use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Response};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::{Layer, ServiceExt};
use url::Url;

use super::error::DispatchError;
use super::layer::{AuthRetryLayer, AuthRetryService};
use crate::http::{HttpError, HttpTransport};

/// Maximum bytes of an error response body kept in [`HttpError::HttpStatus`].
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Authenticated client for one backend, rooted at a base URL.
///
/// Every request goes through [`AuthRetryLayer`]. Cloning is cheap and clones
/// share the transport pool and the token provider.
#[derive(Clone, Debug)]
pub struct ApiClient {
    service: AuthRetryService<HttpTransport>,
    base_url: Url,
}

impl ApiClient {
    #[must_use]
    pub fn new(mut base_url: Url, transport: HttpTransport, auth: &AuthRetryLayer) -> Self {
        // Relative joins must append to the base path, not replace its last
        // segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            service: auth.layer(transport),
            base_url,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` (with or without a leading `/`, optionally with a query)
    /// against the base URL.
    ///
    /// The result always stays on the base URL's origin and under its path:
    /// absolute URLs and `..` segments that climb out are refused, so the
    /// service token is only ever sent to the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUri`] if the joined URL is malformed or
    /// resolves outside the base URL.
    pub fn url(&self, path: &str) -> Result<Url, HttpError> {
        let invalid = |reason: String| HttpError::InvalidUri {
            url: path.to_owned(),
            reason,
        };
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| invalid(e.to_string()))?;

        if url.origin() != self.base_url.origin() {
            return Err(invalid(format!(
                "resolves to {} outside backend origin {}",
                url.origin().ascii_serialization(),
                self.base_url.origin().ascii_serialization()
            )));
        }
        if !url.path().starts_with(self.base_url.path()) {
            return Err(invalid(format!(
                "resolves outside backend base path {}",
                self.base_url.path()
            )));
        }
        Ok(url)
    }

    /// Send a prepared request through the authenticated stack.
    ///
    /// Any status is returned as `Ok`, apart from auth failures that survive
    /// the single retry.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub async fn execute(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, DispatchError> {
        self.service.clone().oneshot(request).await
    }

    /// # Errors
    ///
    /// [`DispatchError`]; non-2xx statuses become [`HttpError::HttpStatus`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DispatchError> {
        let request = self.request(Method::GET, path, None)?;
        self.send_json(request).await
    }

    /// # Errors
    ///
    /// [`DispatchError`]; non-2xx statuses become [`HttpError::HttpStatus`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, DispatchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(HttpError::Json)?;
        let request = self.request(Method::POST, path, Some(payload))?;
        self.send_json(request).await
    }

    /// # Errors
    ///
    /// [`DispatchError`]; non-2xx statuses become [`HttpError::HttpStatus`].
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, DispatchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(HttpError::Json)?;
        let request = self.request(Method::PUT, path, Some(payload))?;
        self.send_json(request).await
    }

    /// # Errors
    ///
    /// [`DispatchError`]; non-2xx statuses become [`HttpError::HttpStatus`].
    pub async fn delete(&self, path: &str) -> Result<(), DispatchError> {
        let request = self.request(Method::DELETE, path, None)?;
        let response = self.execute(request).await?;
        error_for_status(response)?;
        Ok(())
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        json_body: Option<Vec<u8>>,
    ) -> Result<Request<Full<Bytes>>, HttpError> {
        let url = self.url(path)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(url.as_str())
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        let body = match json_body {
            Some(bytes) => {
                builder =
                    builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        Ok(builder.body(body)?)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<T, DispatchError> {
        let response = self.execute(request).await?;
        let body = error_for_status(response)?;
        Ok(serde_json::from_slice(&body).map_err(HttpError::Json)?)
    }
}

/// Unwrap a 2xx body, or turn the status into [`HttpError::HttpStatus`] with
/// a truncated preview.
fn error_for_status(response: Response<Bytes>) -> Result<Bytes, HttpError> {
    let status = response.status();
    let body = response.into_body();
    if status.is_success() {
        return Ok(body);
    }
    let end = body.len().min(ERROR_BODY_PREVIEW_LIMIT);
    Err(HttpError::HttpStatus {
        status,
        body_preview: String::from_utf8_lossy(&body[..end]).into_owned(),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, MockConfig};
    use crate::token::MockTokenProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(base: &str) -> ApiClient {
        let transport = HttpTransport::new(&DispatchConfig {
            allow_insecure_http: true,
            ..Default::default()
        })
        .unwrap();
        let provider = Arc::new(MockTokenProvider::new(
            &MockConfig {
                latency: Duration::ZERO,
                ..MockConfig::default()
            },
            Duration::from_secs(1),
        ));
        ApiClient::new(
            Url::parse(base).unwrap(),
            transport,
            &AuthRetryLayer::new(provider),
        )
    }

    #[test]
    fn url_joins_under_base_path() {
        let c = client("https://backend.example.com/v1");
        assert_eq!(
            c.url("/accounts/7").unwrap().as_str(),
            "https://backend.example.com/v1/accounts/7"
        );
        assert_eq!(
            c.url("accounts?page=2").unwrap().as_str(),
            "https://backend.example.com/v1/accounts?page=2"
        );
        assert_eq!(
            c.url("//evil.example/steal").unwrap().as_str(),
            "https://backend.example.com/v1/evil.example/steal"
        );
    }

    #[test]
    fn url_refuses_other_origins() {
        let c = client("https://backend.example.com/v1/");
        for path in [
            "http://evil.example/steal",
            "/https://evil.example/steal",
            "https://backend.example.com:8443/v1/accounts",
            "http://backend.example.com/v1/accounts",
        ] {
            let err = c.url(path).unwrap_err();
            assert!(matches!(err, HttpError::InvalidUri { .. }), "{path}: {err:?}");
        }
    }

    #[test]
    fn url_refuses_escaping_base_path() {
        let c = client("https://backend.example.com/v1/");
        for path in ["../admin", "accounts/../../admin", "%2e%2e/admin", "/.."] {
            let err = c.url(path).unwrap_err();
            assert!(matches!(err, HttpError::InvalidUri { .. }), "{path}: {err:?}");
        }
        assert_eq!(
            c.url("accounts/../teams").unwrap().as_str(),
            "https://backend.example.com/v1/teams"
        );
    }

    #[test]
    fn error_preview_is_truncated() {
        let body = Bytes::from("e".repeat(ERROR_BODY_PREVIEW_LIMIT + 100));
        let response = Response::builder()
            .status(http::StatusCode::BAD_REQUEST)
            .body(body)
            .unwrap();
        match error_for_status(response).unwrap_err() {
            HttpError::HttpStatus {
                status,
                body_preview,
            } => {
                assert_eq!(status, http::StatusCode::BAD_REQUEST);
                assert_eq!(body_preview.len(), ERROR_BODY_PREVIEW_LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_json_sends_body_and_bearer() {
        use httpmock::prelude::*;

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/accounts")
                .header("content-type", "application/json")
                .header_exists("authorization")
                .json_body(serde_json::json!({"name": "acme"}));
            then.status(201)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"id": 7, "name": "acme"}));
        });

        let c = client(&server.base_url());
        let created: serde_json::Value = c
            .post_json("accounts", &serde_json::json!({"name": "acme"}))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(created["id"], 7);
    }

    #[tokio::test]
    async fn non_success_becomes_http_status() {
        use httpmock::prelude::*;

        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("no such account");
        });

        let c = client(&server.base_url());
        let err = c.get_json::<serde_json::Value>("/missing").await.unwrap_err();
        assert!(
            matches!(
                err,
                DispatchError::Http(HttpError::HttpStatus { status, .. }) if status == 404
            ),
            "got: {err:?}"
        );
    }
}
