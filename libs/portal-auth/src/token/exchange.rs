use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method, Request};
use http_body_util::Full;
use serde::Deserialize;
use time::OffsetDateTime;
use tower::ServiceExt;
use url::Url;
use zeroize::Zeroizing;

use super::error::ExchangeError;
use super::types::{IssuedToken, Lifetime};
use crate::config::{ClientAuthMethod, IdentityProviderConfig};
use crate::http::{HttpError, HttpTransport};
use crate::http_error::format_http_error;
use crate::secret::SecretString;

const ERROR_PREFIX: &str = "identity token";

/// The identity-provider call made by the token store on every refresh.
///
/// Only the store calls this; everything else asks the store.
#[async_trait]
pub trait IdentityExchange: fmt::Debug + Send + Sync {
    /// Exchange configured credentials for a fresh bearer token.
    async fn exchange(&self) -> Result<IssuedToken, ExchangeError>;
}

/// Deserialized token endpoint response.
///
/// Accepts both `{ "token", "expiresAt" }` and the OAuth2 shape
/// `{ "access_token", "expires_in", "token_type" }`. Unknown fields are
/// ignored.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(
        default,
        rename = "expiresAt",
        alias = "expires_at",
        with = "time::serde::rfc3339::option"
    )]
    expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Client-credentials exchange against an HTTP token endpoint.
pub struct HttpIdentityExchange {
    transport: HttpTransport,
    token_endpoint: Url,
    client_id: String,
    client_secret: SecretString,
    /// Space-joined scopes, `None` when empty.
    scopes: Option<String>,
    auth_method: ClientAuthMethod,
    extra_headers: Vec<(HeaderName, HeaderValue)>,
    default_ttl: Duration,
}

impl fmt::Debug for HttpIdentityExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpIdentityExchange")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

impl HttpIdentityExchange {
    /// # Errors
    ///
    /// Returns [`ExchangeError::Config`] if the configuration is invalid or an
    /// extra header cannot be represented.
    pub fn new(
        config: &IdentityProviderConfig,
        transport: HttpTransport,
    ) -> Result<Self, ExchangeError> {
        config
            .validate()
            .map_err(|e| ExchangeError::Config(e.to_string()))?;

        let extra_headers = config
            .extra_headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::try_from(name.as_str())
                    .map_err(|e| ExchangeError::Config(format!("extra header name: {e}")))?;
                let mut value = HeaderValue::try_from(value.as_str())
                    .map_err(|e| ExchangeError::Config(format!("extra header '{name}': {e}")))?;
                value.set_sensitive(true);
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, ExchangeError>>()?;

        let scopes = if config.scopes.is_empty() {
            None
        } else {
            Some(config.scopes.join(" "))
        };

        Ok(Self {
            transport,
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes,
            auth_method: config.auth_method,
            extra_headers,
            default_ttl: config.default_ttl,
        })
    }

    fn build_request(&self) -> Result<Request<Full<Bytes>>, HttpError> {
        let mut fields: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];
        if let Some(ref scope) = self.scopes {
            fields.push(("scope", scope));
        }

        // Temporary copies of the secret are scrubbed on drop.
        let secret_expose;
        if self.auth_method == ClientAuthMethod::Form {
            secret_expose = Zeroizing::new(self.client_secret.expose().to_owned());
            fields.push(("client_id", &self.client_id));
            fields.push(("client_secret", &secret_expose));
        }
        let body = Zeroizing::new(serde_urlencoded::to_string(fields.as_slice())?);

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.token_endpoint.as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json");

        if self.auth_method == ClientAuthMethod::Basic {
            let credentials = Zeroizing::new(format!(
                "{}:{}",
                self.client_id,
                self.client_secret.expose()
            ));
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));
            let mut value = HeaderValue::from_str(&format!("Basic {}", &*encoded))?;
            value.set_sensitive(true);
            builder = builder.header(AUTHORIZATION, value);
        }

        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }

        Ok(builder.body(Full::new(Bytes::from(body.as_bytes().to_vec())))?)
    }

    fn parse_response(&self, body: &[u8]) -> Result<IssuedToken, ExchangeError> {
        let resp: TokenResponse = serde_json::from_slice(body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        if let Some(ref tt) = resp.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(ExchangeError::UnsupportedTokenType(tt.clone()));
        }
        if resp.token.is_empty() {
            return Err(ExchangeError::InvalidResponse("empty token".into()));
        }

        let lifetime = match (resp.expires_at, resp.expires_in) {
            (Some(at), _) => Lifetime::ExpiresAt(at),
            (None, Some(secs)) => Lifetime::ExpiresIn(Duration::from_secs(secs)),
            (None, None) => Lifetime::ExpiresIn(self.default_ttl),
        };

        Ok(IssuedToken {
            value: SecretString::new(resp.token),
            lifetime,
        })
    }
}

#[async_trait]
impl IdentityExchange for HttpIdentityExchange {
    async fn exchange(&self) -> Result<IssuedToken, ExchangeError> {
        let http_err = |e: &HttpError| ExchangeError::Http(format_http_error(e, ERROR_PREFIX));

        let request = self.build_request().map_err(|e| http_err(&e))?;
        let response = self
            .transport
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| http_err(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_err(&HttpError::HttpStatus {
                status,
                body_preview: String::new(),
            }));
        }

        self.parse_response(response.body())
    }
}
