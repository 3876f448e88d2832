use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::duration_serde;
use crate::secret::SecretString;
use crate::token::error::TokenError;

/// Which [`TokenProvider`](crate::TokenProvider) variant the composition root
/// builds. Chosen once at startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Locally synthesized tokens for development.
    #[default]
    Mock,
    /// Tokens exchanged with the identity provider through the token store.
    Real,
}

/// Token lifecycle, dispatch and guard configuration (the `auth` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub provider: ProviderKind,

    /// A token is treated as invalid this long before its real expiry.
    #[serde(with = "duration_serde")]
    pub safety_margin: Duration,

    /// Upper bound on waiting for a token, including a shared refresh.
    #[serde(with = "duration_serde")]
    pub acquire_timeout: Duration,

    /// Required when `provider` is `real`.
    pub identity: Option<IdentityProviderConfig>,

    pub mock: MockConfig,
    pub dispatch: DispatchConfig,
    pub guard: GuardConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            safety_margin: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            identity: None,
            mock: MockConfig::default(),
            dispatch: DispatchConfig::default(),
            guard: GuardConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Check the configuration is self-consistent.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Unavailable`] when the selected provider cannot
    /// produce tokens with this configuration.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.acquire_timeout.is_zero() {
            return Err(TokenError::Unavailable(
                "acquire_timeout must be greater than zero".into(),
            ));
        }
        if self.dispatch.auth_failure_statuses.is_empty() {
            return Err(TokenError::Unavailable(
                "dispatch.auth_failure_statuses must not be empty".into(),
            ));
        }
        self.dispatch.auth_failure_status_codes()?;
        if !self.guard.api_prefix.starts_with('/') {
            return Err(TokenError::Unavailable(format!(
                "guard.api_prefix must start with '/': {}",
                self.guard.api_prefix
            )));
        }
        match (self.provider, &self.identity) {
            (ProviderKind::Real, None) => Err(TokenError::Unavailable(
                "provider is 'real' but no identity provider is configured".into(),
            )),
            (ProviderKind::Real, Some(identity)) => identity.validate(),
            (ProviderKind::Mock, _) => Ok(()),
        }
    }
}

/// How client credentials are transmitted to the token endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `Authorization: Basic base64(client_id:client_secret)`
    #[default]
    Basic,
    /// `client_id` and `client_secret` as form fields.
    Form,
}

/// Identity provider endpoint and client credentials.
///
/// `Debug` is manually implemented to redact extra header values.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    pub token_endpoint: Url,
    pub client_id: String,
    pub client_secret: SecretString,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub auth_method: ClientAuthMethod,

    /// Extra headers attached to every token request (vendor quirks).
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,

    /// Lifetime assumed when the endpoint omits any expiry.
    #[serde(default = "default_ttl", with = "duration_serde")]
    pub default_ttl: Duration,
}

fn default_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

impl IdentityProviderConfig {
    /// # Errors
    ///
    /// Returns [`TokenError::Unavailable`] for empty credentials or a
    /// non-HTTP endpoint.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.client_id.trim().is_empty() {
            return Err(TokenError::Unavailable(
                "identity.client_id must not be empty".into(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(TokenError::Unavailable(
                "identity.client_secret must not be empty".into(),
            ));
        }
        match self.token_endpoint.scheme() {
            "http" | "https" => Ok(()),
            other => Err(TokenError::Unavailable(format!(
                "identity.token_endpoint has unsupported scheme '{other}'"
            ))),
        }
    }
}

impl fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted_headers: Vec<_> = self
            .extra_headers
            .iter()
            .map(|(k, _)| (k.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("IdentityProviderConfig")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("scopes", &self.scopes)
            .field("auth_method", &self.auth_method)
            .field("extra_headers", &redacted_headers)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Settings for the development token provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub subject: String,
    pub name: String,

    /// Simulated round-trip time of each issue.
    #[serde(with = "duration_serde")]
    pub latency: Duration,

    /// HMAC key for the placeholder signature. Not a security boundary.
    pub signing_secret: SecretString,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            subject: "mock-user".into(),
            name: "Mock User".into(),
            latency: Duration::from_millis(50),
            signing_secret: SecretString::new("portal-mock-signing-key"),
        }
    }
}

/// Root certificates used for outbound TLS.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRoots {
    /// Bundled Mozilla roots.
    #[default]
    Webpki,
    /// The operating system certificate store.
    Native,
}

/// Outbound request dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Response statuses treated as "token rejected" and retried once after a
    /// refresh.
    pub auth_failure_statuses: Vec<u16>,

    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    pub max_body_size: usize,

    /// Permit plain `http://` targets (local development and tests).
    pub allow_insecure_http: bool,

    pub tls_roots: TlsRoots,
}

impl DispatchConfig {
    /// The configured auth-failure statuses as [`StatusCode`]s.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Unavailable`] for a value outside `100..=999`.
    pub fn auth_failure_status_codes(&self) -> Result<Vec<StatusCode>, TokenError> {
        self.auth_failure_statuses
            .iter()
            .map(|&code| {
                StatusCode::from_u16(code).map_err(|_| {
                    TokenError::Unavailable(format!(
                        "dispatch.auth_failure_statuses: invalid status {code}"
                    ))
                })
            })
            .collect()
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auth_failure_statuses: vec![401],
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            allow_insecure_http: false,
            tls_roots: TlsRoots::default(),
        }
    }
}

/// Inbound admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Requests under this path prefix must carry an `Authorization` header.
    pub api_prefix: String,

    /// Let CORS preflight requests through without credentials.
    pub allow_preflight: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".into(),
            allow_preflight: true,
        }
    }
}
