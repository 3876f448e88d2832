use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by token acquisition and refresh.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// waiting on it. Messages never contain token values or client secrets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// No token can be produced at all (missing or invalid configuration).
    #[error("token unavailable: {0}")]
    Unavailable(String),

    /// Acquisition or refresh did not finish within its bound.
    #[error("token acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// The identity provider rejected the exchange or could not be reached.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Errors returned by an identity-provider exchange.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// HTTP transport or status error.
    ///
    /// Produced by [`format_http_error`](crate::http_error::format_http_error)
    /// and never contains response bodies.
    #[error("{0}")]
    Http(String),

    /// The endpoint returned an unparseable or incomplete response.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The endpoint returned a `token_type` that is not `Bearer`.
    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    /// The exchange cannot be built from the given configuration.
    #[error("identity provider config error: {0}")]
    Config(String),
}

impl From<ExchangeError> for TokenError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Config(msg) => Self::Unavailable(msg),
            other => Self::RefreshFailed(other.to_string()),
        }
    }
}
