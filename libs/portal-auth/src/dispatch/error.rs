use thiserror::Error;

use crate::http::HttpError;
use crate::token::TokenError;

/// Terminal outcome of an authenticated dispatch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// No token could be attached, the refresh after an auth failure failed,
    /// or the backend rejected the refreshed token as well.
    #[error("unauthenticated: {reason}")]
    Unauthenticated {
        reason: String,
        #[source]
        source: Option<TokenError>,
    },

    /// Transport-level failure, passed through without retry.
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl DispatchError {
    pub(crate) fn token(reason: &str, source: TokenError) -> Self {
        Self::Unauthenticated {
            reason: format!("{reason}: {source}"),
            source: Some(source),
        }
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }

    /// The token error behind an `Unauthenticated` outcome, if any.
    #[must_use]
    pub fn token_error(&self) -> Option<&TokenError> {
        match self {
            Self::Unauthenticated { source, .. } => source.as_ref(),
            Self::Http(_) => None,
        }
    }
}
