use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;

use super::error::TokenError;
use crate::secret::SecretString;

/// An issued bearer token.
///
/// Immutable once constructed: a refresh produces a new `Token` and the store
/// swaps it in wholesale. `expires_at > issued_at` is enforced by
/// [`Token::new`].
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: SecretString,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl Token {
    /// Build a token, rejecting an empty value or a non-positive lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::RefreshFailed`] when the value is empty or
    /// `expires_at <= issued_at`.
    pub fn new(
        value: SecretString,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<Self, TokenError> {
        if value.is_empty() {
            return Err(TokenError::RefreshFailed("empty token value".into()));
        }
        if expires_at <= issued_at {
            return Err(TokenError::RefreshFailed(format!(
                "token expires at {expires_at} which is not after its issue time {issued_at}"
            )));
        }
        Ok(Self {
            value,
            issued_at,
            expires_at,
        })
    }

    /// The raw bearer value.
    #[must_use]
    pub fn value(&self) -> &SecretString {
        &self.value
    }

    #[must_use]
    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// `true` iff `now + margin < expires_at`. A margin reaching past the
    /// representable range makes every token invalid.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
        checked_add(now, margin).is_some_and(|deadline| deadline < self.expires_at)
    }

    /// `true` iff the hard expiry has not been reached, ignoring any margin.
    #[must_use]
    pub fn is_unexpired_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &self.value)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// When an exchanged token stops being valid, as reported by the identity
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Absolute expiry instant.
    ExpiresAt(OffsetDateTime),
    /// Relative lifetime counted from the moment the store receives the token.
    ExpiresIn(Duration),
}

/// Raw result of an identity-provider exchange, before the store stamps it
/// with its own clock.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: SecretString,
    pub lifetime: Lifetime,
}

impl IssuedToken {
    /// Resolve into a [`Token`] issued at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::RefreshFailed`] if the resolved expiry is not
    /// after `now` or cannot be represented.
    pub fn into_token(self, now: OffsetDateTime) -> Result<Token, TokenError> {
        let expires_at = match self.lifetime {
            Lifetime::ExpiresAt(at) => at,
            Lifetime::ExpiresIn(ttl) => checked_add(now, ttl).ok_or_else(|| {
                TokenError::RefreshFailed(format!(
                    "token lifetime of {}s is out of range",
                    ttl.as_secs()
                ))
            })?,
        };
        Token::new(self.value, now, expires_at)
    }
}

fn checked_add(at: OffsetDateTime, by: Duration) -> Option<OffsetDateTime> {
    at.checked_add(time::Duration::try_from(by).ok()?)
}
