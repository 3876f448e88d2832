//! Development token provider.
//!
//! Issues HS256-signed JWTs locally, without contacting any identity
//! provider. The signature key is a placeholder; backends in development
//! setups accept the token on presence alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::error::TokenError;
use super::provider::TokenProvider;
use super::types::Token;
use crate::clock::{Clock, SystemClock};
use crate::config::MockConfig;
use crate::secret::SecretString;

/// Lifetime of every mock token.
pub const MOCK_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Payload of a mock token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockClaims {
    pub sub: String,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
    /// `mock-<seq>`.
    pub jti: String,
}

impl MockClaims {
    /// Sequence number embedded in `jti`, if it has the expected shape.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.jti.strip_prefix("mock-")?.parse().ok()
    }
}

pub struct MockTokenProvider {
    subject: String,
    name: String,
    latency: Duration,
    acquire_timeout: Duration,
    key: EncodingKey,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
    /// Held while a token is numbered, signed and stored, so `last` always
    /// carries the highest sequence issued.
    last: Mutex<Option<Token>>,
    first: OnceCell<Token>,
}

impl std::fmt::Debug for MockTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTokenProvider")
            .field("subject", &self.subject)
            .field("latency", &self.latency)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockTokenProvider {
    #[must_use]
    pub fn new(config: &MockConfig, acquire_timeout: Duration) -> Self {
        Self::with_clock(config, acquire_timeout, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        config: &MockConfig,
        acquire_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subject: config.subject.clone(),
            name: config.name.clone(),
            latency: config.latency,
            acquire_timeout,
            key: EncodingKey::from_secret(config.signing_secret.expose().as_bytes()),
            clock,
            sequence: AtomicU64::new(0),
            last: Mutex::new(None),
            first: OnceCell::new(),
        }
    }

    fn issue(&self) -> Result<Token, TokenError> {
        let mut last = self.last.lock();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let issued_at = self.clock.now();
        let expires_at = issued_at + MOCK_TOKEN_LIFETIME;
        let claims = MockClaims {
            sub: self.subject.clone(),
            name: self.name.clone(),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            jti: format!("mock-{seq}"),
        };

        let jwt = encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| TokenError::RefreshFailed(format!("mock token encoding failed: {e}")))?;
        let token = Token::new(SecretString::new(jwt), issued_at, expires_at)?;

        tracing::debug!(seq, expires_at = %expires_at, "issued mock token");
        *last = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    /// Concurrent first callers share a single issuance.
    async fn get_token(&self) -> Result<Token, TokenError> {
        let last = self.last.lock().clone();
        if let Some(token) = last {
            return Ok(token);
        }
        let first = self.first.get_or_try_init(|| self.refresh()).await?;
        let last = self.last.lock().clone();
        Ok(last.unwrap_or_else(|| first.clone()))
    }

    /// Always `true`. The mock never reports an expired token, even after its
    /// one-hour window; only the store-backed provider tracks expiry.
    fn is_valid(&self) -> bool {
        true
    }

    async fn refresh(&self) -> Result<Token, TokenError> {
        tokio::time::timeout(self.acquire_timeout, tokio::time::sleep(self.latency))
            .await
            .map_err(|_| TokenError::Timeout(self.acquire_timeout))?;
        self.issue()
    }
}
