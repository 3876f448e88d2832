use async_trait::async_trait;

use super::error::TokenError;
use super::store::TokenStore;
use super::types::Token;

/// Source of bearer tokens for outbound calls.
///
/// Implementations are selected once, when the application is composed, and
/// shared behind `Arc<dyn TokenProvider>`.
#[async_trait]
pub trait TokenProvider: std::fmt::Debug + Send + Sync {
    /// Return a usable token, acquiring one if none is held yet.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Timeout`] if acquisition exceeds its bound
    /// - [`TokenError::Unavailable`] if no token can be produced at all
    /// - [`TokenError::RefreshFailed`] if the acquiring exchange failed
    async fn get_token(&self) -> Result<Token, TokenError>;

    /// Whether a token is held and still outside its safety margin.
    /// Never triggers acquisition.
    fn is_valid(&self) -> bool;

    /// Force a new token regardless of the current one.
    ///
    /// # Errors
    ///
    /// [`TokenError::RefreshFailed`] if the identity provider rejects the
    /// exchange or cannot be reached, [`TokenError::Timeout`] if it does not
    /// answer in time.
    async fn refresh(&self) -> Result<Token, TokenError>;
}

/// Provider backed by the identity provider through a [`TokenStore`].
#[derive(Debug, Clone)]
pub struct StoreTokenProvider {
    store: TokenStore,
}

impl StoreTokenProvider {
    #[must_use]
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

#[async_trait]
impl TokenProvider for StoreTokenProvider {
    async fn get_token(&self) -> Result<Token, TokenError> {
        self.store.get_valid_token().await
    }

    fn is_valid(&self) -> bool {
        self.store.is_token_valid()
    }

    async fn refresh(&self) -> Result<Token, TokenError> {
        self.store.refresh_token().await
    }
}
