use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use super::error::TokenError;
use super::exchange::IdentityExchange;
use super::types::Token;
use crate::clock::{Clock, SystemClock};

/// Handle to a refresh that is currently running. Every waiter polls a clone
/// of the same shared future and therefore observes the same outcome.
type InFlightRefresh = Shared<BoxFuture<'static, Result<Token, TokenError>>>;

/// Expiry and timeout bounds applied by the store.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Tokens are considered invalid this long before they actually expire.
    pub safety_margin: Duration,
    /// Bound on a single exchange and on any caller waiting for a token.
    pub acquire_timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct StoreState {
    current: Option<Token>,
    in_flight: Option<InFlightRefresh>,
}

struct StoreInner {
    exchange: Arc<dyn IdentityExchange>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    /// Never held across an `.await`.
    state: Mutex<StoreState>,
}

/// Owner of the current bearer token and of single-flight refresh.
///
/// Constructed explicitly by the composition root and shared by cloning;
/// clones observe the same token and the same in-flight refresh. Only the
/// refresh path writes the state.
///
/// A refresh runs on its own spawned task. Callers that give up waiting
/// (dropped future or timeout) do not cancel it for the others.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TokenStore")
            .field("exchange", &self.inner.exchange)
            .field("policy", &self.inner.policy)
            .field("has_token", &state.current.is_some())
            .field("refresh_in_flight", &state.in_flight.is_some())
            .finish()
    }
}

impl TokenStore {
    #[must_use]
    pub fn new(exchange: Arc<dyn IdentityExchange>, policy: RefreshPolicy) -> Self {
        Self::with_clock(exchange, policy, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        exchange: Arc<dyn IdentityExchange>,
        policy: RefreshPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                exchange,
                clock,
                policy,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    /// Last token obtained, valid or not.
    #[must_use]
    pub fn current(&self) -> Option<Token> {
        self.inner.state.lock().current.clone()
    }

    /// `true` iff a token is held and `now + safety_margin < expires_at`.
    #[must_use]
    pub fn is_token_valid(&self) -> bool {
        let now = self.inner.clock.now();
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .is_some_and(|t| t.is_valid_at(now, self.inner.policy.safety_margin))
    }

    /// Return the current token if valid, otherwise refresh.
    ///
    /// When the refresh fails with [`TokenError::RefreshFailed`] but the
    /// previous token has not hit its hard expiry yet (only the safety margin
    /// has been crossed), that stale token is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::RefreshFailed`] or [`TokenError::Timeout`] when
    /// no usable token can be obtained.
    pub async fn get_valid_token(&self) -> Result<Token, TokenError> {
        let now = self.inner.clock.now();
        let margin = self.inner.policy.safety_margin;
        if let Some(token) = self.current().filter(|t| t.is_valid_at(now, margin)) {
            return Ok(token);
        }

        match self.refresh_token().await {
            Ok(token) => Ok(token),
            Err(err @ TokenError::RefreshFailed(_)) => {
                let now = self.inner.clock.now();
                match self.current().filter(|t| t.is_unexpired_at(now)) {
                    Some(stale) => {
                        tracing::warn!(
                            error = %err,
                            expires_at = %stale.expires_at(),
                            "token refresh failed, serving stale token"
                        );
                        Ok(stale)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Force a new token from the identity provider.
    ///
    /// Single-flight: if a refresh is already running, this call attaches to
    /// it and returns its outcome instead of starting another exchange.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::RefreshFailed`] if the exchange fails, or
    /// [`TokenError::Timeout`] if no outcome arrives within the acquisition
    /// timeout. On failure the previously held token is kept.
    pub async fn refresh_token(&self) -> Result<Token, TokenError> {
        let pending = self.attach_or_start();
        let timeout = self.inner.policy.acquire_timeout;
        tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| TokenError::Timeout(timeout))?
    }

    fn attach_or_start(&self) -> InFlightRefresh {
        let mut state = self.inner.state.lock();
        if let Some(pending) = state.in_flight.as_ref() {
            tracing::debug!("attaching to in-flight token refresh");
            return pending.clone();
        }

        tracing::debug!("starting token refresh");
        // The task cannot finish before the slot is filled: it has to take
        // the same lock to clear it.
        let handle = tokio::spawn(Arc::clone(&self.inner).run_refresh());
        let pending = async move {
            handle.await.unwrap_or_else(|e| {
                Err(TokenError::RefreshFailed(format!(
                    "refresh task did not complete: {e}"
                )))
            })
        }
        .boxed()
        .shared();
        state.in_flight = Some(pending.clone());
        pending
    }
}

/// Clears the in-flight slot if the refresh task ends without publishing an
/// outcome (panic or runtime shutdown), so the next caller starts a new
/// exchange instead of attaching to a finished one.
struct InFlightSlot {
    inner: Arc<StoreInner>,
    armed: bool,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("token refresh aborted, releasing in-flight slot");
            self.inner.state.lock().in_flight = None;
        }
    }
}

impl StoreInner {
    async fn run_refresh(self: Arc<Self>) -> Result<Token, TokenError> {
        let mut slot = InFlightSlot {
            inner: Arc::clone(&self),
            armed: true,
        };

        let timeout = self.policy.acquire_timeout;
        let outcome = match tokio::time::timeout(timeout, self.exchange.exchange()).await {
            Ok(Ok(issued)) => issued.into_token(self.clock.now()),
            Ok(Err(e)) => Err(TokenError::from(e)),
            Err(_) => Err(TokenError::Timeout(timeout)),
        };

        let mut state = self.state.lock();
        match &outcome {
            Ok(token) => {
                tracing::info!(expires_at = %token.expires_at(), "token refreshed");
                state.current = Some(token.clone());
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, keeping previous token");
            }
        }
        // Released under the same lock that publishes the outcome; a later
        // refresh may own the slot once it is dropped.
        state.in_flight = None;
        slot.armed = false;
        outcome
    }
}
