//! Bearer token lifecycle and authenticated dispatch for the portal.
//!
//! - [`TokenStore`] owns the current token and guarantees at most one refresh
//!   against the identity provider at a time.
//! - [`TokenProvider`] is what callers depend on; [`StoreTokenProvider`] and
//!   [`MockTokenProvider`] are the two implementations.
//! - [`AuthRetryLayer`] / [`ApiClient`] attach the token to outbound requests
//!   and retry once after an auth failure.
//! - [`RouteGuard`] gates inbound requests under the API prefix.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod duration_serde;
pub mod errors;
pub mod guard;
pub mod http;
pub mod http_error;
pub mod secret;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AuthConfig, ClientAuthMethod, DispatchConfig, GuardConfig, IdentityProviderConfig, MockConfig,
    ProviderKind, TlsRoots,
};
pub use dispatch::{ApiClient, AuthRetryLayer, AuthRetryService, DispatchError};
pub use errors::AuthError;
#[cfg(feature = "axum-ext")]
pub use guard::route_guard;
pub use guard::RouteGuard;
pub use crate::http::{HttpError, HttpTransport};
pub use secret::SecretString;
pub use token::{
    ExchangeError, HttpIdentityExchange, IdentityExchange, IssuedToken, Lifetime, MockClaims,
    MockTokenProvider, RefreshPolicy, StoreTokenProvider, Token, TokenError, TokenProvider,
    TokenStore,
};
