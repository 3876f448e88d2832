//! Bearer token lifecycle: value type, identity-provider exchange,
//! single-flight store and the providers built on top of it.

pub mod error;
pub mod exchange;
pub mod mock;
pub mod provider;
pub mod store;
pub mod types;

pub use error::{ExchangeError, TokenError};
pub use exchange::{HttpIdentityExchange, IdentityExchange};
pub use mock::{MockClaims, MockTokenProvider};
pub use provider::{StoreTokenProvider, TokenProvider};
pub use store::{RefreshPolicy, TokenStore};
pub use types::{IssuedToken, Lifetime, Token};
