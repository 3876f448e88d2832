//! Authenticated outbound dispatch.

pub mod client;
pub mod error;
pub mod layer;

pub use client::ApiClient;
pub use error::DispatchError;
pub use layer::{AuthRetryLayer, AuthRetryService};
