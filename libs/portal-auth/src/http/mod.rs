//! Outbound HTTP stack: hyper client over rustls, exposed as a tower service.

pub mod error;
mod tls;
pub mod transport;

pub use error::HttpError;
pub use transport::HttpTransport;
