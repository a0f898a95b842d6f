//! Transport layer for Cadence.
//!
//! This crate turns a logical request (method, endpoint, body) into an
//! authenticated HTTP call against the remote authority and hands back the
//! raw outcome. It knows nothing about schedule policies.
//!
//! ## Features
//!
//! - **Transport trait**: the seam the policy engine talks through
//! - **HTTP transport**: `reqwest`-backed implementation with read retries
//! - **Endpoints**: the REST paths the policy engine addresses

mod endpoints;
mod error;
mod http;
mod transport;

pub use endpoints::Endpoints;
pub use error::TransportError;
pub use http::{HttpConfig, HttpTransport};
pub use reqwest::Method;
pub use transport::{RequestBody, Transport, TransportResponse};
