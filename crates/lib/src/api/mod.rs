//! Third-party API capability.
//!
//! `ApiClient` is the seam the fetch pipeline and webhook registration call through;
//! `OpenPhoneClient` is the `reqwest` implementation used by the binary.

mod client;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod rate_limit;

pub use client::{ApiClient, OpenPhoneClient};
pub use error::ApiError;
pub use rate_limit::RateLimiter;
