//! Secret handling utilities.
//!
//! Re-exports secrecy types and builds bearer headers without the token
//! ever passing through a `Display` impl.

pub use secrecy::{ExposeSecret, SecretString};

/// Format an `Authorization` header value for an OAuth access token.
pub fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}
