//! Authentication port.
//!
//! The interactive OAuth2 flow lives outside the core; the filesystem only
//! needs a bearer token on demand and a way to force a refresh after the
//! server rejects one.

use async_trait::async_trait;
use thiserror::Error;

/// A failure to obtain or refresh credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("authentication failure: {0}")]
pub struct AuthError(pub String);

/// Supplier of OAuth2 bearer tokens.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns a currently-valid access token.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Forces a token refresh, e.g. after a 401 response.
    async fn refresh(&self) -> Result<(), AuthError>;
}

/// An [`AuthProvider`] that hands out one fixed token.
///
/// Used by tests and by deployments where token management happens
/// entirely out-of-process.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        // Nothing to rotate; the token is fixed for the process lifetime.
        Ok(())
    }
}
