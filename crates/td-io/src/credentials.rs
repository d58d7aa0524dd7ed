//! Bearer tokens for upstream calls. Acquiring and rotating them is someone
//! else's job; this module only reads what they produced.

use crate::transport::TransportError;
use std::path::PathBuf;

#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid bearer token.
    async fn bearer_token(&self) -> Result<String, TransportError>;
}

/// A fixed token from configuration or the environment.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, TransportError> {
        let token = self.0.trim();
        if token.is_empty() {
            return Err(TransportError::Credentials("empty static token".into()));
        }
        Ok(token.to_string())
    }
}

/// A token file re-read on every request, so an external rotator can
/// replace it in place.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for TokenFile {
    async fn bearer_token(&self) -> Result<String, TransportError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TransportError::Credentials(format!("{}: {}", self.path.display(), e))
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(TransportError::Credentials(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}
