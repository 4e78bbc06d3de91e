//! Credential providers for the speech service.
//!
//! One token is fetched per stream open — the initial open and every hot
//! swap each consult the provider, so rotated credentials are picked up
//! without restarting the bridge.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Credential failure. Terminal for the utterance; never retried.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// The service refused the presented token.
    #[error("authentication rejected: {0}")]
    Rejected(String),
    /// The token's expiry has passed.
    #[error("token expired: {0}")]
    TokenExpired(String),
    /// No usable credentials are configured.
    #[error("credentials not configured: {0}")]
    NotConfigured(String),
}

/// Bearer token for one stream open.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// A token without an expiry.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// A token that stops being valid at `expires_at`.
    #[must_use]
    pub fn with_expiry(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Whether the expiry, if any, has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Expiry timestamp, if the token carries one.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

// Token values must never end up in logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of authorization material for the remote speech service.
///
/// Consulted exactly once per stream open.
#[async_trait]
pub trait CredentialProvider: fmt::Debug + Send + Sync {
    /// Fetch a token, or fail terminally.
    async fn token(&self) -> Result<AuthToken, AuthError>;
}

/// A fixed token handed in at startup (`--token` / `HARK_TOKEN`).
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: AuthToken,
}

impl StaticCredentials {
    /// Wrap a pre-issued token.
    #[must_use]
    pub fn new(token: AuthToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        if self.token.is_expired() {
            let at = self
                .token
                .expires_at()
                .map_or_else(String::new, |t| t.to_rfc3339());
            return Err(AuthError::TokenExpired(at));
        }
        Ok(self.token.clone())
    }
}

/// On-disk credentials shape (`--credentials-file`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFileFormat {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Credentials read from a JSON file on every stream open, so an external
/// rotation process can replace the file without coordination.
#[derive(Debug, Clone)]
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    /// Use the JSON file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<AuthToken, AuthError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            AuthError::NotConfigured(format!("{}: {e}", self.path.display()))
        })?;
        let parsed: CredentialsFileFormat = serde_json::from_str(&raw).map_err(|e| {
            AuthError::NotConfigured(format!("{}: {e}", self.path.display()))
        })?;
        let token = match parsed.expires_at {
            Some(at) => AuthToken::with_expiry(parsed.token, at),
            None => AuthToken::new(parsed.token),
        };
        if token.is_expired() {
            let at = token.expires_at().map_or_else(String::new, |t| t.to_rfc3339());
            return Err(AuthError::TokenExpired(at));
        }
        Ok(token)
    }
}

#[async_trait]
impl CredentialProvider for CredentialsFile {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        self.load()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
