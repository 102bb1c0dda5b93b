//! Bearer credentials and their refresh policy.
//!
//! Every request asks its [`TokenProvider`] for a credential with
//! `force_refresh = false`. Only after the server rejects a request with
//! 401 does the client ask once more with `force_refresh = true`.

mod exec;
mod file;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use exec::{DEFAULT_EXEC_TIMEOUT, ExecPlugin};
pub use file::{TOKEN_FILE_LIFETIME, TokenFile};

use crate::config::AuthConfig;
use crate::error::AuthError;

/// A bearer credential. Immutable once issued; refreshes replace it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
}

impl Credential {
    /// A bearer token with no known expiry.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Sets the expiry instant.
    #[must_use]
    pub const fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Attaches a PEM client certificate and key.
    #[must_use]
    pub fn client_certificate(mut self, certificate: String, key: String) -> Self {
        self.client_certificate_data = Some(certificate);
        self.client_key_data = Some(key);
        self
    }

    /// The bearer token. Empty when the credential is certificate-only.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the credential stops being valid, if known.
    pub const fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// PEM client certificate, if issued.
    pub fn client_certificate_data(&self) -> Option<&str> {
        self.client_certificate_data.as_deref()
    }

    /// PEM client key, if issued.
    pub fn client_key_data(&self) -> Option<&str> {
        self.client_key_data.as_deref()
    }

    /// Whether the credential is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// The `Authorization` header value, if there is a token.
    pub fn authorization(&self) -> Option<String> {
        (!self.token.is_empty()).then(|| format!("Bearer {}", self.token))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("client_certificate", &self.client_certificate_data.is_some())
            .finish()
    }
}

/// A source of bearer credentials.
///
/// Implementations must tolerate concurrent callers; a refresh swaps the
/// cached credential so readers never see a partial value.
pub trait TokenProvider: Send + Sync {
    /// Returns a valid credential, refreshing it first when forced or stale.
    fn get_token(
        &self,
        force_refresh: bool,
    ) -> impl Future<Output = Result<Arc<Credential>, AuthError>> + Send;
}

/// A credential that never changes.
#[derive(Debug, Clone)]
pub struct StaticToken {
    credential: Arc<Credential>,
}

impl StaticToken {
    /// Wraps a fixed bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Arc::new(Credential::bearer(token)),
        }
    }

    /// Sends no `Authorization` header.
    pub fn anonymous() -> Self {
        Self::new(String::new())
    }
}

impl TokenProvider for StaticToken {
    async fn get_token(&self, _force_refresh: bool) -> Result<Arc<Credential>, AuthError> {
        Ok(Arc::clone(&self.credential))
    }
}

/// Any of the built-in providers, selected by configuration.
#[derive(Debug)]
#[non_exhaustive]
pub enum AuthProvider {
    /// Fixed token (or anonymous).
    Static(StaticToken),
    /// Token file with periodic re-reads.
    File(TokenFile),
    /// External credential helper.
    Exec(ExecPlugin),
}

impl AuthProvider {
    /// Builds the provider described by `config`.
    pub fn from_config(config: &AuthConfig) -> Self {
        match config {
            AuthConfig::None => Self::Static(StaticToken::anonymous()),
            AuthConfig::Token { token } => Self::Static(StaticToken::new(token.clone())),
            AuthConfig::TokenFile { path } => Self::File(TokenFile::new(path.clone())),
            AuthConfig::Exec(exec) => Self::Exec(ExecPlugin::new(exec.clone())),
        }
    }
}

impl TokenProvider for AuthProvider {
    async fn get_token(&self, force_refresh: bool) -> Result<Arc<Credential>, AuthError> {
        match self {
            Self::Static(p) => p.get_token(force_refresh).await,
            Self::File(p) => p.get_token(force_refresh).await,
            Self::Exec(p) => p.get_token(force_refresh).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn static_token_ignores_refresh() {
        let provider = StaticToken::new("abc");
        let first = provider.get_token(false).await.unwrap();
        let forced = provider.get_token(true).await.unwrap();
        assert_eq!(first.token(), "abc");
        assert!(Arc::ptr_eq(&first, &forced));
        assert_eq!(first.authorization().as_deref(), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn anonymous_has_no_header() {
        let credential = StaticToken::anonymous().get_token(false).await.unwrap();
        assert_eq!(credential.authorization(), None);
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let credential = Credential::bearer("t").expires_at(now);
        assert!(credential.is_expired_at(now));
        assert!(!credential.is_expired_at(now - Duration::seconds(1)));
        assert!(!Credential::bearer("t").is_expired_at(now));
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", Credential::bearer("secret"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn provider_follows_config() {
        let provider = AuthProvider::from_config(&AuthConfig::Token {
            token: "xyz".into(),
        });
        assert!(matches!(provider, AuthProvider::Static(_)));
        assert_eq!(provider.get_token(false).await.unwrap().token(), "xyz");
    }
}
