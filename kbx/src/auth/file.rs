//! Token file provider.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::{Credential, TokenProvider};
use crate::error::AuthError;

/// How long a token read from disk is trusted before re-reading.
pub const TOKEN_FILE_LIFETIME: Duration = Duration::from_secs(60);

/// Reads a bearer token from a file and re-reads it periodically.
///
/// Projected service-account tokens are rotated on disk by the kubelet, so
/// the cached value is only trusted for [`TOKEN_FILE_LIFETIME`].
#[derive(Debug)]
pub struct TokenFile {
    path: PathBuf,
    lifetime: Duration,
    cache: RwLock<Option<Cached>>,
    refresh: Mutex<()>,
    /// Bumped after every read; lets queued forced callers share one read.
    reads: AtomicU64,
}

#[derive(Debug)]
struct Cached {
    credential: Arc<Credential>,
    read_at: Instant,
}

impl TokenFile {
    /// Provider for the token at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_lifetime(path, TOKEN_FILE_LIFETIME)
    }

    /// Provider that trusts each read for `lifetime`.
    pub fn with_lifetime(path: impl Into<PathBuf>, lifetime: Duration) -> Self {
        Self {
            path: path.into(),
            lifetime,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            reads: AtomicU64::new(0),
        }
    }

    /// The token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn cached(&self) -> Option<Arc<Credential>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.read_at.elapsed() < self.lifetime)
            .map(|c| Arc::clone(&c.credential))
    }

    async fn read(&self) -> Result<Arc<Credential>, AuthError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| AuthError::Io {
                path: self.path.clone(),
                source,
            })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyCredential {
                origin: self.path.display().to_string(),
            });
        }
        let credential = Credential::bearer(token);
        let expires_at = chrono::Duration::from_std(self.lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        Ok(Arc::new(match expires_at {
            Some(at) => credential.expires_at(at),
            None => credential,
        }))
    }
}

impl TokenProvider for TokenFile {
    async fn get_token(&self, force_refresh: bool) -> Result<Arc<Credential>, AuthError> {
        if !force_refresh {
            if let Some(credential) = self.cached().await {
                return Ok(credential);
            }
        }

        let seen = self.reads.load(Ordering::Acquire);
        let _gate = self.refresh.lock().await;
        if !force_refresh || self.reads.load(Ordering::Acquire) != seen {
            if let Some(credential) = self.cached().await {
                return Ok(credential);
            }
        }

        let credential = self.read().await?;
        debug!(path = %self.path.display(), forced = force_refresh, "re-read token file");
        *self.cache.write().await = Some(Cached {
            credential: Arc::clone(&credential),
            read_at: Instant::now(),
        });
        self.reads.fetch_add(1, Ordering::Release);
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rereads_after_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "some-token\n").unwrap();
        let provider = TokenFile::new(&path);

        assert_eq!(provider.get_token(false).await.unwrap().token(), "some-token");

        std::fs::write(&path, "some-refreshed-token").unwrap();
        assert_eq!(provider.get_token(false).await.unwrap().token(), "some-token");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            provider.get_token(false).await.unwrap().token(),
            "some-refreshed-token"
        );
    }

    #[tokio::test]
    async fn forced_refresh_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "one").unwrap();
        let provider = TokenFile::new(&path);
        assert_eq!(provider.get_token(false).await.unwrap().token(), "one");

        std::fs::write(&path, "two").unwrap();
        assert_eq!(provider.get_token(true).await.unwrap().token(), "two");
    }

    #[tokio::test]
    async fn concurrent_forced_refreshes_share_one_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "one").unwrap();
        let provider = TokenFile::new(&path);
        provider.get_token(false).await.unwrap();

        std::fs::write(&path, "two").unwrap();
        let gate = provider.refresh.lock().await;
        let release = async move {
            tokio::task::yield_now().await;
            drop(gate);
        };
        let (first, second, plain, ()) = tokio::join!(
            provider.get_token(true),
            provider.get_token(true),
            provider.get_token(false),
            release,
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.token(), "two");
        assert!(Arc::ptr_eq(&first, &second), "file was read twice");
        assert!(["one", "two"].contains(&plain.unwrap().token()));
        assert!(Arc::ptr_eq(&provider.get_token(false).await.unwrap(), &first));
    }

    #[tokio::test]
    async fn missing_and_blank_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TokenFile::new(dir.path().join("absent"));
        assert!(matches!(
            missing.get_token(false).await,
            Err(AuthError::Io { .. })
        ));

        let blank = dir.path().join("blank");
        std::fs::write(&blank, "  \n").unwrap();
        assert!(matches!(
            TokenFile::new(&blank).get_token(false).await,
            Err(AuthError::EmptyCredential { .. })
        ));
    }
}
