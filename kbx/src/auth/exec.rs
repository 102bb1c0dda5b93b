//! Exec credential plugin provider.
//!
//! The helper receives an `ExecCredential` request in `KUBERNETES_EXEC_INFO`
//! and prints an `ExecCredential` with a populated `status` on stdout.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use kbx_proto::{Format, JSON, Serializer, Time};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{Credential, TokenProvider};
use crate::config::ExecConfig;
use crate::error::AuthError;

/// Limit on one helper run when none is configured.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable carrying the serialized request.
const EXEC_INFO_ENV: &str = "KUBERNETES_EXEC_INFO";

const EXEC_CREDENTIAL_KIND: &str = "ExecCredential";

/// Runs an external helper to obtain credentials.
///
/// The result is cached until its `expirationTimestamp` (or until a forced
/// refresh when the helper reports none). Failed runs cache nothing.
#[derive(Debug)]
pub struct ExecPlugin {
    config: ExecConfig,
    timeout: Duration,
    cache: RwLock<Option<Arc<Credential>>>,
    refresh: Mutex<()>,
    /// Bumped after every successful run.
    runs: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredential {
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec: Option<ExecCredentialSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialSpec {
    interactive: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiration_timestamp: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_key_data: Option<String>,
}

impl ExecPlugin {
    /// Provider running the helper described by `config`.
    pub fn new(config: ExecConfig) -> Self {
        let timeout = config
            .timeout
            .and_then(|t| t.to_std())
            .unwrap_or(DEFAULT_EXEC_TIMEOUT);
        Self {
            config,
            timeout,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            runs: AtomicU64::new(0),
        }
    }

    async fn cached(&self) -> Option<Arc<Credential>> {
        let now = Utc::now();
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|c| !c.is_expired_at(now))
            .map(Arc::clone)
    }

    fn request(&self) -> Result<String, AuthError> {
        let request = ExecCredential {
            api_version: self.config.api_version.clone(),
            kind: EXEC_CREDENTIAL_KIND.to_owned(),
            spec: Some(ExecCredentialSpec::default()),
            status: None,
        };
        serde_json::to_string(&request).map_err(|e| self.decode_failed(e))
    }

    async fn run(&self) -> Result<Credential, AuthError> {
        let command = &self.config.command;
        let child = Command::new(command)
            .args(&self.config.args)
            .envs(self.config.env.iter().map(|v| (&v.name, &v.value)))
            .env(EXEC_INFO_ENV, self.request()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AuthError::ProcessFailed {
                command: command.clone(),
                code: None,
                message: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| AuthError::ProcessFailed {
                command: command.clone(),
                code: None,
                message: e.to_string(),
            })?,
            Err(_) => {
                warn!(command = %command, timeout = ?self.timeout, "credential helper timed out");
                return Err(AuthError::Timeout {
                    command: command.clone(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(AuthError::ProcessFailed {
                command: command.clone(),
                code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        self.parse(&output.stdout)
    }

    fn parse(&self, stdout: &[u8]) -> Result<Credential, AuthError> {
        let empty = || AuthError::EmptyCredential {
            origin: format!("`{}`", self.config.command),
        };
        let response = Serializer::new(JSON, Format::Json)
            .decode::<ExecCredential>(stdout.trim_ascii())
            .map_err(|e| self.decode_failed(e))?
            .ok_or_else(empty)?;

        if response.api_version != self.config.api_version {
            return Err(self.decode_failed(format!(
                "apiVersion {:?} does not match requested {:?}",
                response.api_version, self.config.api_version
            )));
        }
        let status = response
            .status
            .ok_or_else(|| self.decode_failed("missing status"))?;

        let token = status.token.unwrap_or_default();
        let mut credential = match (status.client_certificate_data, status.client_key_data) {
            (Some(cert), Some(key)) => Credential::bearer(token).client_certificate(cert, key),
            (None, None) if !token.is_empty() => Credential::bearer(token),
            (None, None) => return Err(empty()),
            _ => {
                return Err(self.decode_failed(
                    "clientCertificateData and clientKeyData must be set together",
                ));
            }
        };
        if let Some(at) = status.expiration_timestamp {
            credential = credential.expires_at(at.instant());
        }
        Ok(credential)
    }

    fn decode_failed(&self, message: impl ToString) -> AuthError {
        AuthError::DecodeFailed {
            command: self.config.command.clone(),
            message: message.to_string(),
        }
    }
}

impl TokenProvider for ExecPlugin {
    async fn get_token(&self, force_refresh: bool) -> Result<Arc<Credential>, AuthError> {
        if !force_refresh {
            if let Some(credential) = self.cached().await {
                return Ok(credential);
            }
        }

        // Forced callers queued behind a run that finished share its result.
        let seen = self.runs.load(Ordering::Acquire);
        let _gate = self.refresh.lock().await;
        if !force_refresh || self.runs.load(Ordering::Acquire) != seen {
            if let Some(credential) = self.cached().await {
                return Ok(credential);
            }
        }

        let credential = Arc::new(self.run().await?);
        debug!(
            command = %self.config.command,
            expires_at = ?credential.expiry(),
            forced = force_refresh,
            "obtained credential from helper"
        );
        *self.cache.write().await = Some(Arc::clone(&credential));
        self.runs.fetch_add(1, Ordering::Release);
        Ok(credential)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use super::*;

    fn script(body: &str) -> ExecConfig {
        ExecConfig::new("sh").args(["-c", body])
    }

    fn runs(counter: &Path) -> usize {
        std::fs::read_to_string(counter).map_or(0, |s| s.lines().count())
    }

    fn credential_json(token: &str, expires: &str) -> String {
        format!(
            r#"{{"apiVersion":"client.authentication.k8s.io/v1","kind":"ExecCredential","status":{{"token":"{token}","expirationTimestamp":"{expires}"}}}}"#
        )
    }

    #[tokio::test]
    async fn caches_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let body = format!(
            "echo run >> '{}'; echo '{}'",
            counter.display(),
            credential_json("tok-1", "2999-01-01T00:00:00Z")
        );
        let plugin = ExecPlugin::new(script(&body));

        assert_eq!(plugin.get_token(false).await.unwrap().token(), "tok-1");
        assert_eq!(plugin.get_token(false).await.unwrap().token(), "tok-1");
        assert_eq!(runs(&counter), 1);

        plugin.get_token(true).await.unwrap();
        assert_eq!(runs(&counter), 2);
    }

    #[tokio::test]
    async fn concurrent_forced_refreshes_run_helper_once() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let body = format!(
            "echo run >> '{}'; echo '{}'",
            counter.display(),
            credential_json("tok-1", "2999-01-01T00:00:00Z")
        );
        let plugin = ExecPlugin::new(script(&body));
        let primed = plugin.get_token(false).await.unwrap();

        let gate = plugin.refresh.lock().await;
        let release = async move {
            tokio::task::yield_now().await;
            drop(gate);
        };
        let (first, second, plain, ()) = tokio::join!(
            plugin.get_token(true),
            plugin.get_token(true),
            plugin.get_token(false),
            release,
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(runs(&counter), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &primed));
        assert_eq!(plain.unwrap().token(), "tok-1");
    }

    #[tokio::test]
    async fn expired_credential_reinvokes() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let body = format!(
            "echo run >> '{}'; echo '{}'",
            counter.display(),
            credential_json("old", "2000-01-01T00:00:00Z")
        );
        let plugin = ExecPlugin::new(script(&body));
        plugin.get_token(false).await.unwrap();
        plugin.get_token(false).await.unwrap();
        assert_eq!(runs(&counter), 2);
    }

    #[tokio::test]
    async fn unparseable_output_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let body = format!("echo run >> '{}'; echo 'not a credential'", counter.display());
        let plugin = ExecPlugin::new(script(&body));

        assert!(matches!(
            plugin.get_token(false).await,
            Err(AuthError::DecodeFailed { .. })
        ));
        assert!(matches!(
            plugin.get_token(false).await,
            Err(AuthError::DecodeFailed { .. })
        ));
        assert_eq!(runs(&counter), 2);
    }

    #[tokio::test]
    async fn helper_receives_exec_info() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("info");
        let body = format!(
            "printf '%s' \"$KUBERNETES_EXEC_INFO\" > '{}'; echo \"$EXTRA\" >> '{}'; echo '{}'",
            info.display(),
            info.display(),
            credential_json("tok", "2999-01-01T00:00:00Z")
        );
        let plugin = ExecPlugin::new(script(&body).env("EXTRA", "from-config"));
        plugin.get_token(false).await.unwrap();

        let written = std::fs::read_to_string(&info).unwrap();
        assert!(written.contains(r#""kind":"ExecCredential""#));
        assert!(written.contains(r#""apiVersion":"client.authentication.k8s.io/v1""#));
        assert!(written.contains("from-config"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_process_failure() {
        let plugin = ExecPlugin::new(script("echo 'no profile' >&2; exit 3"));
        match plugin.get_token(false).await {
            Err(AuthError::ProcessFailed { code, message, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(message, "no profile");
            }
            other => panic!("expected ProcessFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_helper_is_process_failure() {
        let plugin = ExecPlugin::new(ExecConfig::new("/nonexistent/kbx-helper"));
        assert!(matches!(
            plugin.get_token(false).await,
            Err(AuthError::ProcessFailed { code: None, .. })
        ));
    }

    #[tokio::test]
    async fn empty_output_is_empty_credential() {
        let plugin = ExecPlugin::new(script("true"));
        assert!(matches!(
            plugin.get_token(false).await,
            Err(AuthError::EmptyCredential { .. })
        ));
    }

    #[tokio::test]
    async fn api_version_mismatch_is_decode_failure() {
        let body = r#"echo '{"apiVersion":"client.authentication.k8s.io/v1beta1","kind":"ExecCredential","status":{"token":"t"}}'"#;
        let plugin = ExecPlugin::new(script(body));
        assert!(matches!(
            plugin.get_token(false).await,
            Err(AuthError::DecodeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn slow_helper_times_out() {
        let config = script("sleep 5").timeout(kbx_proto::Duration::from_nanos(100_000_000));
        let plugin = ExecPlugin::new(config);
        assert!(matches!(
            plugin.get_token(false).await,
            Err(AuthError::Timeout { .. })
        ));
    }
}
