//! Client configuration.
//!
//! A [`Config`] is plain data: it can be deserialized (camelCase keys), built
//! with the setters below, or discovered from a pod's service account with
//! [`Config::incluster`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Service-account mount inside a pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// `apiVersion` requested from exec credential helpers by default.
pub const DEFAULT_EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1";

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Connection and authentication settings for a cluster.
///
/// # Example
///
/// ```
/// use kbx::{AuthConfig, Config};
///
/// let config = Config::new("https://10.0.0.1:6443")
///     .auth(AuthConfig::Token { token: "abc".into() })
///     .namespace("apps");
/// assert_eq!(config.default_namespace, "apps");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[must_use]
pub struct Config {
    /// API server base URL, e.g. `https://10.0.0.1:6443`.
    pub server: String,
    /// Namespace used by [`Api::default_namespaced`](crate::Api::default_namespaced).
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    /// How to obtain bearer credentials.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Negotiated content type for request bodies and `Accept`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// PEM bundle of additional trusted roots (the cluster CA).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ca_file: Option<PathBuf>,
    /// Skip server certificate verification.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Limit on establishing a connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<kbx_proto::Duration>,
}

/// Credential source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum AuthConfig {
    /// Anonymous requests.
    #[default]
    None,
    /// A fixed bearer token.
    Token {
        /// The token.
        token: String,
    },
    /// A token re-read from a file (projected service-account tokens).
    TokenFile {
        /// Token file path.
        path: PathBuf,
    },
    /// An external credential helper.
    Exec(ExecConfig),
}

/// Settings for an exec credential helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[must_use]
pub struct ExecConfig {
    /// Helper program.
    pub command: String,
    /// Helper arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for the helper.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<ExecEnvVar>,
    /// `apiVersion` of the `ExecCredential` exchanged with the helper.
    #[serde(default = "default_exec_api_version")]
    pub api_version: String,
    /// Hard limit on a single helper run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<kbx_proto::Duration>,
}

/// One environment entry passed to an exec helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_exec_api_version() -> String {
    DEFAULT_EXEC_API_VERSION.to_owned()
}

impl Config {
    /// Anonymous configuration for `server`.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            default_namespace: default_namespace(),
            auth: AuthConfig::None,
            content_type: None,
            root_ca_file: None,
            insecure_skip_tls_verify: false,
            connect_timeout: None,
        }
    }

    /// Sets the credential source.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the default namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Sets the negotiated content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Trusts the PEM roots in `path` in addition to the system roots.
    pub fn root_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_ca_file = Some(path.into());
        self
    }

    /// Disables server certificate verification.
    pub const fn insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    /// Sets the connect timeout.
    pub const fn connect_timeout(mut self, timeout: kbx_proto::Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Configuration for a client running inside a pod.
    ///
    /// Reads `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` and the
    /// mounted service account (token, CA bundle and namespace).
    pub fn incluster() -> Result<Self> {
        Self::incluster_from(|key| std::env::var(key).ok(), Path::new(SERVICE_ACCOUNT_DIR))
    }

    fn incluster_from(env: impl Fn(&str) -> Option<String>, dir: &Path) -> Result<Self> {
        let host = env("KUBERNETES_SERVICE_HOST")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = env("KUBERNETES_SERVICE_PORT")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "443".to_owned());
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let token = dir.join("token");
        if !token.is_file() {
            return Err(Error::Config(format!(
                "service account token {} not found",
                token.display()
            )));
        }

        let mut config = Self::new(format!("https://{host}:{port}"))
            .auth(AuthConfig::TokenFile { path: token });
        let ca = dir.join("ca.crt");
        if ca.is_file() {
            config.root_ca_file = Some(ca);
        }
        if let Ok(namespace) = std::fs::read_to_string(dir.join("namespace")) {
            let namespace = namespace.trim();
            if !namespace.is_empty() {
                config.default_namespace = namespace.to_owned();
            }
        }
        Ok(config)
    }
}

impl ExecConfig {
    /// Helper `command` with no arguments and the default `apiVersion`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            api_version: default_exec_api_version(),
            timeout: None,
        }
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(ExecEnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Sets the `apiVersion` exchanged with the helper.
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Sets the hard limit on one helper run.
    pub const fn timeout(mut self, timeout: kbx_proto::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
