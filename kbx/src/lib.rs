//! Typed Kubernetes API client.
//!
//! `kbx` speaks the Kubernetes REST protocol over HTTPS: typed CRUD and
//! watch through [`Api`], bearer credentials from static tokens, token files
//! or exec plugins, and multiplexed exec/attach sessions over WebSockets.
//! Wire encoding lives in [`kbx_proto`].
//!
//! # Quick start
//!
//! ```no_run
//! use kbx::{Api, AuthConfig, Client, Config, ListParams, ResourcePath};
//! use kbx_proto::ObjectMeta;
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Pod {
//!     metadata: ObjectMeta,
//! }
//!
//! # async fn run() -> kbx::Result<()> {
//! let config = Config::new("https://10.0.0.1:6443")
//!     .auth(AuthConfig::Token { token: "secret".into() })
//!     .namespace("apps");
//! let client = Client::try_from_config(&config)?;
//! let pods: Api<Pod> = Api::default_namespaced(client, ResourcePath::core("pods"));
//!
//! let cancel = CancellationToken::new();
//! for pod in pods.list(&ListParams::default(), &cancel).await?.items {
//!     println!("{:?}", pod.metadata.name);
//! }
//! # Ok(())
//! # }
//! ```

mod api;
pub mod auth;
mod client;
mod config;
mod error;
mod exec;
mod params;
pub mod transport;
mod watch;

pub use api::{Api, Deleted, ResourcePath};
pub use client::{ApiRequest, Client};
pub use config::{AuthConfig, Config, ExecConfig, ExecEnvVar};
pub use error::{AuthError, Error, ProtocolError, Result, TransportError};
pub use exec::{ChannelReader, ExecSession, SessionWriter};
pub use kbx_proto;
pub use params::{
    DeleteParams, ExecParams, ListParams, LogParams, Patch, PatchParams, PostParams,
    PropagationPolicy, WatchParams,
};
pub use watch::WatchStream;
