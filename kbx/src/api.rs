//! Typed resource handles.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use kbx_proto::{ObjectList, SerializationError, Status};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthProvider, TokenProvider};
use crate::client::{ApiRequest, Client};
use crate::error::{Error, Result};
use crate::exec::ExecSession;
use crate::params::{
    DeleteParams, ExecParams, ListParams, LogParams, Patch, PatchParams, PostParams, WatchParams,
};
use crate::transport::{HttpTransport, Transport};
use crate::watch::WatchStream;

/// Group, version and plural name of a resource collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    group: String,
    version: String,
    plural: String,
}

impl ResourcePath {
    /// A core (`/api/v1`) resource, e.g. `pods`.
    pub fn core(plural: &str) -> Self {
        Self::grouped("", "v1", plural)
    }

    /// A resource under `/apis/{group}/{version}`.
    pub fn grouped(group: &str, version: &str, plural: &str) -> Self {
        Self {
            group: group.to_owned(),
            version: version.to_owned(),
            plural: plural.to_owned(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Plural name.
    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// Path of the collection, scoped to `namespace` when given.
    pub fn collection(&self, namespace: Option<&str>) -> String {
        let mut path = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        if let Some(ns) = namespace {
            path.push_str("/namespaces/");
            path.push_str(ns);
        }
        path.push('/');
        path.push_str(&self.plural);
        path
    }

    /// Path of one named object.
    pub fn item(&self, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{name}", self.collection(namespace))
    }

    /// Path of a subresource (`status`, `log`, `exec`, ...) of one object.
    pub fn subresource(&self, namespace: Option<&str>, name: &str, sub: &str) -> String {
        format!("{}/{sub}", self.item(namespace, name))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.group)
        }
    }
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Deleted<K> {
    /// The object still exists with a deletion timestamp (finalizers pending).
    Pending(K),
    /// The object is gone; the server answered with a status.
    Gone(Status),
}

impl<K> Deleted<K> {
    /// Whether the object is already gone.
    pub const fn is_gone(&self) -> bool {
        matches!(self, Self::Gone(_))
    }
}

/// CRUD, watch and exec on one resource collection, optionally namespaced.
///
/// `K` is the payload type; it is opaque to the client apart from its serde
/// implementation.
pub struct Api<K, T = HttpTransport, P = AuthProvider> {
    client: Client<T, P>,
    resource: ResourcePath,
    namespace: Option<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, T, P> Clone for Api<K, T, P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            resource: self.resource.clone(),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K, T, P> fmt::Debug for Api<K, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("resource", &self.resource)
            .field("namespace", &self.namespace)
            .field("kind", &type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K, T: Transport, P: TokenProvider> Api<K, T, P> {
    /// Handle on `resource` in `namespace`.
    pub fn namespaced(client: Client<T, P>, resource: ResourcePath, namespace: &str) -> Self {
        Self {
            client,
            resource,
            namespace: Some(namespace.to_owned()),
            _kind: PhantomData,
        }
    }

    /// Handle on `resource` in the client's default namespace.
    pub fn default_namespaced(client: Client<T, P>, resource: ResourcePath) -> Self {
        let namespace = client.default_namespace().to_owned();
        Self::namespaced(client, resource, &namespace)
    }

    /// Handle on a cluster-scoped resource, or on a namespaced one across
    /// all namespaces (list and watch only).
    pub const fn all(client: Client<T, P>, resource: ResourcePath) -> Self {
        Self {
            client,
            resource,
            namespace: None,
            _kind: PhantomData,
        }
    }

    /// The namespace this handle is scoped to.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The resource collection.
    pub const fn resource(&self) -> &ResourcePath {
        &self.resource
    }

    fn collection(&self) -> String {
        self.resource.collection(self.namespace.as_deref())
    }

    fn item(&self, name: &str) -> String {
        self.resource.item(self.namespace.as_deref(), name)
    }

    fn subresource(&self, name: &str, sub: &str) -> String {
        self.resource
            .subresource(self.namespace.as_deref(), name, sub)
    }
}

impl<K, T, P> Api<K, T, P>
where
    K: Serialize + DeserializeOwned,
    T: Transport,
    P: TokenProvider,
{
    /// Lists objects matching `lp`.
    pub async fn list(&self, lp: &ListParams, cancel: &CancellationToken) -> Result<ObjectList<K>> {
        let request = lp.apply(ApiRequest::get(self.collection()));
        self.client.invoke(&request, cancel).await
    }

    /// Reads `name`.
    pub async fn get(&self, name: &str, cancel: &CancellationToken) -> Result<K> {
        self.client
            .invoke(&ApiRequest::get(self.item(name)), cancel)
            .await
    }

    /// Reads `name`, mapping 404 to `None`.
    pub async fn get_opt(&self, name: &str, cancel: &CancellationToken) -> Result<Option<K>> {
        match self.get(name, cancel).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates `object` in the collection.
    pub async fn create(
        &self,
        pp: &PostParams,
        object: &K,
        cancel: &CancellationToken,
    ) -> Result<K> {
        let body = self.client.codecs().default_serializer().document(object)?;
        let request = pp.apply(ApiRequest::post(self.collection()).body(body));
        self.client.invoke(&request, cancel).await
    }

    /// Replaces `name` with `object`; its `resourceVersion` guards the write.
    pub async fn replace(
        &self,
        name: &str,
        pp: &PostParams,
        object: &K,
        cancel: &CancellationToken,
    ) -> Result<K> {
        let body = self.client.codecs().default_serializer().document(object)?;
        let request = pp.apply(ApiRequest::put(self.item(name)).body(body));
        self.client.invoke(&request, cancel).await
    }

    /// Patches `name` with the strategy `patch` selects.
    pub async fn patch<Q: Serialize>(
        &self,
        name: &str,
        pp: &PatchParams,
        patch: &Patch<Q>,
        cancel: &CancellationToken,
    ) -> Result<K> {
        let body = patch.document(self.client.codecs())?;
        let request = pp.populate(patch, ApiRequest::patch(self.item(name)).body(body))?;
        self.client.invoke(&request, cancel).await
    }

    /// Deletes `name`.
    ///
    /// The server answers with the object while finalizers are pending and
    /// with a `Status` once it is gone.
    pub async fn delete(
        &self,
        name: &str,
        dp: &DeleteParams,
        cancel: &CancellationToken,
    ) -> Result<Deleted<K>> {
        let request = dp.apply(ApiRequest::delete(self.item(name)));
        let value: serde_json::Value = self.client.invoke(&request, cancel).await?;
        if value.is_null() {
            return Ok(Deleted::Gone(Status::success()));
        }
        if value.get("kind").and_then(serde_json::Value::as_str) == Some("Status") {
            let status = from_value::<Status>(value, self.client.codecs().default_content_type())?;
            return Ok(Deleted::Gone(status));
        }
        let object = from_value::<K>(value, self.client.codecs().default_content_type())?;
        Ok(Deleted::Pending(object))
    }

    /// Reads the `status` subresource of `name`.
    pub async fn get_status(&self, name: &str, cancel: &CancellationToken) -> Result<K> {
        self.client
            .invoke(&ApiRequest::get(self.subresource(name, "status")), cancel)
            .await
    }

    /// Replaces the `status` subresource of `name`.
    pub async fn replace_status(
        &self,
        name: &str,
        pp: &PostParams,
        object: &K,
        cancel: &CancellationToken,
    ) -> Result<K> {
        let body = self.client.codecs().default_serializer().document(object)?;
        let request = pp.apply(ApiRequest::put(self.subresource(name, "status")).body(body));
        self.client.invoke(&request, cancel).await
    }

    /// Patches the `status` subresource of `name`.
    pub async fn patch_status<Q: Serialize>(
        &self,
        name: &str,
        pp: &PatchParams,
        patch: &Patch<Q>,
        cancel: &CancellationToken,
    ) -> Result<K> {
        let body = patch.document(self.client.codecs())?;
        let path = self.subresource(name, "status");
        let request = pp.populate(patch, ApiRequest::patch(path).body(body))?;
        self.client.invoke(&request, cancel).await
    }

    /// Deletes every object matching `lp`.
    pub async fn delete_collection(
        &self,
        dp: &DeleteParams,
        lp: &ListParams,
        cancel: &CancellationToken,
    ) -> Result<ObjectList<K>> {
        let request = lp.apply(dp.apply(ApiRequest::delete(self.collection())));
        self.client.invoke(&request, cancel).await
    }
}

impl<K, T, P> Api<K, T, P>
where
    K: DeserializeOwned + Send + 'static,
    T: Transport,
    P: TokenProvider,
{
    /// Watches the collection from `resource_version` (or "now").
    pub async fn watch(
        &self,
        wp: &WatchParams,
        resource_version: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<WatchStream<K>> {
        let request = wp.apply(ApiRequest::get(self.collection()));
        self.client.watch(&request, resource_version, cancel).await
    }
}

impl<K, T: Transport, P: TokenProvider> Api<K, T, P> {
    /// Reads the log of a container of pod `name`.
    pub async fn logs(
        &self,
        name: &str,
        lp: &LogParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = lp.apply(ApiRequest::get(self.subresource(name, "log")));
        let bytes = self.client.invoke_bytes(&request, cancel).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Runs `command` in a container of pod `name`.
    pub async fn exec<I, S>(
        &self,
        name: &str,
        command: I,
        ep: &ExecParams,
        cancel: CancellationToken,
    ) -> Result<ExecSession>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = ep.apply(ApiRequest::get(self.subresource(name, "exec")))?;
        let before = request.query.len();
        for arg in command {
            request = request.query("command", arg);
        }
        if request.query.len() == before {
            return Err(Error::Config("exec needs a command".into()));
        }
        self.client.connect(&request, cancel).await
    }

    /// Attaches to the main process of a container of pod `name`.
    pub async fn attach(
        &self,
        name: &str,
        ep: &ExecParams,
        cancel: CancellationToken,
    ) -> Result<ExecSession> {
        let request = ep.apply(ApiRequest::get(self.subresource(name, "attach")))?;
        self.client.connect(&request, cancel).await
    }
}

fn from_value<R: DeserializeOwned>(value: serde_json::Value, content_type: &str) -> Result<R> {
    serde_json::from_value(value).map_err(|e| {
        Error::Serialization(SerializationError::decode(
            content_type,
            type_name::<R>(),
            &[],
            0,
            e,
        ))
    })
}
