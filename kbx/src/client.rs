//! REST invoker.
//!
//! [`Client`] turns an [`ApiRequest`] into an HTTP exchange: it attaches the
//! bearer credential and negotiated headers, decodes 2xx bodies into the
//! caller's type and everything else into a [`Status`]. A 401 triggers one
//! forced credential refresh and one retry; nothing else is retried.

use std::any::type_name;
use std::sync::Arc;

use futures::StreamExt;
use kbx_proto::channel::SUBPROTOCOL;
use kbx_proto::{CodecRegistry, Document, Serializer, SerializationError, Status};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

use crate::auth::{AuthProvider, Credential, TokenProvider};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec::ExecSession;
use crate::transport::{
    Body, HttpRequest, HttpResponse, HttpTransport, Method, Transport, UpgradeRequest,
};
use crate::watch::WatchStream;

/// A resolved API call: method, path, query and optional encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Absolute path, e.g. `/api/v1/namespaces/default/pods`.
    pub path: String,
    /// Query pairs in order; keys may repeat.
    pub query: Vec<(String, String)>,
    /// Encoded body and its content type.
    pub body: Option<Document>,
}

impl ApiRequest {
    /// Request with no query or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `POST path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// `PUT path`.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// `PATCH path`.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    /// `DELETE path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Appends a query pair.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends a query pair when `value` is present.
    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.query(key, v.to_string()),
            None => self,
        }
    }

    /// Sets the body.
    pub fn body(mut self, document: Document) -> Self {
        self.body = Some(document);
        self
    }

    /// `base` + path + percent-encoded query.
    pub fn url(&self, base: &str) -> String {
        let mut url = format!("{}{}", base.trim_end_matches('/'), self.path);
        for (i, (key, value)) in self.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }
}

/// Shared client state.
#[derive(Debug)]
struct Inner<T, P> {
    base_url: String,
    transport: T,
    tokens: P,
    codecs: Arc<CodecRegistry>,
}

/// Kubernetes API client. Cheap to clone; clones share the credential cache.
#[derive(Debug)]
pub struct Client<T = HttpTransport, P = AuthProvider> {
    inner: Arc<Inner<T, P>>,
    default_namespace: String,
}

impl<T, P> Clone for Client<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            default_namespace: self.default_namespace.clone(),
        }
    }
}

impl Client {
    /// Client for `config` using the default transport and its auth provider.
    pub fn try_from_config(config: &Config) -> Result<Self> {
        let mut codecs = CodecRegistry::builder();
        if let Some(ct) = &config.content_type {
            codecs = codecs.default_content_type(ct);
        }
        let client = Self::new(
            &config.server,
            HttpTransport::new(config)?,
            AuthProvider::from_config(&config.auth),
            Arc::new(codecs.build()),
        );
        Ok(client.with_default_namespace(&config.default_namespace))
    }
}

impl<T: Transport, P: TokenProvider> Client<T, P> {
    /// Client sending to `base_url` through `transport`.
    pub fn new(
        base_url: impl Into<String>,
        transport: T,
        tokens: P,
        codecs: Arc<CodecRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into().trim_end_matches('/').to_owned(),
                transport,
                tokens,
                codecs,
            }),
            default_namespace: crate::config::DEFAULT_NAMESPACE.to_owned(),
        }
    }

    /// Sets the namespace used by [`Api::default_namespaced`](crate::Api::default_namespaced).
    #[must_use]
    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        namespace.clone_into(&mut self.default_namespace);
        self
    }

    /// The configured default namespace.
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// The codec registry shared by this client.
    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Sends `request` and decodes a 2xx body as `R`.
    ///
    /// Non-2xx responses become [`Error::Api`]. An empty 2xx body decodes
    /// as JSON `null`, so `R = ()` or `Option<_>` accept it.
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<R> {
        let (serializer, bytes) = self.exchange(request, cancel).await?;
        decode_body(&serializer, &bytes)
    }

    /// Sends `request` and returns the undecoded 2xx body, e.g. container logs.
    pub async fn invoke_bytes(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let (_, bytes) = self.exchange(request, cancel).await?;
        Ok(bytes)
    }

    async fn exchange(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<(Serializer, Vec<u8>)> {
        let span = debug_span!("invoke", method = %request.method, path = %request.path);
        async {
            let response = self.send_authorized(request, cancel).await?;
            let status = response.status;
            let serializer = self.response_serializer(&response);
            let bytes = self.read_body(request, response.body, cancel).await?;
            if !(200..300).contains(&status) {
                return Err(Error::api(decode_status(&serializer, status, &bytes)));
            }
            debug!(status, bytes = bytes.len(), "response received");
            Ok((serializer, bytes))
        }
        .instrument(span)
        .await
    }

    /// Starts a watch and returns its event stream.
    ///
    /// Adds `watch=1` and, when given, `resourceVersion` to `request`. The
    /// stream ends on an `ERROR` event, connection close or `cancel`.
    /// Rejected credentials are not retried here.
    pub async fn watch<R>(
        &self,
        request: &ApiRequest,
        resource_version: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<WatchStream<R>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let request = request
            .clone()
            .query("watch", "1")
            .query_opt("resourceVersion", resource_version);
        let credential = self.credential(false, &cancel).await?;
        let response = self.dispatch(&request, &credential, &cancel).await?;
        let serializer = self.response_serializer(&response);
        if !response.is_success() {
            let status = response.status;
            let bytes = self.read_body(&request, response.body, &cancel).await?;
            return Err(Error::api(decode_status(&serializer, status, &bytes)));
        }
        debug!(path = %request.path, resource_version, "watch started");
        Ok(WatchStream::new(
            response.body,
            serializer,
            cancel,
            request.method,
            request.path,
        ))
    }

    /// Opens an exec/attach session on `request`.
    ///
    /// Rejected credentials are not retried here; a 401 during the upgrade
    /// surfaces immediately.
    pub async fn connect(
        &self,
        request: &ApiRequest,
        cancel: CancellationToken,
    ) -> Result<ExecSession> {
        let credential = self.credential(false, &cancel).await?;
        let mut headers = Vec::new();
        if let Some(auth) = credential.authorization() {
            headers.push(("Authorization".to_owned(), auth));
        }
        let upgrade = UpgradeRequest {
            url: request.url(&self.inner.base_url),
            headers,
            protocols: vec![SUBPROTOCOL.to_owned()],
        };
        debug!(path = %request.path, "opening channel session");
        let connection = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            conn = self.inner.transport.upgrade(upgrade) => conn,
        }
        .map_err(|source| Error::Transport {
            method: request.method,
            path: request.path.clone(),
            source,
        })?;
        Ok(ExecSession::new(
            connection,
            self.inner.codecs.default_serializer(),
            cancel,
            &request.path,
        ))
    }

    async fn send_authorized(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let credential = self.credential(false, cancel).await?;
        let response = self.dispatch(request, &credential, cancel).await?;
        if response.status != 401 {
            return Ok(response);
        }
        drop(response);

        debug!("credential rejected; refreshing once");
        let credential = self.credential(true, cancel).await?;
        let response = self.dispatch(request, &credential, cancel).await?;
        if response.status == 401 {
            warn!(path = %request.path, "refreshed credential rejected");
        }
        Ok(response)
    }

    async fn credential(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<Credential>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            credential = self.inner.tokens.get_token(force_refresh) => Ok(credential?),
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let mut headers = vec![(
            "Accept".to_owned(),
            self.inner.codecs.default_content_type().to_owned(),
        )];
        if let Some(auth) = credential.authorization() {
            headers.push(("Authorization".to_owned(), auth));
        }
        if let Some(body) = &request.body {
            headers.push(("Content-Type".to_owned(), body.content_type.clone()));
        }
        let http = HttpRequest {
            method: request.method,
            url: request.url(&self.inner.base_url),
            headers,
            body: request.body.as_ref().map(|d| d.bytes.clone()),
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            sent = self.inner.transport.send(http) => sent,
        };
        sent.map_err(|source| Error::Transport {
            method: request.method,
            path: request.path.clone(),
            source,
        })
    }

    async fn read_body(
        &self,
        request: &ApiRequest,
        mut body: Body,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(data)) => bytes.extend_from_slice(&data),
                Some(Err(source)) => {
                    return Err(Error::Transport {
                        method: request.method,
                        path: request.path.clone(),
                        source,
                    });
                }
                None => return Ok(bytes),
            }
        }
    }

    /// Serializer for the response's content type, or the default.
    fn response_serializer(&self, response: &HttpResponse) -> Serializer {
        let codecs = &self.inner.codecs;
        response
            .header("Content-Type")
            .and_then(|ct| codecs.serializer_for(ct).ok())
            .unwrap_or_else(|| codecs.default_serializer())
    }
}

/// Decodes an error body, falling back to a synthesized status.
fn decode_status(serializer: &Serializer, code: u16, bytes: &[u8]) -> Status {
    match serializer.decode::<Status>(bytes) {
        Ok(Some(mut status)) if status.code != 0 || !status.message.is_empty() => {
            if status.code == 0 {
                status.code = code;
            }
            if status.reason.is_empty() {
                kbx_proto::reason_for_code(code).clone_into(&mut status.reason);
            }
            status
        }
        _ => Status::synthesize(code, bytes),
    }
}

fn decode_body<R: DeserializeOwned>(serializer: &Serializer, bytes: &[u8]) -> Result<R> {
    if let Some(value) = serializer.decode::<R>(bytes)? {
        return Ok(value);
    }
    serde_json::from_value(serde_json::Value::Null).map_err(|e| {
        Error::Serialization(SerializationError::decode(
            serializer.content_type(),
            type_name::<R>(),
            bytes,
            0,
            e,
        ))
    })
}
