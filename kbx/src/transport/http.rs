//! Default transport: `reqwest` for HTTP, `tokio-tungstenite` for upgrades.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::{Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{Connector, WebSocketStream};
use tracing::trace;

use super::{Connection, HttpRequest, HttpResponse, Method, Transport, UpgradeRequest};
use crate::config::Config;
use crate::error::{Error, Result, TransportError};

/// [`Transport`] backed by an async `reqwest` client and WebSockets.
///
/// Response bodies are read as they arrive. Dropping the body stream drops
/// the connection, so an abandoned watch releases its socket at once.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    tls: native_tls::TlsConnector,
}

impl HttpTransport {
    /// Builds a transport honoring the TLS and timeout settings of `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let pem = match &config.root_ca_file {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                Error::Config(format!("cannot read CA bundle {}: {e}", path.display()))
            })?),
            None => None,
        };

        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(config.insecure_skip_tls_verify);
        if let Some(timeout) = config.connect_timeout.and_then(|t| t.to_std()) {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(pem) = &pem {
            let roots = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| Error::Config(format!("invalid CA bundle: {e}")))?;
            if roots.is_empty() {
                return Err(Error::Config("CA bundle contains no certificates".into()));
            }
            for root in roots {
                builder = builder.add_root_certificate(root);
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;

        let mut ws_tls = native_tls::TlsConnector::builder();
        ws_tls.danger_accept_invalid_certs(config.insecure_skip_tls_verify);
        if let Some(pem) = &pem {
            let root = native_tls::Certificate::from_pem(pem)
                .map_err(|e| Error::Config(format!("invalid CA bundle: {e}")))?;
            ws_tls.add_root_certificate(root);
        }
        let tls = ws_tls
            .build()
            .map_err(|e| Error::Config(format!("cannot build TLS connector: {e}")))?;

        Ok(Self { client, tls })
    }
}

const fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(http_error)?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(http_error))
            .boxed();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<Connection, TransportError> {
        let url = match request.url.split_once("://") {
            Some(("https", rest)) => format!("wss://{rest}"),
            Some(("http", rest)) => format!("ws://{rest}"),
            _ => request.url.clone(),
        };
        let mut ws_request = url.into_client_request().map_err(ws_error)?;
        let headers = ws_request.headers_mut();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| TransportError::WebSocket(e.to_string()))?;
            headers.insert(name, value);
        }
        if !request.protocols.is_empty() {
            let offered = HeaderValue::from_str(&request.protocols.join(", "))
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
            headers.insert("Sec-WebSocket-Protocol", offered);
        }

        let connector = Connector::NativeTls(self.tls.clone());
        let (stream, response) = tokio_tungstenite::connect_async_tls_with_config(
            ws_request,
            None,
            false,
            Some(connector),
        )
        .await
        .map_err(ws_error)?;
        trace!(status = %response.status(), "websocket upgraded");
        Ok(Box::pin(WsConnection::new(stream)))
    }
}

fn http_error(e: impl ToString) -> TransportError {
    TransportError::Http(e.to_string())
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::WebSocket(e.to_string())
}

/// Adapts a WebSocket to a [`MessageConnection`](super::MessageConnection).
///
/// Binary and text messages are yielded as bytes; control frames are
/// handled by tungstenite and skipped; a close frame ends the stream.
#[derive(Debug)]
pub(crate) struct WsConnection<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsConnection<S> {
    pub(crate) const fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

impl<S> Stream for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Vec<u8>, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                None => return Poll::Ready(None),
                Some(Err(e)) => return Poll::Ready(Some(Err(ws_error(e)))),
                Some(Ok(message)) => message,
            };
            match message {
                Message::Binary(data) => return Poll::Ready(Some(Ok(data.to_vec()))),
                Message::Text(text) => {
                    return Poll::Ready(Some(Ok(text.as_str().as_bytes().to_vec())));
                }
                Message::Close(_) => return Poll::Ready(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

impl<S> Sink<Vec<u8>> for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_ready(cx).map_err(ws_error)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Vec<u8>) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(Message::Binary(item.into()))
            .map_err(ws_error)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(ws_error)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(ws_error)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::SinkExt;
    use kbx_proto::WatchEvent;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{ApiRequest, Client, WatchStream};

    #[tokio::test]
    async fn websocket_adapter_frames_messages() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut client = WsConnection::new(
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await,
        );
        let mut server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        server
            .send(Message::Binary(b"\x01hello".to_vec().into()))
            .await
            .unwrap();
        server.send(Message::Ping(Vec::new().into())).await.unwrap();
        server.send(Message::Text("\x02warn".into())).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), b"\x01hello");
        assert_eq!(client.next().await.unwrap().unwrap(), b"\x02warn");

        client.send(b"\x00input".to_vec()).await.unwrap();
        loop {
            match server.next().await.unwrap().unwrap() {
                Message::Binary(data) => {
                    assert_eq!(&data[..], b"\x00input");
                    break;
                }
                Message::Pong(_) => {}
                other => panic!("expected binary message, got {other:?}"),
            }
        }

        server.close(None).await.unwrap();
        assert!(client.next().await.is_none());
    }

    const ADDED: &str = "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"name\":\"web\"}}}\n";

    /// Answers one request with a chunked head and a single watch line, then
    /// goes silent. The task finishes when the client hangs up.
    async fn quiet_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                assert_ne!(n, 0, "client hung up before sending a request");
                head.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                      Transfer-Encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            let chunk = format!("{:x}\r\n{ADDED}\r\n", ADDED.len());
            socket.write_all(chunk.as_bytes()).await.unwrap();
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    return;
                }
            }
        });
        (format!("http://{addr}"), task)
    }

    async fn open_watch(server: String, cancel: CancellationToken) -> WatchStream<Value> {
        let client = Client::try_from_config(&Config::new(server)).unwrap();
        let mut events = client
            .watch::<Value>(&ApiRequest::get("/api/v1/pods"), None, cancel)
            .await
            .unwrap();
        match events.next().await {
            Some(Ok(WatchEvent::Added(pod))) => assert_eq!(pod["metadata"]["name"], "web"),
            other => panic!("expected ADDED, got {other:?}"),
        }
        events
    }

    #[tokio::test]
    async fn dropped_watch_releases_a_silent_connection() {
        let (server, hung_up) = quiet_server().await;
        let events = open_watch(server, CancellationToken::new()).await;
        drop(events);
        tokio::time::timeout(Duration::from_secs(5), hung_up)
            .await
            .expect("socket still open after the watch was dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_watch_releases_a_silent_connection() {
        let (server, hung_up) = quiet_server().await;
        let cancel = CancellationToken::new();
        let mut events = open_watch(server, cancel.clone()).await;
        cancel.cancel();
        assert!(events.next().await.is_none());
        tokio::time::timeout(Duration::from_secs(5), hung_up)
            .await
            .expect("socket still open after the watch was cancelled")
            .unwrap();
        drop(events);
    }
}
