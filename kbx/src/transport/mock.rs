//! In-memory transport for tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Sink, Stream, StreamExt};

use super::{Connection, HttpRequest, HttpResponse, Transport, UpgradeRequest};
use crate::error::TransportError;

/// Replays queued responses and records what was sent.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    connections: Mutex<VecDeque<Connection>>,
    requests: Mutex<Vec<HttpRequest>>,
    upgrades: Mutex<Vec<UpgradeRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a response whose body arrives as `chunks`.
    pub(crate) fn respond_chunks(&self, status: u16, chunks: &[&[u8]]) -> &Self {
        let chunks: Vec<Result<Vec<u8>, TransportError>> =
            chunks.iter().map(|c| Ok(c.to_vec())).collect();
        self.respond_body(status, futures::stream::iter(chunks).boxed())
    }

    /// Queues a single-chunk JSON response.
    pub(crate) fn respond(&self, status: u16, body: &str) -> &Self {
        self.respond_chunks(status, &[body.as_bytes()])
    }

    /// Queues a response with an arbitrary body stream.
    pub(crate) fn respond_body(&self, status: u16, body: super::Body) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body,
        }));
        self
    }

    /// Queues a transport failure.
    pub(crate) fn fail(&self, error: TransportError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queues a connection for the next upgrade.
    pub(crate) fn accept(&self, connection: Connection) -> &Self {
        self.connections.lock().unwrap().push_back(connection);
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn upgrades(&self) -> Vec<UpgradeRequest> {
        self.upgrades.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or(Err(TransportError::Closed))
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<Connection, TransportError> {
        self.upgrades.lock().unwrap().push(request);
        let next = self.connections.lock().unwrap().pop_front();
        next.ok_or(TransportError::Closed)
    }
}

/// Client half of an in-memory message connection.
///
/// Outbound frames go through a bounded channel, so a flush waits for the
/// peer once its buffer is full.
struct ChannelConnection {
    rx: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    tx: mpsc::Sender<Vec<u8>>,
}

impl Stream for ChannelConnection {
    type Item = Result<Vec<u8>, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Sink<Vec<u8>> for ChannelConnection {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.tx)
            .poll_ready(cx)
            .map_err(|_| TransportError::Closed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Vec<u8>) -> Result<(), Self::Error> {
        Pin::new(&mut self.tx)
            .start_send(item)
            .map_err(|_| TransportError::Closed)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.tx)
            .poll_flush(cx)
            .map_err(|_| TransportError::Closed)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.tx)
            .poll_close(cx)
            .map_err(|_| TransportError::Closed)
    }
}

/// Server half of an in-memory message connection.
pub(crate) struct Peer {
    tx: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Peer {
    pub(crate) fn send(&self, message: &[u8]) {
        self.tx.unbounded_send(Ok(message.to_vec())).unwrap();
    }

    pub(crate) fn fail(&self, error: TransportError) {
        self.tx.unbounded_send(Err(error)).unwrap();
    }

    pub(crate) async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.next().await
    }

    pub(crate) fn hang_up(&self) {
        self.tx.close_channel();
    }
}

/// A connected client/server pair.
pub(crate) fn connection_pair() -> (Connection, Peer) {
    pair_with_buffer(64)
}

/// A pair whose peer accepts one frame at a time: every client write stays
/// unflushed until the peer receives it.
pub(crate) fn slow_connection_pair() -> (Connection, Peer) {
    pair_with_buffer(0)
}

fn pair_with_buffer(buffer: usize) -> (Connection, Peer) {
    let (to_client, client_rx) = mpsc::unbounded();
    let (client_tx, from_client) = mpsc::channel(buffer);
    let client = ChannelConnection {
        rx: client_rx,
        tx: client_tx,
    };
    (
        Box::pin(client),
        Peer {
            tx: to_client,
            rx: from_client,
        },
    )
}
