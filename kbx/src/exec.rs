//! Exec/attach sessions over the v4 channel protocol.
//!
//! A background task reads frames off the connection and routes them:
//! stdout and stderr payloads to per-channel buffers, the single error-channel
//! message to the session's final [`Status`]. Outbound frames go through one
//! lock so they are written whole and in order.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kbx_proto::channel::{Channel, TerminalSize, decode_frame, encode_frame};
use kbx_proto::{Format, JSON, Serializer, Status};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::transport::{Connection, Method};

/// An interactive process session.
///
/// Take the output readers with [`take_stdout`](Self::take_stdout) and
/// [`take_stderr`](Self::take_stderr), write input through
/// [`writer`](Self::writer), then [`join`](Self::join) for the final status.
/// Dropping the session stops the reader task. Writers follow only the
/// caller's cancellation token, so the connection stays open for them and
/// closes once every [`SessionWriter`] is gone.
pub struct ExecSession {
    writer: SessionWriter,
    stdout: Option<ChannelReader>,
    stderr: Option<ChannelReader>,
    status: Option<oneshot::Receiver<Result<Status>>>,
    cancel: CancellationToken,
}

impl fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecSession")
            .field("path", &self.writer.path)
            .finish_non_exhaustive()
    }
}

struct Outbound {
    sink: SplitSink<Connection, Vec<u8>>,
    closed: bool,
}

/// Cloneable handle for stdin and resize frames.
#[derive(Clone)]
pub struct SessionWriter {
    outbound: Arc<Mutex<Outbound>>,
    cancel: CancellationToken,
    path: Arc<str>,
}

impl fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Routes of the reader task.
struct Routes {
    stdout: mpsc::UnboundedSender<Vec<u8>>,
    stderr: mpsc::UnboundedSender<Vec<u8>>,
}

impl ExecSession {
    pub(crate) fn new(
        connection: Connection,
        serializer: Serializer,
        cancel: CancellationToken,
        path: &str,
    ) -> Self {
        let session_cancel = cancel.child_token();
        let path: Arc<str> = Arc::from(path);
        let (sink, stream) = connection.split();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = oneshot::channel();

        let routes = Routes {
            stdout: stdout_tx,
            stderr: stderr_tx,
        };
        let reader_cancel = session_cancel.clone();
        let reader_path = Arc::clone(&path);
        tokio::spawn(async move {
            let outcome = demux(stream, routes, &serializer, &reader_cancel, &reader_path).await;
            match &outcome {
                Ok(status) => debug!(path = %reader_path, %status, "session status received"),
                Err(e) => debug!(path = %reader_path, error = %e, "session reader stopped"),
            }
            let _ = status_tx.send(outcome);
        });

        Self {
            writer: SessionWriter {
                outbound: Arc::new(Mutex::new(Outbound { sink, closed: false })),
                cancel,
                path,
            },
            stdout: Some(ChannelReader::new(stdout_rx)),
            stderr: Some(ChannelReader::new(stderr_rx)),
            status: Some(status_rx),
            cancel: session_cancel,
        }
    }

    /// Takes the stdout reader. Returns `None` after the first call.
    pub fn take_stdout(&mut self) -> Option<ChannelReader> {
        self.stdout.take()
    }

    /// Takes the stderr reader. Returns `None` after the first call.
    pub fn take_stderr(&mut self) -> Option<ChannelReader> {
        self.stderr.take()
    }

    /// A handle for writing stdin and resize frames.
    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    /// Writes `data` to the process's stdin.
    pub async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        self.writer.write_stdin(data).await
    }

    /// Reports a terminal size change.
    pub async fn resize(&self, size: TerminalSize) -> Result<()> {
        self.writer.resize(size).await
    }

    /// Waits for the final status, then closes the connection.
    ///
    /// Fails with [`ProtocolError::MissingStatus`] if the connection ended
    /// without one.
    pub async fn join(mut self) -> Result<Status> {
        let outcome = match self.status.take() {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ProtocolError::MissingStatus.into())),
            None => Err(ProtocolError::MissingStatus.into()),
        };
        if let Err(e) = self.writer.close().await {
            debug!(path = %self.writer.path, error = %e, "close after status failed");
        }
        self.cancel.cancel();
        outcome
    }

    /// Closes the connection without waiting for a status.
    ///
    /// Waits for an in-flight write to finish first. Readers then see
    /// end-of-stream.
    pub async fn close(self) -> Result<()> {
        let closed = self.writer.close().await;
        self.cancel.cancel();
        closed
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SessionWriter {
    /// Writes `data` to the process's stdin.
    pub async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        self.send(Channel::Stdin, data).await
    }

    /// Reports a terminal size change.
    pub async fn resize(&self, size: TerminalSize) -> Result<()> {
        let payload = Serializer::new(JSON, Format::Json).encode(&size)?;
        self.send(Channel::Resize, &payload).await
    }

    async fn send(&self, channel: Channel, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(channel, payload);
        let mut outbound = self.outbound.lock().await;
        if outbound.closed || self.cancel.is_cancelled() {
            return Err(self.transport_error(TransportError::Closed));
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = outbound.sink.send(frame) => sent.map_err(|e| self.transport_error(e)),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut outbound = self.outbound.lock().await;
        if outbound.closed {
            return Ok(());
        }
        outbound.closed = true;
        debug!(path = %self.path, "closing session");
        outbound
            .sink
            .close()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, source: TransportError) -> Error {
        Error::Transport {
            method: Method::Get,
            path: self.path.to_string(),
            source,
        }
    }
}

async fn demux(
    mut inbound: SplitStream<Connection>,
    routes: Routes,
    serializer: &Serializer,
    cancel: &CancellationToken,
    path: &str,
) -> Result<Status> {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            next = inbound.next() => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(source)) => {
                return Err(Error::Transport {
                    method: Method::Get,
                    path: path.to_owned(),
                    source,
                });
            }
            None => return Err(ProtocolError::MissingStatus.into()),
        };

        let (channel, payload) = decode_frame(&frame).map_err(ProtocolError::from)?;
        match channel {
            Channel::Stdout | Channel::Stderr if payload.is_empty() => {}
            Channel::Stdout => {
                let _ = routes.stdout.send(payload.to_vec());
            }
            Channel::Stderr => {
                let _ = routes.stderr.send(payload.to_vec());
            }
            Channel::Error => return Ok(decode_status(serializer, payload)),
            Channel::Stdin | Channel::Resize => {
                return Err(ProtocolError::UnexpectedChannel(channel).into());
            }
        }
    }
}

/// Decodes the error-channel payload. An empty payload means success.
fn decode_status(serializer: &Serializer, payload: &[u8]) -> Status {
    match serializer.decode::<Status>(payload) {
        Ok(Some(status)) => status,
        Ok(None) => Status::success(),
        Err(_) => Status::synthesize(500, payload),
    }
}

/// Output of one channel, readable as bytes or as whole frames.
///
/// Reaches end-of-stream once the session's status arrives or the session
/// ends.
#[derive(Debug)]
pub struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    const fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }

    /// The next chunk of output, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        if self.pos < self.pending.len() {
            let rest = self.pending.split_off(self.pos);
            self.pending.clear();
            self.pos = 0;
            return Some(rest);
        }
        self.rx.recv().await
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if self.pos < self.pending.len() {
                let n = buf.remaining().min(self.pending.len() - self.pos);
                let start = self.pos;
                buf.put_slice(&self.pending[start..start + n]);
                self.pos += n;
                return Poll::Ready(Ok(()));
            }
            match ready!(self.rx.poll_recv(cx)) {
                Some(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use kbx_proto::CodecRegistry;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::transport::mock::{Peer, connection_pair, slow_connection_pair};

    fn session() -> (ExecSession, Peer) {
        session_over(connection_pair())
    }

    fn session_over((connection, peer): (Connection, Peer)) -> (ExecSession, Peer) {
        let session = ExecSession::new(
            connection,
            CodecRegistry::default().default_serializer(),
            CancellationToken::new(),
            "/api/v1/namespaces/default/pods/web/exec",
        );
        (session, peer)
    }

    async fn drain(reader: &mut ChannelReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn routes_frames_buffered_together() {
        let (mut session, peer) = session();
        peer.send(b"\x01hello");
        peer.send(b"\x02warn");
        peer.send(&encode_frame(Channel::Error, br#"{"status":"Success"}"#));

        let mut stdout = session.take_stdout().unwrap();
        let mut stderr = session.take_stderr().unwrap();
        let status = session.join().await.unwrap();
        assert!(status.is_success());
        assert_eq!(drain(&mut stdout).await, b"hello");
        assert_eq!(drain(&mut stderr).await, b"warn");
    }

    #[tokio::test]
    async fn routes_frames_arriving_one_by_one() {
        let (mut session, peer) = session();
        let mut stdout = session.take_stdout().unwrap();
        let mut stderr = session.take_stderr().unwrap();

        peer.send(b"\x01hello");
        assert_eq!(stdout.recv().await.as_deref(), Some(&b"hello"[..]));
        peer.send(b"\x02warn");
        assert_eq!(stderr.recv().await.as_deref(), Some(&b"warn"[..]));
        peer.send(&encode_frame(Channel::Error, br#"{"status":"Success"}"#));

        assert!(session.join().await.unwrap().is_success());
        assert_eq!(stdout.recv().await, None);
        assert_eq!(stderr.recv().await, None);
    }

    #[tokio::test]
    async fn exit_code_from_failure_status() {
        let (session, peer) = session();
        peer.send(&encode_frame(
            Channel::Error,
            br#"{"status":"Failure","reason":"NonZeroExitCode","message":"exit code 2","details":{"causes":[{"reason":"ExitCode","message":"2"}]}}"#,
        ));
        assert_eq!(session.join().await.unwrap().exit_code(), Some(2));
    }

    #[tokio::test]
    async fn stdin_and_resize_are_framed() {
        let (session, mut peer) = session();
        let writer = session.writer();
        writer.write_stdin(b"ls\n").await.unwrap();
        session
            .resize(TerminalSize {
                width: 80,
                height: 24,
            })
            .await
            .unwrap();

        assert_eq!(peer.recv().await.unwrap(), b"\x00ls\n");
        assert_eq!(
            peer.recv().await.unwrap(),
            encode_frame(Channel::Resize, br#"{"Width":80,"Height":24}"#)
        );
    }

    #[tokio::test]
    async fn unknown_channel_is_a_protocol_error() {
        let (mut session, peer) = session();
        let mut stdout = session.take_stdout().unwrap();
        peer.send(b"\x09junk");
        assert!(matches!(
            session.join().await,
            Err(Error::Protocol(ProtocolError::Frame(_)))
        ));
        assert_eq!(stdout.recv().await, None);
    }

    #[tokio::test]
    async fn hang_up_without_status() {
        let (session, peer) = session();
        peer.send(b"\x01partial");
        peer.hang_up();
        assert!(matches!(
            session.join().await,
            Err(Error::Protocol(ProtocolError::MissingStatus))
        ));
    }

    #[tokio::test]
    async fn transport_failure_ends_session() {
        let (session, peer) = session();
        peer.fail(TransportError::Closed);
        assert!(matches!(
            session.join().await,
            Err(Error::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn close_unblocks_readers_and_rejects_writes() {
        let (mut session, mut peer) = session();
        let mut stdout = session.take_stdout().unwrap();
        let writer = session.writer();
        session.close().await.unwrap();

        assert_eq!(stdout.recv().await, None);
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            writer.write_stdin(b"late").await,
            Err(Error::Transport {
                source: TransportError::Closed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn caller_cancellation_stops_the_reader() {
        let (connection, _peer) = connection_pair();
        let cancel = CancellationToken::new();
        let mut session = ExecSession::new(
            connection,
            CodecRegistry::default().default_serializer(),
            cancel.clone(),
            "/exec",
        );
        let mut stdout = session.take_stdout().unwrap();
        cancel.cancel();
        assert_eq!(stdout.recv().await, None);
        assert!(matches!(session.join().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn close_waits_for_a_write_blocked_on_a_slow_peer() {
        let (session, mut peer) = session_over(slow_connection_pair());
        let writer = session.writer();
        let write = tokio::spawn(async move { writer.write_stdin(b"in flight").await });
        tokio::task::yield_now().await;
        let close = tokio::spawn(session.close());
        tokio::task::yield_now().await;
        assert!(!write.is_finished());
        assert!(!close.is_finished());

        assert_eq!(peer.recv().await.unwrap(), b"\x00in flight");
        write.await.unwrap().unwrap();
        close.await.unwrap().unwrap();
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn writers_outlive_a_dropped_session() {
        let (session, mut peer) = session();
        let writer = session.writer();
        drop(session);

        writer.write_stdin(b"still here").await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), b"\x00still here");

        drop(writer);
        assert!(peer.recv().await.is_none());
    }
}
