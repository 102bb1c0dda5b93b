//! Watch event streams.

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use kbx_proto::{LineBuffer, Serializer, WatchEvent, decode_event};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{Body, Method};

/// Lazily decoded events of one watch request.
///
/// Events are decoded as soon as their line terminator arrives. The stream
/// ends after an `ERROR` event (yielded first), when the server closes the
/// connection, or when the cancellation token fires. Transport failures are
/// yielded as a final `Err`. Dropping the stream closes the connection.
pub struct WatchStream<R> {
    inner: BoxStream<'static, Result<WatchEvent<R>>>,
}

impl<R> fmt::Debug for WatchStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream").finish_non_exhaustive()
    }
}

struct State<R> {
    body: Option<Body>,
    lines: LineBuffer,
    serializer: Serializer,
    cancel: CancellationToken,
    method: Method,
    path: String,
    _event: PhantomData<fn() -> R>,
}

impl<R> WatchStream<R>
where
    R: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(
        body: Body,
        serializer: Serializer,
        cancel: CancellationToken,
        method: Method,
        path: String,
    ) -> Self {
        let state = State {
            body: Some(body),
            lines: LineBuffer::new(),
            serializer,
            cancel,
            method,
            path,
            _event: PhantomData,
        };
        let inner = futures::stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        })
        .boxed();
        Self { inner }
    }
}

impl<R: DeserializeOwned> State<R> {
    async fn next_event(&mut self) -> Option<Result<WatchEvent<R>>> {
        loop {
            while let Some(line) = self.lines.next_line() {
                if let Some(event) = self.decode(&line) {
                    return Some(event);
                }
            }

            let body = self.body.as_mut()?;
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };
            let Some(chunk) = next else {
                debug!(path = %self.path, "watch cancelled");
                self.close();
                return None;
            };
            match chunk {
                Some(Ok(data)) => self.lines.push(&data),
                Some(Err(source)) => {
                    debug!(path = %self.path, error = %source, "watch transport failed");
                    self.close();
                    return Some(Err(Error::Transport {
                        method: self.method,
                        path: self.path.clone(),
                        source,
                    }));
                }
                None => {
                    debug!(path = %self.path, "watch closed by server");
                    self.close();
                    let tail = self.lines.finish()?;
                    return self.decode(&tail);
                }
            }
        }
    }

    /// Decodes one unit; `None` for units that carry no event.
    fn decode(&mut self, unit: &[u8]) -> Option<Result<WatchEvent<R>>> {
        match decode_event::<R>(&self.serializer, unit) {
            Ok(Some(event)) => {
                if event.is_terminal() {
                    debug!(path = %self.path, "watch ended by error event");
                    self.close();
                    self.lines = LineBuffer::new();
                }
                Some(Ok(event))
            }
            Ok(None) => None,
            Err(e) => {
                self.close();
                self.lines = LineBuffer::new();
                Some(Err(e.into()))
            }
        }
    }

    fn close(&mut self) {
        self.body = None;
    }
}

impl<R> Stream for WatchStream<R> {
    type Item = Result<WatchEvent<R>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
