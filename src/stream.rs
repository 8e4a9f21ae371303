//! The persistent bidirectional stream and the upgrade that opens it.
//!
//! A [`StreamHandle`] wraps any sink/source pair of [`Frame`]s.  Writes go
//! through a single writer lock so frames never interleave; reads go through a
//! single reader lock so there is exactly one consumer at a time.  Closing
//! cancels a shared token, which wakes a pending read and makes every later
//! call fail with [`Error::Closed`].

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::types::HandshakeDescriptor;

/// The `Origin` the gateway expects on the upgrade request.
pub const DEFAULT_ORIGIN: &str = "https://api.slack.com";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One discrete unit of data on the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame; the gateway's JSON messages travel as these.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
    /// The peer is terminating the stream.
    Close,
}

impl Frame {
    fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Close => Message::Close(None),
        }
    }

    fn from_message(message: Message) -> Option<Frame> {
        match message {
            Message::Text(text) => Some(Frame::Text(text)),
            Message::Binary(data) => Some(Frame::Binary(Bytes::from(data))),
            Message::Close(_) => Some(Frame::Close),
            // tungstenite answers pings itself.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }
}

type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;
type FrameSource = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// A live, framed, bidirectional stream.
pub struct StreamHandle {
    writer: Mutex<FrameSink>,
    reader: Mutex<FrameSource>,
    closed: CancellationToken,
    closing: AtomicBool,
}

impl StreamHandle {
    /// Wrap a sink/source pair.
    pub fn new<Si, So>(sink: Si, source: So) -> Self
    where
        Si: Sink<Frame, Error = Error> + Send + 'static,
        So: Stream<Item = Result<Frame>> + Send + 'static,
    {
        Self {
            writer: Mutex::new(Box::pin(sink)),
            reader: Mutex::new(Box::pin(source)),
            closed: CancellationToken::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Wrap an established WebSocket.
    pub fn from_websocket<S>(websocket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = websocket.split();
        let sink = sink
            .sink_map_err(Error::from)
            .with(|frame: Frame| future::ready(Ok::<Message, Error>(frame.into_message())));
        let source = source.filter_map(|item| {
            future::ready(match item {
                Ok(message) => Frame::from_message(message).map(Ok),
                Err(err) => Some(Err(Error::from(err))),
            })
        });
        Self::new(sink, source)
    }

    /// Returns true once either side has terminated the stream.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the stream is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Write one frame.  Concurrent callers are serialized.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            writer = self.writer.lock() => writer,
        };
        if self.is_closed() {
            return Err(closed_error());
        }
        let sent = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            sent = writer.send(frame) => sent,
        };
        match sent {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_closed() {
                    self.closed.cancel();
                }
                Err(err)
            }
        }
    }

    /// Wait for the next data frame.
    ///
    /// Returns [`Error::Closed`] when the peer terminates the stream or when
    /// [`close`](Self::close) is called while waiting.
    pub async fn next(&self) -> Result<Frame> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let mut reader = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            reader = self.reader.lock() => reader,
        };
        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            next = reader.next() => next,
        };
        match next {
            Some(Ok(Frame::Close)) | None => {
                self.closed.cancel();
                Err(Error::closed("stream terminated by peer"))
            }
            Some(Ok(frame)) => Ok(frame),
            Some(Err(err)) => {
                if !err.is_protocol() {
                    self.closed.cancel();
                }
                Err(err)
            }
        }
    }

    /// Terminate the stream.
    ///
    /// A write in flight fails with [`Error::Closed`].  The graceful close of
    /// the writer is bounded by `CLOSE_TIMEOUT`, so a stalled peer cannot hold
    /// this call.  Returns true for the call that performed the close; later
    /// calls are no-ops that return false.
    pub async fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
            let mut writer = self.writer.lock().await;
            writer.close().await
        })
        .await;
        true
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed_error() -> Error {
    Error::closed("stream is closed")
}

/// Anything that can turn a handshake descriptor into a live stream.
#[async_trait]
pub trait Upgrader: Send + Sync {
    /// Dial `descriptor.stream_endpoint`.  No frame is read or written.
    async fn upgrade(&self, descriptor: &HandshakeDescriptor) -> Result<StreamHandle>;
}

/// Dials stream endpoints with the WebSocket upgrade.
#[derive(Clone)]
pub struct WebSocketUpgrader {
    origin: HeaderValue,
    logger: Arc<dyn Logger>,
}

impl WebSocketUpgrader {
    /// Create an upgrader that sends [`DEFAULT_ORIGIN`].
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            origin: HeaderValue::from_static(DEFAULT_ORIGIN),
            logger,
        }
    }

    /// Create an upgrader that sends a custom `Origin`.
    pub fn with_origin(origin: &str, logger: Arc<dyn Logger>) -> Result<Self> {
        let origin = HeaderValue::from_str(origin).map_err(|e| {
            Error::config(format!("invalid origin {origin:?}: {e}"), Some(Box::new(e)))
        })?;
        Ok(Self { origin, logger })
    }

    /// The `Origin` sent on every upgrade.
    pub fn origin(&self) -> &str {
        self.origin.to_str().unwrap_or_default()
    }
}

impl fmt::Debug for WebSocketUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketUpgrader")
            .field("origin", &self.origin)
            .finish()
    }
}

#[async_trait]
impl Upgrader for WebSocketUpgrader {
    async fn upgrade(&self, descriptor: &HandshakeDescriptor) -> Result<StreamHandle> {
        let endpoint = descriptor.stream_endpoint.as_str();
        // The endpoint path carries a one-time ticket; only the host is logged.
        let host = endpoint_host(endpoint);
        let mut request = endpoint.into_client_request().map_err(dial_error)?;
        request.headers_mut().insert(ORIGIN, self.origin.clone());

        self.logger.debug("dialing stream endpoint", &[("host", &host)]);
        let start = Instant::now();
        let (websocket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(dial_error)?;
        self.logger.debug(
            "stream upgraded",
            &[
                ("host", &host),
                ("status", &response.status().as_u16()),
                ("elapsed_ms", &start.elapsed().as_millis()),
            ],
        );
        Ok(StreamHandle::from_websocket(websocket))
    }
}

fn endpoint_host(endpoint: &str) -> String {
    Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(String::from))
        .unwrap_or_else(|| "<invalid>".to_string())
}

fn dial_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    match Error::from(err) {
        Error::Closed { message } => Error::transport(message, None),
        other => other,
    }
}
