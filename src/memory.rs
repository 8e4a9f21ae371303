//! In-memory doubles for every seam of the connection lifecycle.
//!
//! - [`duplex`] builds a [`StreamHandle`] whose far end is a [`MemoryPeer`].
//! - [`ScriptedAuthenticator`] and [`RecordingUpgrader`] stand in for the
//!   handshake and the upgrade so a [`ConnectionManager`](crate::ConnectionManager)
//!   can be driven without sockets.
//! - [`QueueConnection`] implements [`Connection`] directly on top of two
//!   queues.

use std::collections::VecDeque;
use std::sync::Mutex as SyncMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::handshake::Authenticator;
use crate::session::Connection;
use crate::stream::{Frame, StreamHandle, Upgrader};
use crate::types::{HandshakeDescriptor, InboundMessage};

fn lock<T>(mutex: &SyncMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Create a stream whose far end is held by the returned peer.
pub fn duplex() -> (StreamHandle, MemoryPeer) {
    let (to_session, from_peer) = mpsc::unbounded::<Frame>();
    let (to_peer, from_session) = mpsc::unbounded::<Frame>();
    let sink = to_peer.sink_map_err(|_| Error::closed("peer has gone away"));
    let source = from_peer.map(Ok);
    let peer = MemoryPeer {
        to_session: SyncMutex::new(Some(to_session)),
        from_session: Mutex::new(from_session),
    };
    (StreamHandle::new(sink, source), peer)
}

/// The far end of a [`duplex`] stream.
pub struct MemoryPeer {
    to_session: SyncMutex<Option<mpsc::UnboundedSender<Frame>>>,
    from_session: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl MemoryPeer {
    /// Deliver a frame to the session.  Returns false once the peer closed.
    pub fn send(&self, frame: Frame) -> bool {
        match lock(&self.to_session).as_ref() {
            Some(tx) => tx.unbounded_send(frame).is_ok(),
            None => false,
        }
    }

    /// Deliver a text frame to the session.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Deliver an encoded message to the session.
    pub fn send_message(&self, message: &InboundMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// The next frame the session wrote, or `None` once the session closed.
    pub async fn recv(&self) -> Option<Frame> {
        self.from_session.lock().await.next().await
    }

    /// The next text frame the session wrote.
    pub async fn recv_text(&self) -> Option<String> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Binary(data) => return String::from_utf8(data.to_vec()).ok(),
                Frame::Close => continue,
            }
        }
    }

    /// Terminate the stream from the peer's side.
    pub fn close(&self) {
        lock(&self.to_session).take();
    }

    /// Echo every data frame back until the session closes.
    pub fn echo(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = self.recv().await {
                match frame {
                    Frame::Close => break,
                    frame => {
                        if !self.send(frame) {
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Build a descriptor for tests.
pub fn descriptor(stream_endpoint: impl Into<String>) -> HandshakeDescriptor {
    HandshakeDescriptor {
        ok: true,
        self_id: "U023BECGF".to_string(),
        self_name: "alarmie".to_string(),
        team_id: "T024BE7LD".to_string(),
        team_domain: "acme".to_string(),
        team_name: "Acme Corp".to_string(),
        stream_endpoint: stream_endpoint.into(),
        issued_at: Instant::now(),
    }
}

/// Build a descriptor that was issued `age` ago.
pub fn stale_descriptor(stream_endpoint: impl Into<String>, age: Duration) -> HandshakeDescriptor {
    let mut descriptor = descriptor(stream_endpoint);
    descriptor.issued_at = Instant::now()
        .checked_sub(age)
        .unwrap_or(descriptor.issued_at);
    descriptor
}

/// Answers handshakes from a script, one entry per call.
#[derive(Default)]
pub struct ScriptedAuthenticator {
    script: SyncMutex<VecDeque<Result<HandshakeDescriptor>>>,
    credentials: SyncMutex<Vec<String>>,
}

impl ScriptedAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next unanswered call.
    pub fn push(self, result: Result<HandshakeDescriptor>) -> Self {
        lock(&self.script).push_back(result);
        self
    }

    /// Number of handshakes performed.
    pub fn calls(&self) -> usize {
        lock(&self.credentials).len()
    }

    /// Credentials presented, in call order.
    pub fn credentials(&self) -> Vec<String> {
        lock(&self.credentials).clone()
    }
}

#[async_trait]
impl Authenticator for ScriptedAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<HandshakeDescriptor> {
        lock(&self.credentials).push(credential.to_string());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(Error::network("no scripted handshake left", None, None)))
    }
}

/// Hands out [`duplex`] streams and records every endpoint dialed.
#[derive(Default)]
pub struct RecordingUpgrader {
    endpoints: SyncMutex<Vec<String>>,
    peers: SyncMutex<VecDeque<MemoryPeer>>,
    failure: Option<Error>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl RecordingUpgrader {
    pub fn new() -> Self {
        Self::default()
    }

    /// An upgrader whose every dial fails with `error`.
    pub fn failing(error: Error) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// Make every dial take `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of dials attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Endpoints dialed, in call order.
    pub fn endpoints(&self) -> Vec<String> {
        lock(&self.endpoints).clone()
    }

    /// The peer of the oldest successful dial not yet taken.
    pub fn take_peer(&self) -> Option<MemoryPeer> {
        lock(&self.peers).pop_front()
    }
}

#[async_trait]
impl Upgrader for RecordingUpgrader {
    async fn upgrade(&self, descriptor: &HandshakeDescriptor) -> Result<StreamHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.endpoints).push(descriptor.stream_endpoint.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let (stream, peer) = duplex();
        lock(&self.peers).push_back(peer);
        Ok(stream)
    }
}

/// A [`Connection`] backed by two in-memory queues.
///
/// Inbound results are pushed through the paired [`QueueDriver`]; texts passed
/// to [`send`](Connection::send) show up on the driver.
pub struct QueueConnection {
    inbound: Mutex<tokio::sync::mpsc::UnboundedReceiver<Result<InboundMessage>>>,
    outbound: tokio::sync::mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

/// The test-side handle of a [`QueueConnection`].
pub struct QueueDriver {
    inbound: tokio::sync::mpsc::UnboundedSender<Result<InboundMessage>>,
    outbound: tokio::sync::mpsc::UnboundedReceiver<String>,
}

impl QueueConnection {
    pub fn new() -> (Self, QueueDriver) {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let connection = Self {
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            closed: CancellationToken::new(),
        };
        let driver = QueueDriver {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (connection, driver)
    }
}

impl QueueDriver {
    /// Queue an inbound message or error.  Returns false once the connection is gone.
    pub fn push(&self, item: Result<InboundMessage>) -> bool {
        self.inbound.send(item).is_ok()
    }

    /// The next text sent through the connection.
    pub async fn sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

#[async_trait]
impl Connection for QueueConnection {
    async fn send(&self, text: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::closed("connection is closed"));
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| Error::closed("driver has gone away"))
    }

    async fn receive(&self) -> Result<InboundMessage> {
        if self.closed.is_cancelled() {
            return Err(Error::closed("connection is closed"));
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::closed("connection is closed")),
            item = inbound.recv() => match item {
                Some(item) => item,
                None => {
                    self.closed.cancel();
                    Err(Error::closed("driver has gone away"))
                }
            },
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
