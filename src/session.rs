//! A live session: identity metadata plus the stream.
//!
//! [`SessionContext`] is what [`ConnectionManager::connect`] hands back.  It is
//! meant to be shared (`Arc<SessionContext>`) between one receive loop and any
//! number of senders.
//!
//! [`ConnectionManager::connect`]: crate::ConnectionManager::connect

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::manager::ConnectionState;
use crate::observability::{FRAMES_RECEIVED, FRAMES_SENT, PROTOCOL_ERRORS, SESSIONS_CLOSED};
use crate::stream::{Frame, StreamHandle};
use crate::types::{HandshakeDescriptor, InboundMessage, OutboundMessage};

/// The send/receive capability of a live connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one outbound message.
    async fn send(&self, text: &str) -> Result<()>;

    /// Wait for the next inbound message.
    async fn receive(&self) -> Result<InboundMessage>;

    /// Terminate the connection.  Idempotent.
    async fn close(&self);
}

/// A live session against the gateway.
pub struct SessionContext {
    self_id: String,
    self_name: String,
    team_id: String,
    team_name: String,
    team_domain: String,
    default_channel: Option<String>,
    stream: StreamHandle,
    next_id: AtomicU64,
    logger: Arc<dyn Logger>,
}

impl SessionContext {
    /// Bind a descriptor's identity to an upgraded stream.
    pub fn new(
        descriptor: HandshakeDescriptor,
        stream: StreamHandle,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            self_id: descriptor.self_id,
            self_name: descriptor.self_name,
            team_id: descriptor.team_id,
            team_name: descriptor.team_name,
            team_domain: descriptor.team_domain,
            default_channel: None,
            stream,
            next_id: AtomicU64::new(1),
            logger,
        }
    }

    /// Address [`send`](Self::send) to `channel`.
    pub fn with_default_channel(mut self, channel: Option<String>) -> Self {
        self.default_channel = channel;
        self
    }

    /// Identifier of the authenticated user.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Display name of the authenticated user.
    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Identifier of the team the user belongs to.
    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// Human-readable team name.
    pub fn team_name(&self) -> &str {
        &self.team_name
    }

    /// The team's workspace domain, e.g. `acme` for `acme.slack.com`.
    pub fn team_domain(&self) -> &str {
        &self.team_domain
    }

    /// Channel [`send`](Self::send) addresses, if any.
    pub fn default_channel(&self) -> Option<&str> {
        self.default_channel.as_deref()
    }

    /// `Connected` until either side closes the stream, then `Closed`.
    pub fn state(&self) -> ConnectionState {
        if self.stream.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        }
    }

    /// Returns true once either side has closed the session.
    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    /// Resolves once the session is closed by either side.
    pub async fn closed(&self) {
        self.stream.closed().await
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write(&self, message: OutboundMessage) -> Result<u64> {
        let id = message.id;
        let text = serde_json::to_string(&message)?;
        self.stream.send(Frame::Text(text)).await?;
        FRAMES_SENT.click();
        Ok(id)
    }

    /// Send `text` to the default channel.  Returns the message id the
    /// gateway will echo back as `reply_to`.
    pub async fn send(&self, text: &str) -> Result<u64> {
        self.write(OutboundMessage::message(
            self.next_id(),
            self.default_channel.clone(),
            text,
        ))
        .await
    }

    /// Send `text` to `channel`.
    pub async fn send_to(&self, channel: &str, text: &str) -> Result<u64> {
        self.write(OutboundMessage::message(
            self.next_id(),
            Some(channel.to_string()),
            text,
        ))
        .await
    }

    /// Send a keep-alive ping.
    pub async fn ping(&self) -> Result<u64> {
        self.write(OutboundMessage::ping(self.next_id())).await
    }

    /// Wait for the next inbound message.
    ///
    /// A frame that does not decode yields [`Error::Protocol`] and leaves the
    /// session open; the next call waits for the following frame.
    pub async fn receive(&self) -> Result<InboundMessage> {
        let frame = self.stream.next().await?;
        FRAMES_RECEIVED.click();
        let decoded = match frame {
            Frame::Text(text) => InboundMessage::decode(&text),
            Frame::Binary(data) => std::str::from_utf8(&data)
                .map_err(Error::from)
                .and_then(InboundMessage::decode),
            Frame::Close => Err(Error::closed("stream terminated by peer")),
        };
        match decoded {
            Ok(message) => {
                self.logger.debug(
                    "message received",
                    &[
                        ("type", &message.kind),
                        ("channel", &message.channel),
                        ("user", &message.user),
                    ],
                );
                Ok(message)
            }
            Err(err) => {
                if err.is_protocol() {
                    PROTOCOL_ERRORS.click();
                    self.logger.warn("dropping malformed frame", &[("error", &err)]);
                }
                Err(err)
            }
        }
    }

    /// Terminate the session.  Pending and later calls fail with
    /// [`Error::Closed`]; repeated calls are no-ops.
    pub async fn close(&self) {
        if self.stream.close().await {
            SESSIONS_CLOSED.click();
            self.logger.info(
                "session closed",
                &[("self_id", &self.self_id), ("team_id", &self.team_id)],
            );
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("self_id", &self.self_id)
            .field("self_name", &self.self_name)
            .field("team_id", &self.team_id)
            .field("team_name", &self.team_name)
            .field("team_domain", &self.team_domain)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Connection for SessionContext {
    async fn send(&self, text: &str) -> Result<()> {
        SessionContext::send(self, text).await.map(|_| ())
    }

    async fn receive(&self) -> Result<InboundMessage> {
        SessionContext::receive(self).await
    }

    async fn close(&self) {
        SessionContext::close(self).await
    }
}
