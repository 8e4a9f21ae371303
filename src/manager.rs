//! One logical `connect`: handshake, then upgrade, then session.
//!
//! The stream endpoint handed out by the handshake expires quickly, so the
//! upgrade is started as soon as the handshake returns and the dial is bounded
//! by whatever is left of the validity window.  A descriptor that is already
//! expired is never dialed; the handshake is repeated once instead.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handshake::{Authenticator, HandshakeClient};
use crate::logger::Logger;
use crate::observability::{ENDPOINT_EXPIRED, UPGRADE_DURATION, UPGRADE_ERRORS, UPGRADES};
use crate::session::SessionContext;
use crate::stream::{Upgrader, WebSocketUpgrader};
use crate::types::DEFAULT_ENDPOINT_VALIDITY;

/// Handshakes performed per `connect` when descriptors arrive expired.
const MAX_HANDSHAKES: u32 = 2;

/// Lifecycle of one connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No attempt has started.
    Idle,
    /// The handshake request is in flight.
    Authenticating,
    /// The handshake returned a descriptor.
    Authenticated,
    /// The handshake failed; no stream was dialed.
    AuthFailed,
    /// The stream endpoint is being dialed.
    Upgrading,
    /// The dial failed or the endpoint expired.
    UpgradeFailed,
    /// A session is live.
    Connected,
    /// The session was closed by either side.
    Closed,
}

impl ConnectionState {
    /// Returns true for the states an attempt cannot leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::AuthFailed | ConnectionState::UpgradeFailed | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::AuthFailed => "auth_failed",
            ConnectionState::Upgrading => "upgrading",
            ConnectionState::UpgradeFailed => "upgrade_failed",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Orchestrates handshake and upgrade.
pub struct ConnectionManager<A = HandshakeClient, U = WebSocketUpgrader> {
    authenticator: A,
    upgrader: U,
    logger: Arc<dyn Logger>,
    endpoint_validity: Duration,
    default_channel: Option<String>,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager<HandshakeClient, WebSocketUpgrader> {
    /// Build the network-backed manager described by `config`.
    pub fn from_config(config: &Config, logger: Arc<dyn Logger>) -> Result<Self> {
        let authenticator = HandshakeClient::with_options(
            config.handshake_url.as_deref(),
            config.request_timeout(),
            Arc::clone(&logger),
        )?;
        let upgrader = match config.origin.as_deref() {
            Some(origin) => WebSocketUpgrader::with_origin(origin, Arc::clone(&logger))?,
            None => WebSocketUpgrader::new(Arc::clone(&logger)),
        };
        Ok(Self::new(authenticator, upgrader, logger)
            .with_endpoint_validity(config.endpoint_validity())
            .with_default_channel(config.channel.clone()))
    }
}

impl<A: Authenticator, U: Upgrader> ConnectionManager<A, U> {
    /// Create a manager over the given handshake and upgrade seams.
    pub fn new(authenticator: A, upgrader: U, logger: Arc<dyn Logger>) -> Self {
        Self {
            authenticator,
            upgrader,
            logger,
            endpoint_validity: DEFAULT_ENDPOINT_VALIDITY,
            default_channel: None,
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    /// How long a stream endpoint may be dialed after its handshake.
    pub fn with_endpoint_validity(mut self, validity: Duration) -> Self {
        self.endpoint_validity = validity;
        self
    }

    /// Channel that sessions address by default.
    pub fn with_default_channel(mut self, channel: Option<String>) -> Self {
        self.default_channel = channel;
        self
    }

    /// The handshake seam.
    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }

    /// The upgrade seam.
    pub fn upgrader(&self) -> &U {
        &self.upgrader
    }

    /// The logger handed to every session.
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// The window within which a stream endpoint is dialed.
    pub fn endpoint_validity(&self) -> Duration {
        self.endpoint_validity
    }

    /// State reached by the most recent attempt.
    pub fn state(&self) -> ConnectionState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = *state;
        *state = next;
        drop(state);
        self.logger
            .debug("connection state", &[("from", &previous), ("to", &next)]);
    }

    /// Authenticate with `credential` and open a session.
    ///
    /// Nothing is retried: a failed handshake returns before any transport is
    /// opened, and a failed upgrade returns without a session.
    pub async fn connect(&self, credential: &str) -> Result<SessionContext> {
        self.transition(ConnectionState::Idle);
        let mut handshakes = 0;
        let descriptor = loop {
            handshakes += 1;
            self.transition(ConnectionState::Authenticating);
            let descriptor = match self.authenticator.authenticate(credential).await {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    self.transition(ConnectionState::AuthFailed);
                    return Err(err);
                }
            };
            self.transition(ConnectionState::Authenticated);
            if !descriptor.is_expired(self.endpoint_validity) {
                break descriptor;
            }
            ENDPOINT_EXPIRED.click();
            self.logger.warn(
                "stream endpoint expired before dialing",
                &[
                    ("age_ms", &descriptor.age().as_millis()),
                    ("handshakes", &handshakes),
                ],
            );
            if handshakes >= MAX_HANDSHAKES {
                self.transition(ConnectionState::UpgradeFailed);
                return Err(Error::transport(
                    "stream endpoint expired before it could be dialed",
                    None,
                ));
            }
        };

        self.transition(ConnectionState::Upgrading);
        UPGRADES.click();
        let start = Instant::now();
        let remaining = descriptor.remaining(self.endpoint_validity);
        let upgraded = tokio::time::timeout(remaining, self.upgrader.upgrade(&descriptor)).await;
        let stream = match upgraded {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                UPGRADE_ERRORS.click();
                self.transition(ConnectionState::UpgradeFailed);
                self.logger.warn("stream upgrade failed", &[("error", &err)]);
                return Err(err);
            }
            Err(_) => {
                UPGRADE_ERRORS.click();
                ENDPOINT_EXPIRED.click();
                self.transition(ConnectionState::UpgradeFailed);
                let err = Error::transport(
                    format!(
                        "stream endpoint expired while dialing ({:?} window)",
                        self.endpoint_validity
                    ),
                    None,
                );
                self.logger.warn("stream upgrade failed", &[("error", &err)]);
                return Err(err);
            }
        };
        UPGRADE_DURATION.add(start.elapsed().as_secs_f64());

        self.transition(ConnectionState::Connected);
        let session = SessionContext::new(descriptor, stream, Arc::clone(&self.logger))
            .with_default_channel(self.default_channel.clone());
        self.logger.info(
            "session established",
            &[
                ("self_id", &session.self_id()),
                ("self_name", &session.self_name()),
                ("team_domain", &session.team_domain()),
            ],
        );
        Ok(session)
    }
}

impl<A, U> fmt::Debug for ConnectionManager<A, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint_validity", &self.endpoint_validity)
            .field("default_channel", &self.default_channel)
            .finish()
    }
}
