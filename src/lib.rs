//! A streaming client for a chat gateway.
//!
//! Connecting is two steps: an HTTPS handshake that trades a credential for a
//! short-lived stream endpoint, then a WebSocket upgrade against that endpoint.
//! [`ConnectionManager::connect`] runs both and returns a [`SessionContext`]
//! for sending and receiving messages.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alarmie::{Config, ConnectionManager, Logger, NullLogger, credential_from_env};
//!
//! # async fn run() -> alarmie::Result<()> {
//! let logger: Arc<dyn Logger> = Arc::new(NullLogger);
//! let config = Config::default();
//! let manager = ConnectionManager::from_config(&config, logger)?;
//! let session = manager.connect(&credential_from_env()?).await?;
//! session.send("ping").await?;
//! let reply = session.receive().await?;
//! println!("{}", reply.text);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod handshake;
pub mod logger;
pub mod manager;
pub mod memory;
pub mod observability;
pub mod retry;
pub mod session;
pub mod stream;
pub mod types;

// Re-exports
pub use config::{AlarmieArgs, Config, credential_from_env, credential_from_lookup};
pub use error::{Error, Result};
pub use handshake::{Authenticator, DEFAULT_HANDSHAKE_URL, HandshakeClient};
pub use logger::{CapturingLogger, Level, LogfmtLogger, Logger, NullLogger};
pub use manager::{ConnectionManager, ConnectionState};
pub use observability::register_biometrics;
pub use retry::RetryPolicy;
pub use session::{Connection, SessionContext};
pub use stream::{DEFAULT_ORIGIN, Frame, StreamHandle, Upgrader, WebSocketUpgrader};
pub use types::*;
