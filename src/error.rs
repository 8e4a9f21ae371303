//! Error types for Alarmie.
//!
//! Every fallible operation in the crate returns one of these classified
//! errors.  The five connection-lifecycle classes are [`Error::Network`],
//! [`Error::Protocol`], [`Error::Auth`], [`Error::Transport`] and
//! [`Error::Closed`]; [`Error::Config`] and [`Error::Io`] belong to the
//! bootstrap layer.

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

use tokio_tungstenite::tungstenite;

/// The main error type for Alarmie.
#[derive(Clone, Debug)]
pub enum Error {
    /// The handshake request failed at the HTTP level.
    Network {
        /// Human-readable error message.
        message: String,
        /// HTTP status code, when the server answered at all.
        status_code: Option<u16>,
        /// Time to wait before retrying, in seconds.
        retry_after: Option<u64>,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A payload did not have the expected shape.
    Protocol {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The gateway explicitly rejected the credential.
    Auth {
        /// Human-readable error message.
        message: String,
        /// The reason reported by the gateway, if any.
        reason: Option<String>,
    },

    /// Dialing or writing to the stream failed.
    Transport {
        /// Human-readable error message.
        message: String,
        /// HTTP status code of a rejected upgrade.
        status_code: Option<u16>,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The session has already terminated.
    Closed {
        /// Human-readable error message.
        message: String,
    },

    /// Configuration was missing or invalid.
    Config {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },
}

impl Error {
    /// Creates a new network error.
    pub fn network(
        message: impl Into<String>,
        status_code: Option<u16>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Network {
            message: message.into(),
            status_code,
            retry_after: None,
            source: source.map(Arc::from),
        }
    }

    /// Creates a new protocol error.
    pub fn protocol(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Protocol {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new authentication error.
    pub fn auth(message: impl Into<String>, reason: Option<String>) -> Self {
        Error::Auth {
            message: message.into(),
            reason,
        }
    }

    /// Creates a new transport error.
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            message: message.into(),
            status_code: None,
            source: source.map(Arc::from),
        }
    }

    /// Creates a new closed error.
    pub fn closed(message: impl Into<String>) -> Self {
        Error::Closed {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn config(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Config {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Attaches a `Retry-After` hint to a network error.
    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        if let Error::Network { retry_after, .. } = &mut self {
            *retry_after = seconds;
        }
        self
    }

    /// Attaches the HTTP status of a rejected upgrade to a transport error.
    pub fn with_upgrade_status(mut self, status: u16) -> Self {
        if let Error::Transport { status_code, .. } = &mut self {
            *status_code = Some(status);
        }
        self
    }

    /// Returns true if this is a network error.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. })
    }

    /// Returns true if this is a protocol error.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }

    /// Returns true if the credential was rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }

    /// Returns true if this is a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// Returns true if the session was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed { .. })
    }

    /// Returns true if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// Returns true if a fresh connection attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { status_code, .. } => match status_code {
                None => true,
                Some(code) => matches!(code, 408 | 429 | 500..=599),
            },
            Error::Transport { status_code, .. } => match status_code {
                None => true,
                Some(code) => matches!(code, 408 | 429 | 500..=599),
            },
            _ => false,
        }
    }

    /// Returns the HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Network { status_code, .. } => *status_code,
            Error::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Returns the server's `Retry-After` hint in seconds, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::Network { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network {
                message,
                status_code,
                ..
            } => {
                if let Some(status_code) = status_code {
                    write!(f, "Network error: {message} (HTTP {status_code})")
                } else {
                    write!(f, "Network error: {message}")
                }
            }
            Error::Protocol { message, .. } => {
                write!(f, "Protocol error: {message}")
            }
            Error::Auth { message, reason } => {
                if let Some(reason) = reason {
                    write!(f, "Authentication error: {message} ({reason})")
                } else {
                    write!(f, "Authentication error: {message}")
                }
            }
            Error::Transport {
                message,
                status_code,
                ..
            } => {
                if let Some(status_code) = status_code {
                    write!(f, "Transport error: {message} (HTTP {status_code})")
                } else {
                    write!(f, "Transport error: {message}")
                }
            }
            Error::Closed { message } => {
                write!(f, "Session closed: {message}")
            }
            Error::Config { message, .. } => {
                write!(f, "Configuration error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Network { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Protocol { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Transport { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Config { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::protocol(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::config(format!("URL parse error: {err}"), Some(Box::new(err)))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::protocol(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        let upgrade_status = match &err {
            tungstenite::Error::Http(response) => Some(response.status().as_u16()),
            _ => None,
        };
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Error::closed(format!("stream terminated: {err}"))
            }
            other => match upgrade_status {
                Some(status) => {
                    Error::transport("stream upgrade rejected", Some(Box::new(other)))
                        .with_upgrade_status(status)
                }
                None => Error::transport(
                    format!("stream failure: {other}"),
                    Some(Box::new(other)),
                ),
            },
        }
    }
}

/// A specialized Result type for Alarmie operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::network("refused", None, None).is_retryable());
        assert!(Error::network("busy", Some(503), None).is_retryable());
        assert!(Error::network("slow down", Some(429), None).is_retryable());
        assert!(!Error::network("gone", Some(404), None).is_retryable());
        assert!(Error::transport("dial failed", None).is_retryable());
        assert!(
            !Error::transport("forbidden", None)
                .with_upgrade_status(403)
                .is_retryable()
        );
        assert!(!Error::auth("rejected", None).is_retryable());
        assert!(!Error::protocol("bad json", None).is_retryable());
        assert!(!Error::closed("gone").is_retryable());
    }

    #[test]
    fn display_includes_status_and_reason() {
        let err = Error::network("unexpected status", Some(502), None);
        assert_eq!(err.to_string(), "Network error: unexpected status (HTTP 502)");
        let err = Error::auth("handshake rejected", Some("invalid_auth".to_string()));
        assert_eq!(
            err.to_string(),
            "Authentication error: handshake rejected (invalid_auth)"
        );
    }

    #[test]
    fn retry_after_only_applies_to_network_errors() {
        let err = Error::network("slow down", Some(429), None).with_retry_after(Some(7));
        assert_eq!(err.retry_after(), Some(7));
        let err = Error::closed("gone").with_retry_after(Some(7));
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn tungstenite_closed_maps_to_closed() {
        let err: Error = tungstenite::Error::ConnectionClosed.into();
        assert!(err.is_closed());
        let err: Error = tungstenite::Error::AlreadyClosed.into();
        assert!(err.is_closed());
    }

    #[test]
    fn json_errors_are_protocol_errors() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.is_protocol());
    }
}
