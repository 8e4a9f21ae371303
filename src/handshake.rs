//! The authenticated request/response exchange that opens a session.
//!
//! [`HandshakeClient`] calls the gateway's connect endpoint with the credential
//! and decodes the answer into a [`HandshakeDescriptor`].  It never retries and
//! never writes the credential to a log line or an error message.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client as ReqwestClient, StatusCode};
use url::Url;

use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::observability::{
    HANDSHAKE_DURATION, HANDSHAKE_ERRORS, HANDSHAKE_REJECTIONS, HANDSHAKE_REQUESTS,
};
use crate::types::{HandshakeDescriptor, HandshakeResponse};

/// The gateway's connect endpoint.
pub const DEFAULT_HANDSHAKE_URL: &str = "https://slack.com/api/rtm.connect";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_PARAM: &str = "token";

/// Anything that can trade a credential for a session descriptor.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Perform one handshake.
    async fn authenticate(&self, credential: &str) -> Result<HandshakeDescriptor>;
}

/// Client for the gateway's connect endpoint.
#[derive(Clone)]
pub struct HandshakeClient {
    client: ReqwestClient,
    endpoint: Url,
    timeout: Duration,
    logger: Arc<dyn Logger>,
}

impl HandshakeClient {
    /// Create a client for the default endpoint.
    pub fn new(logger: Arc<dyn Logger>) -> Result<Self> {
        Self::with_options(None, None, logger)
    }

    /// Create a client with a custom endpoint and request timeout.
    pub fn with_options(
        endpoint: Option<&str>,
        timeout: Option<Duration>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint.unwrap_or(DEFAULT_HANDSHAKE_URL))?;
        if endpoint.query_pairs().any(|(k, _)| k == TOKEN_PARAM) {
            return Err(Error::config(
                "handshake URL must not carry a credential",
                None,
            ));
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::config(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
            logger,
        })
    }

    /// The endpoint handshakes are sent to, without the credential.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request_url(&self, credential: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(TOKEN_PARAM, credential);
        url
    }

    /// Classify a request failure.  The URL is stripped because it carries
    /// the credential.
    fn request_error(&self, err: reqwest::Error) -> Error {
        let err = err.without_url();
        let status_code = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            Error::network(
                format!("handshake timed out after {:?}: {}", self.timeout, err),
                status_code,
                Some(Box::new(err)),
            )
        } else if err.is_connect() {
            Error::network(
                format!("could not reach handshake endpoint: {}", err),
                status_code,
                Some(Box::new(err)),
            )
        } else {
            Error::network(
                format!("handshake request failed: {}", err),
                status_code,
                Some(Box::new(err)),
            )
        }
    }

    async fn exchange(&self, credential: &str) -> Result<HandshakeDescriptor> {
        let response = self
            .client
            .get(self.request_url(credential))
            .header(header::ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|val| val.to_str().ok())
                .and_then(|val| val.parse::<u64>().ok());
            return Err(Error::network(
                format!("handshake returned unexpected status {status}"),
                Some(status.as_u16()),
                None,
            )
            .with_retry_after(retry_after));
        }

        let body = response.bytes().await.map_err(|e| {
            let e = e.without_url();
            Error::protocol(
                format!("could not read handshake response: {}", e),
                Some(Box::new(e)),
            )
        })?;
        let decoded = serde_json::from_slice::<HandshakeResponse>(&body).map_err(|e| {
            Error::protocol(
                format!("handshake response is not a valid descriptor: {}", e),
                Some(Box::new(e)),
            )
        })?;
        decoded.into_descriptor(Instant::now())
    }
}

impl fmt::Debug for HandshakeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Authenticator for HandshakeClient {
    async fn authenticate(&self, credential: &str) -> Result<HandshakeDescriptor> {
        HANDSHAKE_REQUESTS.click();
        let start = Instant::now();
        self.logger
            .debug("handshake started", &[("endpoint", &self.endpoint)]);

        match self.exchange(credential).await {
            Ok(descriptor) => {
                HANDSHAKE_DURATION.add(start.elapsed().as_secs_f64());
                self.logger.debug(
                    "handshake accepted",
                    &[
                        ("self_id", &descriptor.self_id),
                        ("self_name", &descriptor.self_name),
                        ("team_id", &descriptor.team_id),
                        ("team_domain", &descriptor.team_domain),
                        ("team_name", &descriptor.team_name),
                    ],
                );
                Ok(descriptor)
            }
            Err(err) => {
                HANDSHAKE_ERRORS.click();
                if err.is_auth() {
                    HANDSHAKE_REJECTIONS.click();
                }
                self.logger.warn("handshake failed", &[("error", &err)]);
                Err(err)
            }
        }
    }
}
