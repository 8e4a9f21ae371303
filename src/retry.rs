//! Opt-in retry with exponential backoff around [`ConnectionManager::connect`].
//!
//! Every attempt is a full `connect`, so a fresh handshake always precedes a
//! dial; descriptors are never reused across attempts.  Only errors for which
//! [`Error::is_retryable`] holds are retried.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::handshake::Authenticator;
use crate::logger::Logger;
use crate::manager::ConnectionManager;
use crate::observability::{CONNECT_BACKOFF, CONNECT_RETRIES};
use crate::session::SessionContext;
use crate::stream::Upgrader;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// How many times to attempt an operation and how long to wait in between.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts and the default backoff curve.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Sets the first delay and the cap on any delay.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Sets the growth factor between consecutive delays.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(64) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.  `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, logger: &dyn Logger, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }
            let mut delay = self.backoff(attempt);
            if let Some(retry_after) = err.retry_after() {
                delay = delay.max(Duration::from_secs(retry_after));
            }
            CONNECT_RETRIES.click();
            CONNECT_BACKOFF.add(delay.as_secs_f64());
            logger.warn(
                "connect attempt failed; retrying",
                &[
                    ("attempt", &attempt),
                    ("max_attempts", &self.max_attempts),
                    ("delay_ms", &delay.as_millis()),
                    ("error", &err),
                ],
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Connect through `manager`, retrying retryable failures.
    pub async fn connect<A, U>(
        &self,
        manager: &ConnectionManager<A, U>,
        credential: &str,
    ) -> Result<SessionContext>
    where
        A: Authenticator,
        U: Upgrader,
    {
        self.run(manager.logger().as_ref(), move |_| manager.connect(credential))
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
