//! Initial dial with exponential backoff
//!
//! Only the first connection is retried. Once a session is established a
//! dropped connection ends the client.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::{Error, Result};

/// WebSocket stream produced by [`WsDialer`]
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Retry policy for the initial dial
///
/// The delay after failed attempt `i` (zero-indexed) is `base_delay * 2^i`,
/// with no jitter and no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total dial attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure (doubles each attempt)
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
        }
    }
}

/// Compute the delay after failed attempt `attempt` (zero-indexed)
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
}

/// Opens one connection to the server
#[async_trait]
pub trait Dialer: Send + Sync {
    type Connection: Send;

    async fn dial(&self) -> Result<Self::Connection>;
}

/// Dials a WebSocket URL with `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dialer for WsDialer {
    type Connection = WsStream;

    async fn dial(&self) -> Result<WsStream> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::SessionTerminated(format!("dial {} failed: {e}", self.url)))?;
        Ok(stream)
    }
}

/// Dial until one attempt succeeds or the policy is exhausted
///
/// # Errors
///
/// Returns [`Error::Connect`] carrying the last failure after
/// `max_attempts` failed dials
pub async fn connect_with_retry<D: Dialer>(
    dialer: &D,
    policy: RetryPolicy,
) -> Result<D::Connection> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 0..max_attempts {
        match dialer.dial().await {
            Ok(connection) => {
                tracing::info!(attempt = attempt + 1, "connected to server");
                return Ok(connection);
            }
            Err(e) => {
                last = e.to_string();
                if attempt + 1 < max_attempts {
                    let delay = delay_for_attempt(&policy, attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(Error::Connect {
        attempts: max_attempts,
        last,
    })
}
