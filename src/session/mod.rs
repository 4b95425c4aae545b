//! Broker Sessions
//!
//! The bridge talks to two independent brokers:
//! - [`UpstreamSession`]: one long-lived subscription on the TTN handler,
//!   reconnecting with exponential backoff and re-subscribing when a
//!   reconnect lands on a fresh session.
//! - [`DownstreamSession`]: connects, publishes one message, waits for the
//!   acknowledgement matching the configured QoS and disconnects again.
//!
//! The orchestrator only sees the [`MessageSource`] and [`Publisher`]
//! traits, so either side can be replaced in tests.

mod downstream;
mod upstream;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::republish::OutboundMessage;

pub use downstream::DownstreamSession;
pub use upstream::UpstreamSession;

/// Error type for broker session operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Broker unreachable or connection dropped
    Connect(String),
    /// Broker refused the connection (CONNACK return code)
    Rejected(String),
    /// Subscription request failed or was refused
    Subscribe(String),
    /// Publish request could not be handed to the connection
    Publish(String),
    /// The publish acknowledgement did not arrive in time
    Timeout(&'static str),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(msg) => write!(f, "Connection failed: {}", msg),
            SessionError::Rejected(msg) => write!(f, "Connection rejected: {}", msg),
            SessionError::Subscribe(msg) => write!(f, "Subscribe failed: {}", msg),
            SessionError::Publish(msg) => write!(f, "Publish failed: {}", msg),
            SessionError::Timeout(stage) => write!(f, "Timed out waiting for {}", stage),
        }
    }
}

impl std::error::Error for SessionError {}

/// A message delivered by the upstream broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Source of inbound uplinks
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message.
    ///
    /// `Ok(None)` means the source is closed; an error means the
    /// subscription is lost for good.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, SessionError>;

    /// Release the connection
    async fn close(&mut self);
}

/// Sink for derived messages
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message. Returns only once the broker has acknowledged
    /// it according to the configured QoS.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), SessionError>;
}
