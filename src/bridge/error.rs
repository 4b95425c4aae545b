//! Bridge error types.

use std::fmt;

use crate::config::ConfigError;
use crate::republish::EncodeError;
use crate::session::SessionError;
use crate::topic::TopicError;
use crate::uplink::DecodeError;

/// Errors surfaced by the bridge.
///
/// Startup errors are fatal; everything raised while handling a single
/// message only drops that message.
#[derive(Debug)]
pub enum BridgeError {
    /// Configuration could not be loaded
    Config(ConfigError),
    /// Upstream broker unreachable or refused the connection
    UpstreamConnect(SessionError),
    /// Upstream subscription refused or lost
    Subscribe(SessionError),
    /// Inbound payload is not a valid uplink
    Decode(DecodeError),
    /// Identifiers cannot form a downstream topic
    Topic(TopicError),
    /// Reading cannot form an outbound document
    Encode(EncodeError),
    /// Downstream broker unreachable or refused the connection
    DownstreamConnect(SessionError),
    /// Downstream broker did not take the publish
    Publish(SessionError),
}

impl BridgeError {
    /// Classify an error from the upstream session
    pub fn from_upstream(e: SessionError) -> Self {
        match e {
            SessionError::Subscribe(_) => BridgeError::Subscribe(e),
            _ => BridgeError::UpstreamConnect(e),
        }
    }

    /// Classify an error from a downstream publish
    pub fn from_publish(e: SessionError) -> Self {
        match e {
            SessionError::Connect(_) | SessionError::Rejected(_) => {
                BridgeError::DownstreamConnect(e)
            }
            _ => BridgeError::Publish(e),
        }
    }

    /// Whether the error must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Config(_) | BridgeError::UpstreamConnect(_) | BridgeError::Subscribe(_)
        )
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Config(e) => write!(f, "configuration: {}", e),
            BridgeError::UpstreamConnect(e) => write!(f, "upstream: {}", e),
            BridgeError::Subscribe(e) => write!(f, "upstream: {}", e),
            BridgeError::Decode(e) => write!(f, "decode: {}", e),
            BridgeError::Topic(e) => write!(f, "topic: {}", e),
            BridgeError::Encode(e) => write!(f, "encode: {}", e),
            BridgeError::DownstreamConnect(e) => write!(f, "downstream: {}", e),
            BridgeError::Publish(e) => write!(f, "downstream: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Config(e) => Some(e),
            BridgeError::UpstreamConnect(e)
            | BridgeError::Subscribe(e)
            | BridgeError::DownstreamConnect(e)
            | BridgeError::Publish(e) => Some(e),
            BridgeError::Decode(e) => Some(e),
            BridgeError::Topic(e) => Some(e),
            BridgeError::Encode(e) => Some(e),
        }
    }
}

impl From<ConfigError> for BridgeError {
    fn from(e: ConfigError) -> Self {
        BridgeError::Config(e)
    }
}

impl From<DecodeError> for BridgeError {
    fn from(e: DecodeError) -> Self {
        BridgeError::Decode(e)
    }
}

impl From<TopicError> for BridgeError {
    fn from(e: TopicError) -> Self {
        BridgeError::Topic(e)
    }
}

impl From<EncodeError> for BridgeError {
    fn from(e: EncodeError) -> Self {
        BridgeError::Encode(e)
    }
}
