//! TTN Bridge - The Things Network uplink to MQTT republisher
//!
//! Subscribes to the uplink feed of a TTN application, extracts the decoded
//! temperature reading of each device message and republishes it as a small
//! JSON document on a per-device topic of another MQTT broker.

pub mod bridge;
pub mod config;
pub mod republish;
pub mod session;
pub mod topic;
pub mod uplink;

pub use bridge::{Bridge, BridgeError, BridgeState, StatsSnapshot};
pub use config::{BridgeConfig, ConfigError, DownstreamBrokerConfig, UpstreamBrokerConfig};
pub use republish::OutboundMessage;
pub use session::{DownstreamSession, MessageSource, Publisher, UpstreamSession};
pub use topic::TopicResolver;
pub use uplink::{Reading, UplinkMessage};
