//! Downstream Broker Configuration
//!
//! Settings for the broker the derived messages are republished to.

use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;

use super::{require_non_empty, ConfigError};

/// Configuration for the downstream (publishing) broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamBrokerConfig {
    /// Broker host name or address
    #[serde(rename = "Host")]
    pub host: String,

    /// Broker TCP port
    #[serde(rename = "Port")]
    pub port: u16,

    /// Client ID used for every downstream connection
    #[serde(rename = "ClientID")]
    pub client_id: String,

    /// First topic level of every published message
    #[serde(rename = "TopicPrefix", default)]
    pub topic_prefix: String,

    /// Last topic level of every published message
    #[serde(rename = "TopicSuffix", default)]
    pub topic_suffix: String,

    /// QoS level for published messages (0, 1 or 2)
    #[serde(rename = "Qos", default)]
    pub qos: u8,

    /// Use a clean session for downstream connections
    #[serde(rename = "Cleansess", default)]
    pub clean_session: bool,

    /// Retain flag for published messages (defaults to `Cleansess`)
    #[serde(rename = "Retain", default)]
    pub retain: Option<bool>,

    /// Maximum interval between reconnect attempts
    #[serde(
        rename = "ReconnectDelay",
        default = "default_reconnect_delay",
        with = "super::duration"
    )]
    pub reconnect_delay: Duration,

    /// MQTT keep-alive interval
    #[serde(
        rename = "KeepAlive",
        default = "default_keep_alive",
        with = "super::duration"
    )]
    pub keep_alive: Duration,

    /// Upper bound on connect + publish acknowledgement for one message
    #[serde(
        rename = "PublishTimeout",
        default = "default_publish_timeout",
        with = "super::duration"
    )]
    pub publish_timeout: Duration,

    /// Time allowed to flush the DISCONNECT after a publish
    #[serde(
        rename = "DisconnectGrace",
        default = "default_disconnect_grace",
        with = "super::duration"
    )]
    pub disconnect_grace: Duration,
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_disconnect_grace() -> Duration {
    Duration::from_millis(250)
}

impl Default for DownstreamBrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ttnbridge".to_string(),
            topic_prefix: String::new(),
            topic_suffix: String::new(),
            qos: 0,
            clean_session: true,
            retain: None,
            reconnect_delay: default_reconnect_delay(),
            keep_alive: default_keep_alive(),
            publish_timeout: default_publish_timeout(),
            disconnect_grace: default_disconnect_grace(),
        }
    }
}

impl DownstreamBrokerConfig {
    /// Broker URL for logging
    pub fn broker_url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    /// QoS for published messages
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Retain flag for published messages
    pub fn retain(&self) -> bool {
        self.retain.unwrap_or(self.clean_session)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.host, "Broker.Host")?;
        require_non_empty(&self.client_id, "Broker.ClientID")?;

        if self.port == 0 {
            return Err(ConfigError::Validation(
                "Broker.Port must not be 0".to_string(),
            ));
        }

        if self.qos > 2 {
            return Err(ConfigError::Validation(
                "Broker.Qos must be 0, 1, or 2".to_string(),
            ));
        }

        for (key, value) in [
            ("Broker.TopicPrefix", &self.topic_prefix),
            ("Broker.TopicSuffix", &self.topic_suffix),
        ] {
            if value.contains(['+', '#', '\0']) {
                return Err(ConfigError::Validation(format!(
                    "{} must not contain wildcards or NUL: {:?}",
                    key, value
                )));
            }
        }

        if self.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "Broker.KeepAlive must be at least 1s".to_string(),
            ));
        }

        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::Validation(
                "Broker.ReconnectDelay must not be 0".to_string(),
            ));
        }

        if self.publish_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Broker.PublishTimeout must not be 0".to_string(),
            ));
        }

        Ok(())
    }
}
