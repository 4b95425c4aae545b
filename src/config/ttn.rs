//! Upstream (TTN) Configuration
//!
//! Settings for the TTN handler connection the uplinks are received from.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use super::{require_non_empty, ConfigError};

/// Configuration for the upstream (subscribing) TTN connection
#[derive(Clone, Deserialize)]
pub struct UpstreamBrokerConfig {
    /// Handler domain, e.g. `thethings.network`
    #[serde(rename = "Host")]
    pub host: String,

    /// Handler MQTT port
    #[serde(rename = "Port")]
    pub port: u16,

    /// TTN application ID, used as MQTT username
    #[serde(rename = "AppID")]
    pub app_id: String,

    /// TTN application access key, used as MQTT password
    #[serde(rename = "AppKey")]
    pub app_key: String,

    /// Regional handler prefix, e.g. `eu`
    #[serde(rename = "RegionalHandler", default)]
    pub regional_handler: String,

    /// Subscription topic filter, e.g. `app1/devices/+/up`
    #[serde(rename = "Topic")]
    pub topic: String,

    /// Client ID for the upstream connection
    #[serde(rename = "ClientID")]
    pub client_id: String,

    /// Use a clean session for the upstream connection
    #[serde(rename = "Cleansess", default = "default_true")]
    pub clean_session: bool,

    /// MQTT keep-alive interval
    #[serde(
        rename = "KeepAlive",
        default = "default_keep_alive",
        with = "super::duration"
    )]
    pub keep_alive: Duration,

    /// Maximum interval between reconnect attempts (exponential backoff cap)
    #[serde(
        rename = "MaxReconnectInterval",
        default = "default_max_reconnect_interval",
        with = "super::duration"
    )]
    pub max_reconnect_interval: Duration,

    /// Upper bound on the initial connect + subscribe
    #[serde(
        rename = "ConnectTimeout",
        default = "default_connect_timeout",
        with = "super::duration"
    )]
    pub connect_timeout: Duration,
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_max_reconnect_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for UpstreamBrokerConfig {
    fn default() -> Self {
        Self {
            host: "thethings.network".to_string(),
            port: 1883,
            app_id: String::new(),
            app_key: String::new(),
            regional_handler: String::new(),
            topic: "+/devices/+/up".to_string(),
            client_id: "ttnbridge-upstream".to_string(),
            clean_session: true,
            keep_alive: default_keep_alive(),
            max_reconnect_interval: default_max_reconnect_interval(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

// AppKey is a credential and must never reach the logs.
impl fmt::Debug for UpstreamBrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamBrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .field("regional_handler", &self.regional_handler)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("max_reconnect_interval", &self.max_reconnect_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl UpstreamBrokerConfig {
    /// Host of the regional handler (`{RegionalHandler}.{Host}`)
    pub fn handler_host(&self) -> String {
        if self.regional_handler.is_empty() {
            self.host.clone()
        } else {
            format!("{}.{}", self.regional_handler, self.host)
        }
    }

    /// Broker URL for logging
    pub fn broker_url(&self) -> String {
        format!("tcp://{}:{}", self.handler_host(), self.port)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.host, "Ttn.Host")?;
        require_non_empty(&self.app_id, "Ttn.AppID")?;
        require_non_empty(&self.topic, "Ttn.Topic")?;
        require_non_empty(&self.client_id, "Ttn.ClientID")?;

        if self.port == 0 {
            return Err(ConfigError::Validation("Ttn.Port must not be 0".to_string()));
        }

        if self.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "Ttn.KeepAlive must be at least 1s".to_string(),
            ));
        }

        if self.max_reconnect_interval.is_zero() {
            return Err(ConfigError::Validation(
                "Ttn.MaxReconnectInterval must not be 0".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Ttn.ConnectTimeout must not be 0".to_string(),
            ));
        }

        Ok(())
    }
}
