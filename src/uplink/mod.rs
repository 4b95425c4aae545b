//! Uplink Decoding
//!
//! Decodes the JSON uplink documents published by a TTN handler on
//! `<app_id>/devices/<dev_id>/up` into [`UplinkMessage`].
//!
//! The schema is fixed: unknown keys are ignored, absent or `null` keys take
//! their zero value, and any type mismatch fails the whole decode. Keys are
//! accepted both in the handler's lowercase spelling (`app_id`) and in the
//! capitalised spelling (`App_id`).

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;

#[cfg(test)]
mod tests;

/// Error produced when an inbound payload cannot be decoded
#[derive(Debug)]
pub enum DecodeError {
    /// Malformed JSON or a type mismatch on a known field
    Json(serde_json::Error),
    /// A required identifier is absent or empty
    MissingField(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "invalid uplink JSON: {}", e),
            DecodeError::MissingField(field) => write!(f, "uplink is missing {}", field),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Json(e) => Some(e),
            DecodeError::MissingField(_) => None,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e)
    }
}

/// `null` decodes to the zero value, like an absent key.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One uplink as delivered by the TTN handler
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkMessage {
    #[serde(rename = "app_id", alias = "App_id", default, deserialize_with = "nullable")]
    pub app_id: String,

    #[serde(rename = "dev_id", alias = "Dev_id", default, deserialize_with = "nullable")]
    pub dev_id: String,

    #[serde(
        rename = "hardware_serial",
        alias = "Hardware_serial",
        default,
        deserialize_with = "nullable"
    )]
    pub hardware_serial: String,

    /// LoRaWAN FPort
    #[serde(rename = "port", alias = "Port", default, deserialize_with = "nullable")]
    pub port: u32,

    /// Uplink frame counter
    #[serde(rename = "counter", alias = "Counter", default, deserialize_with = "nullable")]
    pub counter: u32,

    #[serde(rename = "is_retry", alias = "Is_retry", default, deserialize_with = "nullable")]
    pub is_retry: bool,

    /// Base64 frame payload, kept opaque
    #[serde(
        rename = "payload_raw",
        alias = "Payload_raw",
        default,
        deserialize_with = "nullable"
    )]
    pub payload_raw: String,

    /// Fields produced by the application's payload decoder
    #[serde(
        rename = "payload_fields",
        alias = "Payload_fields",
        default,
        deserialize_with = "nullable"
    )]
    pub payload_fields: PayloadFields,

    #[serde(rename = "metadata", alias = "Metadata", default, deserialize_with = "nullable")]
    pub metadata: Metadata,

    /// URL for scheduling a downlink to the device
    #[serde(
        rename = "downlink_url",
        alias = "download_url",
        alias = "Download_url",
        default
    )]
    pub download_url: Option<String>,
}

impl UplinkMessage {
    /// Decode one uplink. Either the full message is produced or an error;
    /// nothing partial is surfaced.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let message: UplinkMessage = serde_json::from_slice(payload)?;

        if message.app_id.is_empty() {
            return Err(DecodeError::MissingField("app_id"));
        }
        if message.dev_id.is_empty() {
            return Err(DecodeError::MissingField("dev_id"));
        }

        Ok(message)
    }

    /// The forwarded reading
    pub fn temperature(&self) -> &Reading {
        &self.payload_fields.temperature
    }
}

/// Decoded application fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayloadFields {
    #[serde(rename = "temperature", alias = "Temperature", default)]
    pub temperature: Reading,
}

/// A scalar reading, kept as the exact text it arrived as
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Reading {
    /// Key absent or `null`
    #[default]
    Absent,
    /// A JSON string; holds the unescaped contents
    Text(String),
    /// A JSON number; holds its literal digits
    Number(String),
}

impl Reading {
    /// Text to insert into the outbound document, if any
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Reading::Absent => None,
            Reading::Text(text) | Reading::Number(text) => Some(text),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw().unwrap_or(""))
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        let text = raw.get();

        match text.as_bytes().first() {
            Some(b'"') => serde_json::from_str(text)
                .map(Reading::Text)
                .map_err(D::Error::custom),
            Some(b'-' | b'0'..=b'9') => Ok(Reading::Number(text.to_string())),
            _ if text == "null" => Ok(Reading::Absent),
            _ => Err(D::Error::custom(format!(
                "expected a string or number reading, found {}",
                text
            ))),
        }
    }
}

/// Network metadata of one uplink
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    /// Server receive time (RFC 3339)
    #[serde(rename = "time", alias = "Time", default, deserialize_with = "nullable")]
    pub time: String,

    /// Frequency in MHz
    #[serde(rename = "frequency", alias = "Frequency", default, deserialize_with = "nullable")]
    pub frequency: f64,

    #[serde(rename = "modulation", alias = "Modulation", default, deserialize_with = "nullable")]
    pub modulation: String,

    #[serde(rename = "data_rate", alias = "Data_rate", default, deserialize_with = "nullable")]
    pub data_rate: String,

    #[serde(
        rename = "coding_rate",
        alias = "Coding_rate",
        default,
        deserialize_with = "nullable"
    )]
    pub coding_rate: String,

    #[serde(rename = "gateways", alias = "Gateways", default, deserialize_with = "nullable")]
    pub gateways: Vec<GatewayReception>,
}

/// One gateway's reception report
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayReception {
    #[serde(rename = "gtw_id", alias = "Gtw_id", default, deserialize_with = "nullable")]
    pub gtw_id: String,

    /// Gateway concentrator timestamp
    #[serde(
        rename = "timestamp",
        alias = "Timestamp",
        alias = "Timestanp",
        default,
        deserialize_with = "nullable"
    )]
    pub timestamp: u64,

    #[serde(rename = "time", alias = "Time", default, deserialize_with = "nullable")]
    pub time: String,

    #[serde(rename = "channel", alias = "Channel", default, deserialize_with = "nullable")]
    pub channel: u32,

    #[serde(rename = "rssi", alias = "Rssi", default, deserialize_with = "nullable")]
    pub rssi: i32,

    #[serde(rename = "snr", alias = "Snr", default, deserialize_with = "nullable")]
    pub snr: f64,

    #[serde(rename = "latitude", alias = "Latitude", default)]
    pub latitude: Option<f64>,

    #[serde(rename = "longitude", alias = "Longitude", default)]
    pub longitude: Option<f64>,

    #[serde(rename = "altitude", alias = "Altitude", default)]
    pub altitude: Option<f64>,
}

impl GatewayReception {
    /// Gateway position, when the gateway reported one
    pub fn location(&self) -> Option<(f64, f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon, self.altitude.unwrap_or(0.0))),
            _ => None,
        }
    }
}
