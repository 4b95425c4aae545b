//! Republish Encoding
//!
//! Builds the minimal document forwarded downstream: one named reading,
//! `{ "<field>" : <value>}`. The reading is inserted with its original text
//! (a string reading `"23.5"` is published as the number `23.5`), so it must
//! itself be a valid JSON value.

use std::fmt;

use bytes::Bytes;
use serde::de::IgnoredAny;

use crate::uplink::{Reading, UplinkMessage};

/// Name of the forwarded reading
pub const TEMPERATURE_FIELD: &str = "Temperature";

/// Error produced when the outbound document cannot be built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The uplink carried no value for the field
    MissingValue(String),
    /// The value would not produce a valid JSON document
    InvalidValue { field: String, value: String },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::MissingValue(field) => write!(f, "uplink has no {} value", field),
            EncodeError::InvalidValue { field, value } => {
                write!(f, "{} value {:?} is not a JSON value", field, value)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Encode `{ "<field>" : <value>}` with the value inserted verbatim
pub fn encode_field(field: &str, reading: &Reading) -> Result<Bytes, EncodeError> {
    let value = reading
        .as_raw()
        .ok_or_else(|| EncodeError::MissingValue(field.to_string()))?;

    if serde_json::from_str::<IgnoredAny>(value).is_err() {
        return Err(EncodeError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    let name = serde_json::to_string(field).unwrap_or_else(|_| format!("\"{}\"", field));

    Ok(Bytes::from(format!("{{ {} : {}}}", name, value)))
}

/// A message ready for the downstream broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target topic
    pub topic: String,
    /// JSON document
    pub payload: Bytes,
}

impl OutboundMessage {
    /// Build the outbound temperature message for an uplink
    pub fn temperature(topic: String, uplink: &UplinkMessage) -> Result<Self, EncodeError> {
        let payload = encode_field(TEMPERATURE_FIELD, uplink.temperature())?;
        Ok(Self { topic, payload })
    }

    /// Payload as text, for logging
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_encode_text_reading_verbatim() {
        let payload = encode_field("Temperature", &Reading::Text("23.5".to_string())).unwrap();
        assert_eq!(&payload[..], br#"{ "Temperature" : 23.5}"#);
    }

    #[test]
    fn test_encode_number_reading_verbatim() {
        let payload = encode_field("Temperature", &Reading::Number("-4.250".to_string())).unwrap();
        assert_eq!(&payload[..], br#"{ "Temperature" : -4.250}"#);
    }

    #[test]
    fn test_encode_quoted_text_reading() {
        let payload = encode_field("Temperature", &Reading::Text("\"warm\"".to_string())).unwrap();
        assert_eq!(&payload[..], br#"{ "Temperature" : "warm"}"#);
    }

    #[test]
    fn test_encode_escapes_field_name() {
        let payload = encode_field("a\"b", &Reading::Number("1".to_string())).unwrap();
        assert_eq!(&payload[..], br#"{ "a\"b" : 1}"#);
    }

    #[test]
    fn test_encode_rejects_missing_value() {
        assert_eq!(
            encode_field("Temperature", &Reading::Absent),
            Err(EncodeError::MissingValue("Temperature".to_string()))
        );
    }

    #[test]
    fn test_encode_rejects_invalid_json_value() {
        for value in ["hot", "", "23.5 C", "{"] {
            let result = encode_field("Temperature", &Reading::Text(value.to_string()));
            assert!(
                matches!(result, Err(EncodeError::InvalidValue { .. })),
                "{:?} should be rejected",
                value
            );
        }
    }

    #[test]
    fn test_outbound_message_from_uplink() {
        let uplink = UplinkMessage::decode(
            br#"{"App_id":"app1","Dev_id":"dev1","Payload_fields":{"Temperature":"23.5"}}"#,
        )
        .unwrap();
        let message = OutboundMessage::temperature("out/app1_dev1/data".to_string(), &uplink).unwrap();

        assert_eq!(message.topic, "out/app1_dev1/data");
        assert_eq!(message.payload_str(), r#"{ "Temperature" : 23.5}"#);
    }

    proptest! {
        #[test]
        fn prop_reading_round_trips_through_document(value in -1.0e6f64..1.0e6) {
            let literal = value.to_string();
            let payload = encode_field("Temperature", &Reading::Text(literal.clone())).unwrap();

            let document: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&payload).unwrap();
            prop_assert_eq!(document.len(), 1);

            let text = std::str::from_utf8(&payload).unwrap();
            let inserted = text
                .strip_prefix(r#"{ "Temperature" : "#)
                .and_then(|rest| rest.strip_suffix('}'))
                .unwrap();
            prop_assert_eq!(inserted, literal.as_str());
        }
    }
}
