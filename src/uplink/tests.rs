//! Uplink decoder tests

use proptest::prelude::*;
use test_case::test_case;

use super::*;

const TTN_UPLINK: &str = r#"{
    "app_id": "app1",
    "dev_id": "dev1",
    "hardware_serial": "0102030405060708",
    "port": 1,
    "counter": 42,
    "is_retry": false,
    "payload_raw": "AQIDBA==",
    "payload_fields": { "temperature": "23.5", "humidity": 41 },
    "metadata": {
        "time": "2018-01-04T12:00:00.000000000Z",
        "frequency": 868.1,
        "modulation": "LORA",
        "data_rate": "SF7BW125",
        "coding_rate": "4/5",
        "gateways": [
            {
                "gtw_id": "eui-b827ebfffe000001",
                "timestamp": 2742449276,
                "time": "2018-01-04T12:00:00.000000000Z",
                "channel": 0,
                "rssi": -49,
                "snr": 9.5,
                "latitude": 52.3731,
                "longitude": 4.8922,
                "altitude": 12
            },
            {
                "gtw_id": "eui-b827ebfffe000002",
                "timestamp": 1190212188,
                "time": "",
                "channel": 3,
                "rssi": -112,
                "snr": -4
            }
        ]
    },
    "downlink_url": "https://integrations.thethingsnetwork.org/ttn-eu/api/v2/down/app1/bridge?key=ttn-account-v2.x"
}"#;

#[test]
fn test_decode_full_uplink() {
    let message = UplinkMessage::decode(TTN_UPLINK.as_bytes()).unwrap();

    assert_eq!(message.app_id, "app1");
    assert_eq!(message.dev_id, "dev1");
    assert_eq!(message.hardware_serial, "0102030405060708");
    assert_eq!(message.port, 1);
    assert_eq!(message.counter, 42);
    assert!(!message.is_retry);
    assert_eq!(message.payload_raw, "AQIDBA==");
    assert_eq!(message.temperature(), &Reading::Text("23.5".to_string()));
    assert!(message.download_url.is_some());

    let metadata = &message.metadata;
    assert_eq!(metadata.frequency, 868.1);
    assert_eq!(metadata.modulation, "LORA");
    assert_eq!(metadata.data_rate, "SF7BW125");
    assert_eq!(metadata.coding_rate, "4/5");
    assert_eq!(metadata.gateways.len(), 2);

    let first = &metadata.gateways[0];
    assert_eq!(first.gtw_id, "eui-b827ebfffe000001");
    assert_eq!(first.timestamp, 2742449276);
    assert_eq!(first.rssi, -49);
    assert_eq!(first.snr, 9.5);
    assert_eq!(first.location(), Some((52.3731, 4.8922, 12.0)));

    let second = &metadata.gateways[1];
    assert_eq!(second.channel, 3);
    assert_eq!(second.location(), None);
}

#[test]
fn test_decode_capitalised_keys() {
    let payload = r#"{
        "App_id": "app1",
        "Dev_id": "dev1",
        "Port": 2,
        "Payload_fields": { "Temperature": "23.5" },
        "Metadata": { "Gateways": [ { "Gtw_id": "gw", "Rssi": -80 } ] }
    }"#;

    let message = UplinkMessage::decode(payload.as_bytes()).unwrap();
    assert_eq!(message.app_id, "app1");
    assert_eq!(message.dev_id, "dev1");
    assert_eq!(message.port, 2);
    assert_eq!(message.temperature().as_raw(), Some("23.5"));
    assert_eq!(message.metadata.gateways[0].gtw_id, "gw");
    assert_eq!(message.metadata.gateways[0].rssi, -80);
}

#[test]
fn test_decode_absent_fields_take_zero_values() {
    let message = UplinkMessage::decode(br#"{"app_id":"a","dev_id":"d"}"#).unwrap();

    assert_eq!(message.hardware_serial, "");
    assert_eq!(message.port, 0);
    assert_eq!(message.counter, 0);
    assert!(!message.is_retry);
    assert_eq!(message.temperature(), &Reading::Absent);
    assert!(message.metadata.gateways.is_empty());
    assert!(message.download_url.is_none());
}

#[test]
fn test_decode_null_fields_take_zero_values() {
    let payload = br#"{"app_id":"a","dev_id":"d","payload_fields":null,"metadata":{"gateways":null},"counter":null}"#;
    let message = UplinkMessage::decode(payload).unwrap();

    assert_eq!(message.temperature(), &Reading::Absent);
    assert!(message.metadata.gateways.is_empty());
    assert_eq!(message.counter, 0);
}

#[test]
fn test_decode_numeric_reading_keeps_digits() {
    let payload = br#"{"app_id":"a","dev_id":"d","payload_fields":{"temperature":23.50}}"#;
    let message = UplinkMessage::decode(payload).unwrap();
    assert_eq!(message.temperature(), &Reading::Number("23.50".to_string()));
}

#[test_case(b"not json" ; "not json")]
#[test_case(b"" ; "empty")]
#[test_case(br#"{"app_id":"a","dev_id":"d""# ; "truncated")]
#[test_case(b"42" ; "number document")]
#[test_case(br#"{"app_id":7,"dev_id":"d"}"# ; "numeric app id")]
#[test_case(br#"{"app_id":"a","dev_id":"d","port":"one"}"# ; "string port")]
#[test_case(br#"{"app_id":"a","dev_id":"d","is_retry":"no"}"# ; "string retry flag")]
#[test_case(br#"{"app_id":"a","dev_id":"d","payload_fields":{"temperature":true}}"# ; "boolean reading")]
#[test_case(br#"{"app_id":"a","dev_id":"d","payload_fields":{"temperature":{"c":1}}}"# ; "object reading")]
#[test_case(br#"{"app_id":"a","dev_id":"d","metadata":{"gateways":{}}}"# ; "gateways not a list")]
fn test_decode_rejects_malformed(payload: &[u8]) {
    assert!(matches!(
        UplinkMessage::decode(payload),
        Err(DecodeError::Json(_))
    ));
}

#[test]
fn test_decode_requires_identifiers() {
    assert!(matches!(
        UplinkMessage::decode(br#"{"dev_id":"d"}"#),
        Err(DecodeError::MissingField("app_id"))
    ));
    assert!(matches!(
        UplinkMessage::decode(br#"{"app_id":"a","dev_id":""}"#),
        Err(DecodeError::MissingField("dev_id"))
    ));
}

#[test]
fn test_reading_display() {
    assert_eq!(Reading::Text("21".to_string()).to_string(), "21");
    assert_eq!(Reading::Absent.to_string(), "");
}

proptest! {
    #[test]
    fn prop_numeric_reading_survives_decode(
        int in -1000i64..1000,
        frac in 0u32..10000,
    ) {
        let literal = format!("{}.{}", int, frac);
        let payload = format!(
            r#"{{"app_id":"a","dev_id":"d","payload_fields":{{"temperature":{}}}}}"#,
            literal
        );
        let message = UplinkMessage::decode(payload.as_bytes()).unwrap();
        prop_assert_eq!(message.temperature().as_raw(), Some(literal.as_str()));
    }

    #[test]
    fn prop_text_reading_survives_decode(text in "[0-9.+-]{1,12}") {
        let payload = format!(
            r#"{{"app_id":"a","dev_id":"d","payload_fields":{{"temperature":"{}"}}}}"#,
            text
        );
        let message = UplinkMessage::decode(payload.as_bytes()).unwrap();
        prop_assert_eq!(message.temperature().as_raw(), Some(text.as_str()));
    }
}
