//! Frame reader: turns a network-server uplink JSON object into an envelope.
//!
//! Accepts the ChirpStack v4 event shape (`fPort`, `data`, `time`,
//! `deviceInfo`, `object`, `fCnt`). `port` is accepted in place of `fPort`; when
//! both are present `fPort` wins.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// One received transmission
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkEnvelope {
    pub port: Option<u8>,
    payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub device_profile: Option<String>,
    pub dev_eui: Option<String>,
    pub f_cnt: Option<u32>,
    /// Payload already decoded by the network server, if any
    pub object: Option<Value>,
}

// --- Wire shape ---
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    f_port: Option<u8>,
    port: Option<u8>,
    data: Option<String>,
    time: Option<String>,
    device_info: Option<RawDeviceInfo>,
    f_cnt: Option<u32>,
    object: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeviceInfo {
    device_profile_name: Option<String>,
    dev_eui: Option<String>,
}

impl UplinkEnvelope {
    pub fn new(port: Option<u8>, payload: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            port,
            payload,
            timestamp,
            device_profile: None,
            dev_eui: None,
            f_cnt: None,
            object: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.device_profile = Some(profile.into());
        self
    }

    pub fn with_object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_dev_eui(mut self, dev_eui: impl Into<String>) -> Self {
        self.dev_eui = Some(dev_eui.into());
        self
    }

    /// Raw application payload; immutable once the envelope exists
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Server-decoded object, treating `null` and `{}` as absent
    pub fn decoded_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.object
            .as_ref()
            .and_then(Value::as_object)
            .filter(|obj| !obj.is_empty())
    }

    /// True when there is nothing for any decoder to look at
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.decoded_object().is_none()
    }

    /// Build an envelope from one JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_value(value)?;
        Self::try_from(raw)
    }

    /// Build an envelope from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawEnvelope> for UplinkEnvelope {
    type Error = Error;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        let time = raw.time.ok_or(Error::MissingField("time"))?;
        let timestamp = parse_timestamp(&time)?;

        // Missing or empty data is a frame with no readings, not an error
        let payload = match raw.data.as_deref() {
            Some(data) if !data.is_empty() => decode_payload(data, None)?,
            _ => Vec::new(),
        };

        let (device_profile, dev_eui) = match raw.device_info {
            Some(info) => (info.device_profile_name, info.dev_eui),
            None => (None, None),
        };

        Ok(Self {
            port: raw.f_port.or(raw.port),
            payload,
            timestamp,
            device_profile,
            dev_eui,
            f_cnt: raw.f_cnt,
            object: raw.object,
        })
    }
}

/// Decode a base64 transport string, checking it against a declared length
pub fn decode_payload(data: &str, declared_len: Option<usize>) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::MalformedEncoding(e.to_string()))?;

    if let Some(expected) = declared_len {
        if bytes.len() != expected {
            return Err(Error::MalformedEncoding(format!(
                "declared {expected} byte(s), decoded {}",
                bytes.len()
            )));
        }
    }

    Ok(bytes)
}

/// Layouts tried when a timestamp carries no offset; those are taken as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO 8601 timestamp and normalize it to UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let rfc3339 = match DateTime::parse_from_rfc3339(value) {
        Ok(t) => return Ok(t.with_timezone(&Utc)),
        Err(e) => e,
    };

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|t| t.and_utc())
        .ok_or_else(|| Error::InvalidTimestamp {
            value: value.to_string(),
            source: rfc3339,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("AQID", None).unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_payload("AQID", Some(3)).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            decode_payload("AQID", Some(4)),
            Err(Error::MalformedEncoding(_))
        ));
        assert!(matches!(
            decode_payload("not base64!", None),
            Err(Error::MalformedEncoding(_))
        ));
    }

    #[test]
    fn test_from_json_chirpstack_shape() {
        let env = UplinkEnvelope::from_json(json!({
            "time": "2024-05-01T12:00:00.5+02:00",
            "fPort": 85,
            "fCnt": 17,
            "data": "AXVk",
            "deviceInfo": {
                "deviceProfileName": "EM500-UDL",
                "devEui": "24e124713d392240"
            }
        }))
        .unwrap();

        assert_eq!(env.port, Some(85));
        assert_eq!(env.payload(), &[0x01, 0x75, 0x64]);
        assert_eq!(env.device_profile.as_deref(), Some("EM500-UDL"));
        assert_eq!(env.dev_eui.as_deref(), Some("24e124713d392240"));
        assert_eq!(env.f_cnt, Some(17));
        assert_eq!(env.timestamp.to_rfc3339(), "2024-05-01T10:00:00.500+00:00");
    }

    #[test]
    fn test_port_alias() {
        let env = UplinkEnvelope::from_json(json!({
            "time": "2024-05-01T12:00:00Z",
            "port": 2
        }))
        .unwrap();
        assert_eq!(env.port, Some(2));
    }

    #[test]
    fn test_fport_and_port_together() {
        let env = UplinkEnvelope::from_json(json!({
            "time": "2024-05-01T12:00:00Z",
            "fPort": 2,
            "port": 85
        }))
        .unwrap();
        assert_eq!(env.port, Some(2));
    }

    #[test]
    fn test_timestamp_without_offset_is_utc() {
        let expected = "2024-05-01T10:00:00+00:00";
        for value in ["2024-05-01T10:00:00", "2024-05-01 10:00:00", "2024-05-01T10:00:00.000"] {
            assert_eq!(parse_timestamp(value).unwrap().to_rfc3339(), expected, "{value}");
        }

        let env = UplinkEnvelope::from_json(json!({
            "time": "2024-05-01T10:00:00",
            "fPort": 2,
            "data": "DOQF8AAAAAA="
        }))
        .unwrap();
        assert_eq!(env.timestamp.to_rfc3339(), expected);
        assert_eq!(env.payload().len(), 8);
    }

    #[test]
    fn test_missing_time() {
        let err = UplinkEnvelope::from_json(json!({ "fPort": 2, "data": "AQID" })).unwrap_err();
        assert!(matches!(err, Error::MissingField("time")));
    }

    #[test]
    fn test_invalid_time() {
        let err = UplinkEnvelope::from_json(json!({ "time": "yesterday" })).unwrap_err();
        assert!(matches!(err, Error::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_empty_data_is_not_an_error() {
        for data in [json!(null), json!("")] {
            let env = UplinkEnvelope::from_json(json!({
                "time": "2024-05-01T12:00:00Z",
                "fPort": 2,
                "data": data
            }))
            .unwrap();
            assert!(env.payload().is_empty());
            assert!(env.is_empty());
        }
    }

    #[test]
    fn test_empty_object_counts_as_absent() {
        let env = UplinkEnvelope::new(None, Vec::new(), Utc::now()).with_object(json!({}));
        assert!(env.decoded_object().is_none());
        assert!(env.is_empty());
    }

    #[test]
    fn test_not_an_object() {
        assert!(matches!(
            UplinkEnvelope::from_json_str("[1, 2, 3]"),
            Err(Error::InvalidEnvelope(_))
        ));
    }
}
