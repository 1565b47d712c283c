//! Canonical reading shape shared by every device family.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a canonical measurement. Every kind has one fixed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReadingKind {
    Distance,
    Battery,
    BatteryLevel,
    SoilMoisture,
    Temperature,
    FlowBattery,
    FlowFirmware,
    FlowBand,
    // Extendable for more sensor types
}

impl ReadingKind {
    pub const ALL: [ReadingKind; 8] = [
        ReadingKind::Distance,
        ReadingKind::Battery,
        ReadingKind::BatteryLevel,
        ReadingKind::SoilMoisture,
        ReadingKind::Temperature,
        ReadingKind::FlowBattery,
        ReadingKind::FlowFirmware,
        ReadingKind::FlowBand,
    ];

    /// Canonical unit of values of this kind
    pub fn unit(&self) -> &'static str {
        match self {
            ReadingKind::Distance => "mm",
            ReadingKind::Battery | ReadingKind::FlowBattery => "V",
            ReadingKind::BatteryLevel => "%",
            ReadingKind::SoilMoisture => "raw",
            ReadingKind::Temperature => "°C",
            ReadingKind::FlowFirmware | ReadingKind::FlowBand => "",
        }
    }

    /// Whether values of this kind are numeric (as opposed to free text)
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ReadingKind::FlowFirmware | ReadingKind::FlowBand)
    }

    /// Column name used by exporters
    pub fn column(&self) -> &'static str {
        match self {
            ReadingKind::Distance => "distance_mm",
            ReadingKind::Battery => "battery_v",
            ReadingKind::BatteryLevel => "battery_pct",
            ReadingKind::SoilMoisture => "soil",
            ReadingKind::Temperature => "temp_c",
            ReadingKind::FlowBattery => "flow_battery_v",
            ReadingKind::FlowFirmware => "firmware",
            ReadingKind::FlowBand => "band",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A unit-converted measurement value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

impl ReadingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(v) => Some(*v),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ReadingValue::Text(s) => Some(s),
            ReadingValue::Number(_) => None,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(v) => write!(f, "{v}"),
            ReadingValue::Text(s) => f.write_str(s),
        }
    }
}

/// Sub-format a record was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// DDS75-LB single distance frame
    Standard,
    /// DDS75-LB burst of up to 20 distance samples
    MultiDistance,
    /// Milesight channel-id/channel-type tagged fields
    Channel,
    /// Fields taken from the network server's decoded `object`
    ServerDecoded,
    /// Fields parsed by hand from the raw payload bytes
    RawBytes,
}

/// One normalized record: a set of kind-tagged values sharing a timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub decoder: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_mode: Option<FrameMode>,
    pub values: BTreeMap<ReadingKind, ReadingValue>,
}

impl Reading {
    pub fn get(&self, kind: ReadingKind) -> Option<&ReadingValue> {
        self.values.get(&kind)
    }

    pub fn number(&self, kind: ReadingKind) -> Option<f64> {
        self.get(kind).and_then(ReadingValue::as_f64)
    }

    pub fn distance(&self) -> Option<f64> {
        self.number(ReadingKind::Distance)
    }

    pub fn battery(&self) -> Option<f64> {
        self.number(ReadingKind::Battery)
    }

    /// A distance of exactly zero means the ultrasonic echo was lost
    pub fn echo_lost(&self) -> bool {
        self.distance() == Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(values: &[(ReadingKind, ReadingValue)]) -> Reading {
        Reading {
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
            device: None,
            decoder: "test",
            frame_mode: None,
            values: values.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_echo_lost() {
        let lost = reading(&[(ReadingKind::Distance, ReadingValue::Number(0.0))]);
        assert!(lost.echo_lost());

        let ok = reading(&[(ReadingKind::Distance, ReadingValue::Number(1520.0))]);
        assert!(!ok.echo_lost());

        let none = reading(&[(ReadingKind::Battery, ReadingValue::Number(3.3))]);
        assert!(!none.echo_lost());
    }

    #[test]
    fn test_serialize_values_as_map() {
        let r = reading(&[
            (ReadingKind::Battery, ReadingValue::Number(3.5)),
            (ReadingKind::FlowBand, ReadingValue::Text("US915".into())),
        ]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["values"]["battery"], 3.5);
        assert_eq!(json["values"]["flow_band"], "US915");
        assert!(json.get("device").is_none());
    }

    #[test]
    fn test_units() {
        assert_eq!(ReadingKind::Distance.unit(), "mm");
        assert_eq!(ReadingKind::Battery.unit(), "V");
        assert_eq!(ReadingKind::Temperature.unit(), "°C");
        assert!(!ReadingKind::FlowFirmware.is_numeric());
    }
}
