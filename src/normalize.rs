//! Normalizer: raw decoder fields to canonical reading values.
//!
//! Each kind has an ordered list of field names it may arrive under. The
//! first present, non-null, well-typed value wins; anything else in the record
//! is dropped. Decoders already emit canonical units, so only the synonyms
//! that carry a different unit are scaled here.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::decoder::RawRecord;
use crate::reading::{ReadingKind, ReadingValue};

/// How a synonym's unit relates to the kind's canonical unit
#[derive(Debug, Clone, Copy)]
enum Scale {
    Same,
    Mul(f64),
    Div(f64),
}

impl Scale {
    fn apply(self, v: f64) -> f64 {
        match self {
            Scale::Same => v,
            Scale::Mul(k) => v * k,
            Scale::Div(k) => v / k,
        }
    }
}

type Synonym = (&'static str, Scale);

fn synonyms(kind: ReadingKind) -> &'static [Synonym] {
    match kind {
        ReadingKind::Distance => &[
            ("distance_mm", Scale::Same),
            ("Dist", Scale::Same),
            ("distance", Scale::Same),
            ("Distance (mm)", Scale::Same),
            ("distance_cm", Scale::Mul(10.0)),
            ("distance_m", Scale::Mul(1000.0)),
        ],
        ReadingKind::Battery => &[
            ("battery_v", Scale::Same),
            ("battery", Scale::Same),
            ("Bat", Scale::Same),
            ("battery_mv", Scale::Div(1000.0)),
        ],
        ReadingKind::BatteryLevel => &[
            ("battery_pct", Scale::Same),
            ("battery_level", Scale::Same),
            ("Battery (%)", Scale::Same),
        ],
        ReadingKind::SoilMoisture => &[("soil_val", Scale::Same), ("soil", Scale::Same)],
        ReadingKind::Temperature => &[("temp", Scale::Same), ("temperature", Scale::Same)],
        ReadingKind::FlowBattery => &[("BAT", Scale::Same)],
        ReadingKind::FlowFirmware => &[("FIRMWARE_VERSION", Scale::Same)],
        ReadingKind::FlowBand => &[("FREQUENCY_BAND", Scale::Same)],
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn convert(kind: ReadingKind, value: &Value, scale: Scale) -> Option<ReadingValue> {
    if kind.is_numeric() {
        numeric(value)
            .filter(|v| v.is_finite())
            .map(|v| ReadingValue::Number(scale.apply(v)))
    } else {
        text(value).map(ReadingValue::Text)
    }
}

/// Pick the canonical value of one kind out of a raw record
pub fn canonical_value(record: &RawRecord, kind: ReadingKind) -> Option<ReadingValue> {
    synonyms(kind).iter().find_map(|(name, scale)| {
        record
            .fields
            .get(*name)
            .and_then(|value| convert(kind, value, *scale))
    })
}

/// Map a raw record onto canonical kinds. Empty when nothing is recognized.
pub fn normalize(record: &RawRecord) -> BTreeMap<ReadingKind, ReadingValue> {
    ReadingKind::ALL
        .iter()
        .filter_map(|&kind| canonical_value(record, kind).map(|value| (kind, value)))
        .collect()
}
