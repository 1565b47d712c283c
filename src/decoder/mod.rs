//! Payload decoders, one per device family.
//!
//! Every decoder is a pure function of the envelope it is handed: port,
//! payload bytes and the optional server-decoded object. Decoders emit raw
//! field maps; naming and units are reconciled later by the normalizer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::envelope::UplinkEnvelope;
use crate::error::{Error, Result};
use crate::reading::FrameMode;

pub mod dds75;
pub mod em500;
pub mod makerfabs;
pub mod sw3l;

pub use dds75::Dds75Lb;
pub use em500::Em500Udl;
pub use makerfabs::MakerfabsSoil;
pub use sw3l::Sw3l;

/// Fields produced by one decoded record, before normalization
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub frame_mode: Option<FrameMode>,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(frame_mode: FrameMode) -> Self {
        Self {
            frame_mode: Some(frame_mode),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Capability implemented by every device family
pub trait Decoder: Send + Sync + fmt::Debug {
    /// Short, stable name of the device family
    fn name(&self) -> &'static str;

    /// Decode one envelope into zero or more raw records
    fn decode(&self, envelope: &UplinkEnvelope) -> Result<Vec<RawRecord>>;
}

/// Decoders selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderKind {
    Dds75Lb,
    Em500Udl,
    Sw3l,
    MakerfabsSoil,
}

impl DecoderKind {
    pub fn build(self) -> Arc<dyn Decoder> {
        match self {
            DecoderKind::Dds75Lb => Arc::new(Dds75Lb),
            DecoderKind::Em500Udl => Arc::new(Em500Udl),
            DecoderKind::Sw3l => Arc::new(Sw3l),
            DecoderKind::MakerfabsSoil => Arc::new(MakerfabsSoil),
        }
    }
}

// --- Bounds-checked byte access ---

fn take<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(Error::TruncatedFrame {
            offset,
            needed: N,
            len: data.len(),
        })
}

pub(crate) fn u8_at(data: &[u8], offset: usize) -> Result<u8> {
    take::<1>(data, offset).map(|b| b[0])
}

pub(crate) fn be_u16(data: &[u8], offset: usize) -> Result<u16> {
    take(data, offset).map(u16::from_be_bytes)
}

pub(crate) fn be_i16(data: &[u8], offset: usize) -> Result<i16> {
    take(data, offset).map(i16::from_be_bytes)
}

pub(crate) fn le_u16(data: &[u8], offset: usize) -> Result<u16> {
    take(data, offset).map(u16::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_helpers() {
        let data = [0x12, 0x34, 0xFF, 0x38];
        assert_eq!(u8_at(&data, 3).unwrap(), 0x38);
        assert_eq!(be_u16(&data, 0).unwrap(), 0x1234);
        assert_eq!(le_u16(&data, 0).unwrap(), 0x3412);
        assert_eq!(be_i16(&data, 2).unwrap(), -200);
    }

    #[test]
    fn test_out_of_range() {
        let data = [0x01, 0x02];
        assert!(matches!(
            be_u16(&data, 1),
            Err(Error::TruncatedFrame { offset: 1, needed: 2, len: 2 })
        ));
        assert!(u8_at(&data, 2).is_err());
        assert!(le_u16(&data, usize::MAX - 1).is_err());
    }

    #[test]
    fn test_decoder_kind_names() {
        let kind: DecoderKind = serde_json::from_str("\"makerfabs-soil\"").unwrap();
        assert_eq!(kind, DecoderKind::MakerfabsSoil);
        assert_eq!(DecoderKind::Dds75Lb.build().name(), "DDS75-LB");
        assert_eq!(DecoderKind::Em500Udl.build().name(), "EM500-UDL");
    }
}
