//! Dragino SW3L flow sensor.
//!
//! The network server already runs the vendor codec, so this decoder only
//! selects the status fields from the decoded `object`.

use super::{Decoder, RawRecord};
use crate::envelope::UplinkEnvelope;
use crate::error::Result;
use crate::reading::FrameMode;

const FIELDS: [&str; 3] = ["BAT", "FIRMWARE_VERSION", "FREQUENCY_BAND"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Sw3l;

impl Decoder for Sw3l {
    fn name(&self) -> &'static str {
        "SW3L"
    }

    fn decode(&self, envelope: &UplinkEnvelope) -> Result<Vec<RawRecord>> {
        let Some(object) = envelope.decoded_object() else {
            return Ok(Vec::new());
        };

        let mut record = RawRecord::new(FrameMode::ServerDecoded);
        for name in FIELDS {
            if let Some(value) = object.get(name).filter(|v| !v.is_null()) {
                record.insert(name, value.clone());
            }
        }

        if record.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![record])
        }
    }
}
