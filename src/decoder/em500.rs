//! Milesight EM500-UDL ultrasonic distance sensor.
//!
//! Port 85 payloads are a run of `[channel_id][channel_type][value...]` fields:
//!
//! - `01 75`: battery level, 1 byte, percent
//! - `03 82`: distance, 2 bytes little-endian, millimeters
//!
//! An unknown pair slides the cursor forward by a single byte so a corrupt or
//! unsupported byte cannot desynchronize the fields behind it. A lone byte left
//! at the end cannot hold a channel header, so it is passed over like any other
//! unrecognized byte.
//!
//! A recognized header whose value runs past the end of the buffer fails the
//! whole frame with `TruncatedFrame`, even when earlier fields were complete.

use tracing::debug;

use super::{Decoder, RawRecord, le_u16, u8_at};
use crate::envelope::UplinkEnvelope;
use crate::error::Result;
use crate::reading::FrameMode;

pub const PORT: u8 = 85;

const BATTERY: (u8, u8) = (0x01, 0x75);
const DISTANCE: (u8, u8) = (0x03, 0x82);

#[derive(Debug, Clone, Copy, Default)]
pub struct Em500Udl;

impl Em500Udl {
    /// Walk the channel fields. A declared field cut off by the end of the
    /// buffer is an error.
    fn parse_channels(data: &[u8]) -> Result<RawRecord> {
        let mut record = RawRecord::new(FrameMode::Channel);
        let mut i = 0;

        while i + 1 < data.len() {
            i += match (data[i], data[i + 1]) {
                BATTERY => {
                    record.insert("battery_pct", u8_at(data, i + 2)?);
                    3
                }
                DISTANCE => {
                    record.insert("distance_mm", le_u16(data, i + 2)?);
                    4
                }
                _ => 1, // resync one byte at a time
            };
        }

        Ok(record)
    }
}

impl Decoder for Em500Udl {
    fn name(&self) -> &'static str {
        "EM500-UDL"
    }

    fn decode(&self, envelope: &UplinkEnvelope) -> Result<Vec<RawRecord>> {
        let data = envelope.payload();
        if envelope.port != Some(PORT) || data.is_empty() {
            return Ok(Vec::new());
        }

        let record = Self::parse_channels(data)?;
        debug!(decoder = self.name(), fields = record.fields.len(), "Decoded channel frame");
        if record.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![record])
        }
    }
}
