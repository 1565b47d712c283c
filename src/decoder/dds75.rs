//! Dragino DDS75-LB ultrasonic distance sensor.
//!
//! Uplinks on port 2, at least 8 bytes. Bit 0x10 of byte 0 selects the
//! frame mode:
//!
//! - Standard: `[0..2]` battery mV (BE, mask 0x3FFF), `[2..4]` distance mm (BE)
//! - Multi-Distance: `[0..2]` battery mV (BE, mask 0x0FFF), then BE distance
//!   samples from offset 8 up to `min(48, len - 4)`; the last 4 bytes are a
//!   trailer and never hold samples.

use tracing::debug;

use super::{Decoder, RawRecord, be_u16};
use crate::envelope::UplinkEnvelope;
use crate::error::{Error, Result};
use crate::reading::FrameMode;

pub const PORT: u8 = 2;
pub const MIN_FRAME_LEN: usize = 8;

const MULTI_DISTANCE_FLAG: u8 = 0x10;
const STANDARD_BATTERY_MASK: u16 = 0x3FFF;
const MULTI_BATTERY_MASK: u16 = 0x0FFF;

// Multi-Distance burst layout, as published in the vendor frame format
const SAMPLES_OFFSET: usize = 8;
const SAMPLES_END_CAP: usize = 48;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct Dds75Lb;

impl Dds75Lb {
    /// Number of samples a Multi-Distance frame of `len` bytes carries
    pub fn sample_count(len: usize) -> usize {
        let end = SAMPLES_END_CAP.min(len.saturating_sub(TRAILER_LEN));
        end.saturating_sub(SAMPLES_OFFSET) / 2
    }

    fn decode_standard(data: &[u8]) -> Result<Vec<RawRecord>> {
        let battery_v = f64::from(be_u16(data, 0)? & STANDARD_BATTERY_MASK) / 1000.0;
        let distance_mm = be_u16(data, 2)?;

        Ok(vec![
            RawRecord::new(FrameMode::Standard)
                .with("battery_v", battery_v)
                .with("distance_mm", distance_mm),
        ])
    }

    fn decode_multi_distance(data: &[u8]) -> Result<Vec<RawRecord>> {
        let battery_v = f64::from(be_u16(data, 0)? & MULTI_BATTERY_MASK) / 1000.0;

        (0..Self::sample_count(data.len()))
            .map(|n| {
                let distance_mm = be_u16(data, SAMPLES_OFFSET + 2 * n)?;
                Ok(RawRecord::new(FrameMode::MultiDistance)
                    .with("battery_v", battery_v)
                    .with("distance_mm", distance_mm))
            })
            .collect()
    }
}

impl Decoder for Dds75Lb {
    fn name(&self) -> &'static str {
        "DDS75-LB"
    }

    fn decode(&self, envelope: &UplinkEnvelope) -> Result<Vec<RawRecord>> {
        let data = envelope.payload();

        // Other ports carry device status / config, not measurements
        if envelope.port != Some(PORT) || data.is_empty() {
            return Ok(Vec::new());
        }
        if data.len() < MIN_FRAME_LEN {
            return Err(Error::TruncatedFrame {
                offset: 0,
                needed: MIN_FRAME_LEN,
                len: data.len(),
            });
        }

        let records = if data[0] & MULTI_DISTANCE_FLAG != 0 {
            Self::decode_multi_distance(data)?
        } else {
            Self::decode_standard(data)?
        };

        debug!(
            decoder = self.name(),
            len = data.len(),
            records = records.len(),
            "Decoded distance frame"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn envelope(port: u8, payload: &[u8]) -> UplinkEnvelope {
        UplinkEnvelope::new(Some(port), payload.to_vec(), Utc::now())
    }

    #[test]
    fn test_standard_frame() {
        // 0x0CE4 = 3300 mV, 0x05F0 = 1520 mm
        let frame = [0x0C, 0xE4, 0x05, 0xF0, 0x00, 0x00, 0x00, 0x01];
        let records = Dds75Lb.decode(&envelope(2, &frame)).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame_mode, Some(FrameMode::Standard));
        assert_eq!(records[0].fields["battery_v"], json!(3.3));
        assert_eq!(records[0].fields["distance_mm"], json!(1520));
    }

    #[test]
    fn test_standard_battery_mask() {
        // Top two bits are status flags and must not leak into the voltage
        let frame = [0xCC, 0xE4, 0x00, 0x00, 0, 0, 0, 0];
        let records = Dds75Lb.decode(&envelope(2, &frame)).unwrap();

        assert_eq!(records[0].fields["battery_v"], json!(3.3));
        // Zero distance is echo loss and is kept
        assert_eq!(records[0].fields["distance_mm"], json!(0));
    }

    #[test]
    fn test_multi_distance_frame() {
        // Flag 0x10 set, battery 0x0CE4 & 0x0FFF = 3300 mV
        let mut frame = vec![0x1C, 0xE4, 0, 0, 0, 0, 0, 0];
        frame.extend_from_slice(&[0x01, 0x00, 0x01, 0x10, 0x01, 0x20]);
        frame.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]); // trailer

        let records = Dds75Lb.decode(&envelope(2, &frame)).unwrap();
        let distances: Vec<_> = records.iter().map(|r| r.fields["distance_mm"].clone()).collect();

        assert_eq!(distances, vec![json!(256), json!(272), json!(288)]);
        assert!(records.iter().all(|r| r.fields["battery_v"] == json!(3.3)));
        assert!(records.iter().all(|r| r.frame_mode == Some(FrameMode::MultiDistance)));
    }

    #[test]
    fn test_multi_distance_sample_count() {
        for len in 8..80 {
            let mut frame = vec![0u8; len];
            frame[0] = 0x10;
            let records = Dds75Lb.decode(&envelope(2, &frame)).unwrap();

            let end = 48.min(len - 4) as isize;
            let expected = ((end - 8) / 2).max(0) as usize;
            assert_eq!(records.len(), expected, "len {len}");
        }
        assert_eq!(Dds75Lb::sample_count(200), 20);
    }

    #[test]
    fn test_odd_region_never_reads_trailer() {
        // len 13: region is 8..9, not enough for a full sample
        let mut frame = vec![0u8; 13];
        frame[0] = 0x10;
        assert!(Dds75Lb.decode(&envelope(2, &frame)).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_port_or_empty() {
        let frame = [0x0C, 0xE4, 0x05, 0xF0, 0, 0, 0, 0];
        assert!(Dds75Lb.decode(&envelope(3, &frame)).unwrap().is_empty());
        assert!(Dds75Lb.decode(&envelope(2, &[])).unwrap().is_empty());
    }

    #[test]
    fn test_short_frame_is_truncated() {
        let err = Dds75Lb.decode(&envelope(2, &[0x0C, 0xE4, 0x05])).unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame { needed: 8, len: 3, .. }));
    }
}
