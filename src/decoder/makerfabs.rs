//! Makerfabs LoRaWAN soil moisture sensor.
//!
//! Prefers the server-decoded object when it carries `soil_val`. Otherwise
//! the raw 9-byte frame is parsed by hand:
//!
//! - `[2..4]` soil value, BE u16
//! - `[4]`    battery, tenths of a volt
//! - `[7..9]` temperature, BE i16, tenths of a degree Celsius

use super::{Decoder, RawRecord, be_i16, be_u16, u8_at};
use crate::envelope::UplinkEnvelope;
use crate::error::{Error, Result};
use crate::reading::FrameMode;

pub const FRAME_LEN: usize = 9;

#[derive(Debug, Clone, Copy, Default)]
pub struct MakerfabsSoil;

impl MakerfabsSoil {
    fn decode_bytes(data: &[u8]) -> Result<RawRecord> {
        if data.len() < FRAME_LEN {
            return Err(Error::TruncatedFrame {
                offset: 0,
                needed: FRAME_LEN,
                len: data.len(),
            });
        }

        Ok(RawRecord::new(FrameMode::RawBytes)
            .with("soil_val", be_u16(data, 2)?)
            .with("battery_v", f64::from(u8_at(data, 4)?) / 10.0)
            .with("temp", f64::from(be_i16(data, 7)?) / 10.0))
    }
}

impl Decoder for MakerfabsSoil {
    fn name(&self) -> &'static str {
        "Makerfabs-Soil"
    }

    fn decode(&self, envelope: &UplinkEnvelope) -> Result<Vec<RawRecord>> {
        if let Some(object) = envelope.decoded_object().filter(|o| o.contains_key("soil_val")) {
            return Ok(vec![RawRecord {
                frame_mode: Some(FrameMode::ServerDecoded),
                fields: object.clone(),
            }]);
        }

        let data = envelope.payload();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Self::decode_bytes(data)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn frame(soil: u16, battery_dv: u8, temp_dc: i16) -> Vec<u8> {
        let mut data = vec![0u8; FRAME_LEN];
        data[2..4].copy_from_slice(&soil.to_be_bytes());
        data[4] = battery_dv;
        data[7..9].copy_from_slice(&temp_dc.to_be_bytes());
        data
    }

    #[test]
    fn test_manual_frame() {
        let env = UplinkEnvelope::new(Some(2), frame(612, 36, 235), Utc::now());
        let records = MakerfabsSoil.decode(&env).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame_mode, Some(FrameMode::RawBytes));
        assert_eq!(records[0].fields["soil_val"], json!(612));
        assert_eq!(records[0].fields["battery_v"], json!(3.6));
        assert_eq!(records[0].fields["temp"], json!(23.5));
    }

    #[test]
    fn test_negative_temperature() {
        let env = UplinkEnvelope::new(Some(2), frame(0, 30, -52), Utc::now());
        let records = MakerfabsSoil.decode(&env).unwrap();
        assert_eq!(records[0].fields["temp"], json!(-5.2));
    }

    #[test]
    fn test_prefers_server_object() {
        let env = UplinkEnvelope::new(Some(2), frame(1, 1, 1), Utc::now())
            .with_object(json!({ "soil_val": 700, "battery": 3.4, "temp": 19.0 }));
        let records = MakerfabsSoil.decode(&env).unwrap();

        assert_eq!(records[0].frame_mode, Some(FrameMode::ServerDecoded));
        assert_eq!(records[0].fields["soil_val"], json!(700));
        assert_eq!(records[0].fields["battery"], json!(3.4));
    }

    #[test]
    fn test_object_without_soil_falls_back() {
        let env = UplinkEnvelope::new(Some(2), frame(612, 36, 235), Utc::now())
            .with_object(json!({ "battery": 3.4 }));
        let records = MakerfabsSoil.decode(&env).unwrap();
        assert_eq!(records[0].frame_mode, Some(FrameMode::RawBytes));
    }

    #[test]
    fn test_short_frame() {
        let env = UplinkEnvelope::new(Some(2), vec![0; 8], Utc::now());
        assert!(matches!(
            MakerfabsSoil.decode(&env),
            Err(Error::TruncatedFrame { needed: 9, len: 8, .. })
        ));
    }
}
