//! LoRaWAN uplink ingestion
//!
//! Turns network-server uplink envelopes into one normalized, time-ordered
//! series of sensor readings:
//!
//! envelope → registry → decoder → normalizer → aggregator → series

pub mod aggregate;
pub mod config;
pub mod decoder;
pub mod envelope;
pub mod error;
pub mod normalize;
pub mod reading;
pub mod registry;

pub use aggregate::{Aggregator, IngestOutcome, ReadingSeries, SkipReason, SkipReport};
pub use config::Config;
pub use decoder::{Decoder, DecoderKind, RawRecord};
pub use envelope::UplinkEnvelope;
pub use error::{Error, Result};
pub use reading::{FrameMode, Reading, ReadingKind, ReadingValue};
pub use registry::{ProfileMatch, Registry};
