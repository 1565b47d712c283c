use thiserror::Error;

use crate::aggregate::SkipReason;

/// Errors that can occur while reading or decoding an uplink
#[derive(Error, Debug)]
pub enum Error {
    /// Payload is not valid base64, or does not match its declared length
    #[error("malformed payload encoding: {0}")]
    MalformedEncoding(String),

    /// A mandatory envelope field is absent
    #[error("missing envelope field: {0}")]
    MissingField(&'static str),

    /// The `time` field could not be parsed as an RFC 3339 timestamp
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// The envelope is not a JSON object of the expected shape
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),

    /// A field declared by the frame layout runs past the end of the buffer
    #[error("truncated frame: {needed} byte(s) at offset {offset}, buffer holds {len}")]
    TruncatedFrame {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// No registered decoder matches the device profile or port
    #[error("no decoder for profile {profile:?} on port {port:?}")]
    UnresolvedDecoder {
        profile: Option<String>,
        port: Option<u8>,
    },
}

impl Error {
    /// Classify this error for the skip report
    pub fn skip_reason(&self) -> SkipReason {
        match self {
            Error::MalformedEncoding(_) | Error::InvalidEnvelope(_) => {
                SkipReason::MalformedEncoding
            }
            Error::MissingField(_) | Error::InvalidTimestamp { .. } => SkipReason::MissingField,
            Error::TruncatedFrame { .. } => SkipReason::TruncatedFrame,
            Error::UnresolvedDecoder { .. } => SkipReason::UnresolvedDecoder,
        }
    }
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;
