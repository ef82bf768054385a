//! Frame header decoding
//!
//! Only `frame` and `source` are interpreted; `type` and `shape` must be present
//! but are passed through untouched with the rest of the metadata.

use bytes::Bytes;
use contracts::{Frame, DEFAULT_EXPECTED_SOURCE};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{IngestionError, Result};

/// Fields the dispatch core reads from the metadata part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sequence number
    pub seq: u64,
    /// Detector tag
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    frame: Option<u64>,
    source: Option<SourceTag>,
    #[serde(rename = "type")]
    dtype: Option<Value>,
    shape: Option<Value>,
}

/// Detectors may tag frames by name or by numeric id
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceTag {
    Name(String),
    Code(u64),
}

impl SourceTag {
    fn into_name(self) -> String {
        match self {
            Self::Name(name) => name,
            // id 0 is the legacy tag of the default detector
            Self::Code(0) => DEFAULT_EXPECTED_SOURCE.to_string(),
            Self::Code(code) => code.to_string(),
        }
    }
}

/// Decode and check the metadata part
///
/// # Errors
/// - `MalformedMetadata` if the part is not a JSON object
/// - `MissingField` if `frame`, `source`, `type` or `shape` is absent
/// - `UnexpectedSource` if `source` differs from `expected_source`
pub fn decode_header(metadata: &[u8], expected_source: &str) -> Result<FrameHeader> {
    let malformed = |e: serde_json::Error| IngestionError::MalformedMetadata {
        message: e.to_string(),
    };
    // a struct would also accept a positional array
    let object: Map<String, Value> = serde_json::from_slice(metadata).map_err(malformed)?;
    let raw = RawHeader::deserialize(&Value::Object(object)).map_err(malformed)?;

    let seq = raw
        .frame
        .ok_or(IngestionError::MissingField { field: "frame" })?;
    let source = raw
        .source
        .ok_or(IngestionError::MissingField { field: "source" })?
        .into_name();
    if raw.dtype.is_none() {
        return Err(IngestionError::MissingField { field: "type" });
    }
    if raw.shape.is_none() {
        return Err(IngestionError::MissingField { field: "shape" });
    }

    if source != expected_source {
        return Err(IngestionError::UnexpectedSource {
            expected: expected_source.to_string(),
            found: source,
        });
    }

    Ok(FrameHeader { seq, source })
}

/// Build a `Frame` from one upstream multi-part message
pub fn frame_from_parts(parts: Vec<Bytes>, expected_source: &str) -> Result<Frame> {
    let count = parts.len();
    let mut parts = parts.into_iter();
    let (Some(metadata), Some(payload)) = (parts.next(), parts.next()) else {
        return Err(IngestionError::MissingPayload { parts: count });
    };

    let header = decode_header(&metadata, expected_source)?;
    let mut frame = Frame::new(header.seq, metadata, payload);
    frame.trailing.extend(parts);
    Ok(frame)
}
