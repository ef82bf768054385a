//! Frame - Ingest Loop output
//!
//! One detector frame as it travels from the upstream socket to an output socket.

use bytes::Bytes;

/// Detector frame
///
/// Immutable once ingested. Parts are reference-counted, so handing the same
/// frame to several output queues never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Upstream sequence number (`frame` metadata field)
    pub seq: u64,

    /// JSON metadata part
    pub metadata: Bytes,

    /// Binary payload part
    pub payload: Bytes,

    /// Any further wire parts, forwarded untouched
    pub trailing: Vec<Bytes>,
}

impl Frame {
    /// Create a two-part frame
    pub fn new(seq: u64, metadata: Bytes, payload: Bytes) -> Self {
        Self {
            seq,
            metadata,
            payload,
            trailing: Vec::new(),
        }
    }

    /// Number of wire parts
    pub fn part_count(&self) -> usize {
        2 + self.trailing.len()
    }

    /// Consume the frame, returning its wire parts in order
    pub fn into_parts(self) -> Vec<Bytes> {
        let mut parts = Vec::with_capacity(self.part_count());
        parts.push(self.metadata);
        parts.push(self.payload);
        parts.extend(self.trailing);
        parts
    }

    /// Replace the metadata part, keeping payload and trailing parts untouched
    pub fn with_metadata(self, metadata: Bytes) -> Self {
        Self { metadata, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_metadata_keeps_payload() {
        let frame = Frame::new(
            7,
            Bytes::from_static(b"{}"),
            Bytes::from_static(b"\x01\x02"),
        );
        let rewritten = frame.with_metadata(Bytes::from_static(b"{\"frame\":0}"));

        assert_eq!(rewritten.seq, 7);
        assert_eq!(rewritten.metadata.as_ref(), b"{\"frame\":0}");
        assert_eq!(rewritten.payload.as_ref(), b"\x01\x02");
    }

    #[test]
    fn test_into_parts_order() {
        let mut frame = Frame::new(1, Bytes::from_static(b"m"), Bytes::from_static(b"p"));
        frame.trailing.push(Bytes::from_static(b"t"));

        let parts = frame.into_parts();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].as_ref(), b"m");
        assert_eq!(parts[1].as_ref(), b"p");
        assert_eq!(parts[2].as_ref(), b"t");
    }
}
