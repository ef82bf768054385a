//! Writer-mode metadata stamping
//!
//! A file writer downstream expects a dense image index and run bookkeeping
//! fields instead of the detector's own counter. The stamp keeps its own index
//! of delivered frames and rewrites the metadata part of each one. The index
//! moves only through [`WriterStamp::commit`], called once the send succeeded,
//! so a failed send never leaves a gap.

use bytes::Bytes;
use contracts::{ContractError, Frame, WriterConfig};
use serde_json::{json, Map, Value};

/// `status` of every frame but the last
pub const STATUS_WRITING: &str = "writing";

/// `status` of frame `n_images - 1`
pub const STATUS_FINISHED: &str = "finished";

/// Per-run writer metadata rewriter
#[derive(Debug, Clone)]
pub struct WriterStamp {
    config: WriterConfig,
    next_index: u64,
}

impl WriterStamp {
    pub fn new(config: WriterConfig) -> Self {
        Self {
            config,
            next_index: 0,
        }
    }

    /// Index the next stamped frame will carry
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Whether `n_images` frames have already been delivered
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.config.n_images
    }

    /// Rewrite `frame` for the writer with the next index
    ///
    /// Returns `Ok(None)` once the run is complete. Stamping again without a
    /// `commit` reuses the same index.
    pub fn stamp(&self, frame: Frame) -> Result<Option<Frame>, ContractError> {
        if self.is_complete() {
            return Ok(None);
        }

        let mut metadata: Map<String, Value> = serde_json::from_slice(&frame.metadata)
            .map_err(|e| ContractError::metadata(format!("not a JSON object: {e}")))?;

        let index = self.next_index;
        let status = if index + 1 == self.config.n_images {
            STATUS_FINISHED
        } else {
            STATUS_WRITING
        };

        metadata.insert("frame".into(), json!(index));
        metadata.insert("i_image".into(), json!(index));
        metadata.insert("output_file".into(), json!(self.config.output_file));
        metadata.insert("run_id".into(), json!(self.config.run_id));
        metadata.insert("detector_name".into(), json!(self.config.detector_name));
        metadata.insert("n_images".into(), json!(self.config.n_images));
        metadata.insert("status".into(), json!(status));

        let attributes = metadata
            .entry("image_attributes")
            .or_insert_with(|| Value::Object(Map::new()));
        match attributes {
            Value::Object(attributes) => {
                attributes.insert("image_number".into(), json!(index));
            }
            other => *other = json!({ "image_number": index }),
        }

        let encoded =
            serde_json::to_vec(&metadata).map_err(|e| ContractError::metadata(e.to_string()))?;
        Ok(Some(frame.with_metadata(Bytes::from(encoded))))
    }

    /// Record that the last stamped frame reached the writer
    pub fn commit(&mut self) {
        if !self.is_complete() {
            self.next_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_config(n_images: u64) -> WriterConfig {
        WriterConfig {
            output_file: "/data/run_0001.h5".to_string(),
            run_id: 1,
            detector_name: "gigafrost".to_string(),
            n_images,
        }
    }

    fn frame(seq: u64) -> Frame {
        let metadata = format!(
            r#"{{"frame": {seq}, "source": "gigafrost", "type": "uint16", "shape": [2, 2], "image_attributes": {{"exposure": 0.5}}}}"#
        );
        Frame::new(seq, Bytes::from(metadata), Bytes::from_static(b"\x01\x02\x03\x04"))
    }

    fn metadata_of(frame: &Frame) -> Value {
        serde_json::from_slice(&frame.metadata).unwrap()
    }

    #[test]
    fn test_stamp_rewrites_counters() {
        let mut stamp = WriterStamp::new(writer_config(3));

        let first = stamp.stamp(frame(1000)).unwrap().unwrap();
        stamp.commit();
        let meta = metadata_of(&first);
        assert_eq!(meta["frame"], 0);
        assert_eq!(meta["i_image"], 0);
        assert_eq!(meta["image_attributes"]["image_number"], 0);
        assert_eq!(meta["image_attributes"]["exposure"], 0.5);
        assert_eq!(meta["output_file"], "/data/run_0001.h5");
        assert_eq!(meta["run_id"], 1);
        assert_eq!(meta["detector_name"], "gigafrost");
        assert_eq!(meta["n_images"], 3);
        assert_eq!(meta["status"], STATUS_WRITING);
        // untouched fields and payload
        assert_eq!(meta["shape"], json!([2, 2]));
        assert_eq!(first.payload.as_ref(), b"\x01\x02\x03\x04");
        assert_eq!(first.seq, 1000);
    }

    #[test]
    fn test_last_frame_finished_then_discard() {
        let mut stamp = WriterStamp::new(writer_config(2));

        let statuses: Vec<Value> = (0..2)
            .map(|seq| {
                let meta = metadata_of(&stamp.stamp(frame(seq)).unwrap().unwrap());
                stamp.commit();
                meta["status"].clone()
            })
            .collect();
        assert_eq!(statuses, vec![json!(STATUS_WRITING), json!(STATUS_FINISHED)]);

        assert!(stamp.is_complete());
        assert!(stamp.stamp(frame(2)).unwrap().is_none());
    }

    #[test]
    fn test_single_image_run_is_finished() {
        let stamp = WriterStamp::new(writer_config(1));
        let meta = metadata_of(&stamp.stamp(frame(7)).unwrap().unwrap());
        assert_eq!(meta["status"], STATUS_FINISHED);
    }

    #[test]
    fn test_image_attributes_created() {
        let stamp = WriterStamp::new(writer_config(5));
        let bare = Frame::new(3, Bytes::from_static(br#"{"frame": 3}"#), Bytes::new());

        let meta = metadata_of(&stamp.stamp(bare).unwrap().unwrap());
        assert_eq!(meta["image_attributes"], json!({ "image_number": 0 }));
    }

    #[test]
    fn test_bad_metadata_keeps_index() {
        let stamp = WriterStamp::new(writer_config(5));
        let bad = Frame::new(3, Bytes::from_static(b"[1, 2]"), Bytes::new());

        assert!(stamp.stamp(bad).is_err());
        assert_eq!(stamp.next_index(), 0);
    }

    #[test]
    fn test_uncommitted_stamp_reuses_index() {
        let mut stamp = WriterStamp::new(writer_config(2));

        // first attempt never reached the writer
        let _ = stamp.stamp(frame(10)).unwrap().unwrap();
        let retried = metadata_of(&stamp.stamp(frame(11)).unwrap().unwrap());
        assert_eq!(retried["i_image"], 0);
        assert_eq!(retried["status"], STATUS_WRITING);
        assert!(!stamp.is_complete());

        stamp.commit();
        let last = metadata_of(&stamp.stamp(frame(12)).unwrap().unwrap());
        assert_eq!(last["i_image"], 1);
        assert_eq!(last["status"], STATUS_FINISHED);
        stamp.commit();

        assert!(stamp.is_complete());
        stamp.commit();
        assert_eq!(stamp.next_index(), 2);
    }
}
