//! File-replay backend.
//!
//! Each channel is persisted as one frame log under a base directory, named
//! by its tag. `send` appends a frame; `recv` replays frames in order from
//! its own cursor. A pipeline wired with this backend can be run once to
//! record and run again to replay, and it is the only persistence the
//! engine offers.
//!
//! Frames are `postcard`-encoded and length-prefixed so a log survives
//! byte-for-byte across platforms.

use crate::error::TransportError;
use crate::holder::TransportHolder;
use cadence_core::Tag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// One recorded transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Frame {
    tag: u64,
    payload: Vec<u8>,
}

/// File-replay transport.
#[derive(Debug, Clone)]
pub struct FileTransport {
    base_dir: PathBuf,
    /// Read cursor per tag, private to this instance
    cursors: HashMap<Tag, u64>,
}

impl FileTransport {
    /// Create a transport recording under `base_dir`
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cursors: HashMap::new(),
        }
    }

    fn log_path(&self, tag: Tag) -> PathBuf {
        self.base_dir.join(format!("{}.log", tag))
    }

    fn append_frame(&self, tag: Tag, payload: &[u8]) -> Result<(), TransportError> {
        let frame = Frame {
            tag: tag.as_u64(),
            payload: payload.to_vec(),
        };
        let encoded = postcard::to_stdvec(&frame)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(tag))?;
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
        Ok(())
    }

    fn read_frame(&mut self, tag: Tag) -> Result<Frame, TransportError> {
        let offset = self.cursors.get(&tag).copied().unwrap_or(0);
        let mut file = OpenOptions::new().read(true).open(self.log_path(tag))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut len_bytes = [0u8; 4];
        if file.read_exact(&mut len_bytes).is_err() {
            return Err(TransportError::Exhausted);
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;
        let frame: Frame = postcard::from_bytes(&encoded)?;

        if frame.tag != tag.as_u64() {
            return Err(TransportError::TagMismatch {
                expected: tag,
                actual: Tag::from_raw(frame.tag),
            });
        }

        self.cursors.insert(tag, offset + 4 + len as u64);
        Ok(frame)
    }
}

impl TransportHolder for FileTransport {
    fn make(&self) -> Box<dyn TransportHolder> {
        // Fresh cursors: each channel end replays from the start
        Box::new(Self::new(self.base_dir.clone()))
    }

    fn kind(&self) -> &'static str {
        "file"
    }

    fn send(&mut self, buf: &[u8], _dest_node: u32, tag: Tag) -> bool {
        match self.append_frame(tag, buf) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%tag, %err, "file transport send failed");
                false
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8], _src_node: u32, tag: Tag) -> bool {
        match self.read_frame(tag) {
            Ok(frame) => {
                let n = frame.payload.len().min(buf.len());
                buf[..n].copy_from_slice(&frame.payload[..n]);
                true
            }
            Err(TransportError::Exhausted) => false,
            Err(err) => {
                tracing::warn!(%tag, %err, "file transport recv failed");
                false
            }
        }
    }

    fn is_local_capable(&self) -> bool {
        true
    }
}
