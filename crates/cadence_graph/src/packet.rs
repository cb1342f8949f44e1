//! The data buffer a port carries.

use cadence_core::{CoreError, CoreResult};
use serde::{Serialize, de::DeserializeOwned};

/// One data buffer descriptor.
///
/// The byte buffer itself is allocated during preprocess, routed through the
/// port's installed transport holder so media that need specially-backed
/// memory get it. Until then the packet only records its size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataPacket {
    size: usize,
    data: Vec<u8>,
}

impl DataPacket {
    /// Create a packet of the given byte size. No memory is allocated yet.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size, data: Vec::new() }
    }

    /// Requested byte size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the buffer has been allocated
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty() || self.size == 0
    }

    /// Install an allocated buffer. Used by the owning port's preprocess.
    pub fn attach_buffer(&mut self, buf: Vec<u8>) {
        self.data = buf;
    }

    /// Take the buffer back for deallocation
    pub fn detach_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Buffer contents
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable buffer contents
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Fill the whole buffer with one byte value
    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Encode a value into the buffer with the canonical encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded value does not fit the buffer.
    pub fn encode<T: Serialize>(&mut self, value: &T) -> CoreResult<()> {
        let written = postcard::to_slice(value, &mut self.data)
            .map_err(|err| CoreError::Internal {
                message: format!("packet encode failed: {}", err),
            })?
            .len();
        // Zero the tail so repeated encodes of shorter values stay canonical
        self.data[written..].fill(0);
        Ok(())
    }

    /// Decode a value from the buffer with the canonical encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer does not hold a valid encoding.
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        postcard::from_bytes(&self.data).map_err(|err| CoreError::Internal {
            message: format!("packet decode failed: {}", err),
        })
    }
}
