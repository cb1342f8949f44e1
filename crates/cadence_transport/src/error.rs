//! Transport errors.
//!
//! Backends report delivery failure by returning `false` from `send`/`recv`;
//! these error values exist for setup paths (opening replay files, encoding
//! frames) where a descriptive failure is worth surfacing.

use cadence_core::Tag;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Replay file could not be opened
    #[error("Replay file error: {0}")]
    ReplayFile(#[from] std::io::Error),

    /// Frame encoding failed
    #[error("Frame encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    /// Frame carried an unexpected tag
    #[error("Tag mismatch in replay stream: expected {expected}, got {actual}")]
    TagMismatch {
        /// Tag the receiver asked for
        expected: Tag,
        /// Tag found in the stream
        actual: Tag,
    },

    /// Replay stream ended
    #[error("Replay stream exhausted")]
    Exhausted,
}
