//! Cadence Transport Backends
//!
//! The plugin contract every physical medium implements, plus the in-tree
//! backends: an in-process copy channel and a file-replay channel. The
//! engine selects a backend per connection from a prototype value and never
//! inspects a backend's internals.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod file;
pub mod holder;
pub mod memory;

pub use error::TransportError;
pub use file::FileTransport;
pub use holder::TransportHolder;
pub use memory::{MemoryExchange, MemoryTransport};
