//! Cadence Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Identifier allocation and the cycle clock are explicit context objects;
//! nothing in here is process-global.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cycle;
pub mod error;
pub mod id;
pub mod placement;

// Re-exports
pub use cycle::{Cycle, CycleClock, Rate};
pub use error::{CoreError, CoreResult};
pub use id::{IdAllocator, StepId, Tag, TransportId};
pub use placement::Placement;
