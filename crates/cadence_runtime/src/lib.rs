//! Cadence Runtime
//!
//! The cycle driver that runs a pipeline in lock-step, and the connection
//! optimizer that swaps channel backends for cheaper same-node ones after
//! the graph is wired.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod optimize;

pub use driver::Runner;
pub use optimize::{optimize_connections_with, simplify_connections};
