//! Cadence Graph Engine
//!
//! Pipeline composition: a [`WorkHolder`] is a unit of computation with a
//! fixed arity of data ports, a [`Step`] places one on a cluster node and
//! wires its ports, and a [`Composite`] nests steps into larger steps.
//! Data moves between ports through per-port [`Transport`] endpoints backed
//! by pluggable transport holders.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod composite;
pub mod data;
pub mod endpoint;
pub mod packet;
pub mod registry;
pub mod step;
pub mod work;

pub use composite::{Composite, CompositeBody};
pub use data::DataHolder;
pub use endpoint::{PortRef, Transport, TransferStatus};
pub use packet::DataPacket;
pub use registry::WorkRegistry;
pub use step::{Step, StepBody, StepRep};
pub use work::{ProcMode, Work, WorkHolder};
