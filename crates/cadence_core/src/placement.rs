//! Step placement on cluster nodes.

use serde::{Deserialize, Serialize};

/// The (machine, process-group) pair a step is assigned to run in.
///
/// Placement defaults to node 0, application 0. One OS process exists per
/// placed pair; everything with the same placement runs sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Placement {
    /// Cluster node number
    pub node: u32,
    /// Application (process group) number on that node
    pub application: u32,
}

impl Placement {
    /// Create a placement
    #[must_use]
    pub const fn new(node: u32, application: u32) -> Self {
        Self { node, application }
    }

    /// Placement on a node in the default application group
    #[must_use]
    pub const fn on_node(node: u32) -> Self {
        Self { node, application: 0 }
    }

    /// Whether two placements share a physical node
    #[must_use]
    pub const fn same_node(&self, other: &Placement) -> bool {
        self.node == other.node
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {} app {}", self.node, self.application)
    }
}
