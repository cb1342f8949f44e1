//! Unique identifiers for Cadence entities.
//!
//! IDs are monotonically assigned by an explicit [`IdAllocator`] so that a
//! channel tag can never collide with another channel in the same graph.
//! Every process that builds the same graph in the same order assigns the
//! same IDs, which is what lets independent processes agree on tags.

use serde::{Deserialize, Serialize};

/// Step identifier - assigned once when the step is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(u64);

impl StepId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step_{}", self.0)
    }
}

/// Transport identifier - one per data port, assigned at step construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransportId(u64);

impl TransportId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The channel tag derived from this ID
    #[must_use]
    pub const fn as_tag(&self) -> Tag {
        Tag(self.0)
    }
}

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tp_{}", self.0)
    }
}

/// Channel tag used to match a send with the corresponding recv.
///
/// A tag is always the source transport's unique ID, so tag reuse across
/// unrelated channels is impossible by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(u64);

impl Tag {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tag_{}", self.0)
    }
}

/// Monotonic allocator for step and transport IDs.
///
/// Construction is single-threaded within a process, so this is a plain
/// counter pair passed into the graph builder, never a global.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_step: u64,
    next_transport: u64,
}

impl IdAllocator {
    /// Create a fresh allocator with both counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next step ID
    pub fn next_step_id(&mut self) -> StepId {
        let id = StepId(self.next_step);
        self.next_step += 1;
        id
    }

    /// Allocate the next transport ID
    pub fn next_transport_id(&mut self) -> TransportId {
        let id = TransportId(self.next_transport);
        self.next_transport += 1;
        id
    }

    /// Number of step IDs handed out so far
    #[must_use]
    pub const fn steps_allocated(&self) -> u64 {
        self.next_step
    }

    /// Number of transport IDs handed out so far
    #[must_use]
    pub const fn transports_allocated(&self) -> u64 {
        self.next_transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_monotonic() {
        let mut ids = IdAllocator::new();
        let a = ids.next_transport_id();
        let b = ids.next_transport_id();
        let c = ids.next_transport_id();

        assert!(a < b);
        assert!(b < c);
        assert_eq!(ids.transports_allocated(), 3);
    }

    #[test]
    fn test_allocator_streams_independent() {
        let mut ids = IdAllocator::new();
        let step = ids.next_step_id();
        let transport = ids.next_transport_id();

        assert_eq!(step.as_u64(), 0);
        assert_eq!(transport.as_u64(), 0);
    }

    #[test]
    fn test_tag_from_transport_id() {
        let id = TransportId::from_raw(7);
        assert_eq!(id.as_tag(), Tag::from_raw(7));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", StepId::from_raw(3)), "step_3");
        assert_eq!(format!("{}", TransportId::from_raw(4)), "tp_4");
        assert_eq!(format!("{}", Tag::from_raw(5)), "tag_5");
    }

    #[test]
    fn test_two_allocators_agree() {
        // Two processes building the same graph in the same order must
        // assign identical IDs.
        let mut left = IdAllocator::new();
        let mut right = IdAllocator::new();

        for _ in 0..10 {
            assert_eq!(left.next_step_id(), right.next_step_id());
            assert_eq!(left.next_transport_id(), right.next_transport_id());
        }
    }
}
