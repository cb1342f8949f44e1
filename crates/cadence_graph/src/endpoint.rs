//! Per-port communication endpoint.
//!
//! Every data port owns exactly one `Transport`: the port's address on the
//! channel fabric. A transport carries the port's unique ID, the read/write
//! tags that match a send with its recv, the channel rate, and weak
//! relation-only references to the peer port on the other end. It owns one
//! installed transport holder at a time, replaceable from a prototype - that
//! replacement is how the connection optimizer swaps a remote-capable
//! backend for a cheaper same-node one.

use crate::step::StepRep;
use cadence_core::{Cycle, Rate, Tag, TransportId};
use cadence_transport::TransportHolder;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Transfer bookkeeping for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    /// No transfer attempted yet
    #[default]
    Unknown,
    /// Last transfer succeeded
    Clean,
    /// Last transfer failed
    Dirty,
}

/// Relation-only reference to a peer port: the step that owns it and the
/// port index within that step. Never an ownership edge.
#[derive(Debug, Clone)]
pub struct PortRef {
    step: Weak<RefCell<StepRep>>,
    port: usize,
}

impl PortRef {
    /// Create a reference to `port` on `step`
    #[must_use]
    pub fn new(step: &Rc<RefCell<StepRep>>, port: usize) -> Self {
        Self {
            step: Rc::downgrade(step),
            port,
        }
    }

    /// Port index on the peer step
    #[must_use]
    pub const fn port(&self) -> usize {
        self.port
    }

    /// The peer step, if still alive
    #[must_use]
    pub fn step(&self) -> Option<Rc<RefCell<StepRep>>> {
        self.step.upgrade()
    }

    /// Cluster node the peer step is placed on
    #[must_use]
    pub fn node(&self) -> Option<u32> {
        self.step.upgrade().map(|rep| rep.borrow().placement().node)
    }
}

/// Per-port communication endpoint.
pub struct Transport {
    id: Option<TransportId>,
    read_tag: Option<Tag>,
    write_tag: Option<Tag>,
    rate: Rate,
    status: TransferStatus,
    holder: Option<Box<dyn TransportHolder>>,
    /// Peer port feeding this one (set when this port is a target)
    source: Option<PortRef>,
    /// Peer port fed by this one (set when this port is a source)
    target: Option<PortRef>,
}

impl Transport {
    /// Create an unwired endpoint with the default rate
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            read_tag: None,
            write_tag: None,
            rate: Rate::every_cycle(),
            status: TransferStatus::Unknown,
            holder: None,
            source: None,
            target: None,
        }
    }

    /// Globally unique ID, assigned at step construction
    #[must_use]
    pub const fn id(&self) -> Option<TransportId> {
        self.id
    }

    /// Assign the unique ID. Called once by the step builder.
    pub(crate) fn assign_id(&mut self, id: TransportId) {
        debug_assert!(self.id.is_none(), "transport ID assigned twice");
        self.id = Some(id);
    }

    /// Channel rate
    #[must_use]
    pub const fn rate(&self) -> Rate {
        self.rate
    }

    /// Set the channel rate
    pub fn set_rate(&mut self, rate: Rate) {
        self.rate = rate;
    }

    /// Whether the channel moves data on the given cycle
    #[must_use]
    pub const fn active_at(&self, cycle: Cycle) -> bool {
        self.rate.active_at(cycle)
    }

    /// Tag this endpoint reads on
    #[must_use]
    pub const fn read_tag(&self) -> Option<Tag> {
        self.read_tag
    }

    /// Tag this endpoint writes on
    #[must_use]
    pub const fn write_tag(&self) -> Option<Tag> {
        self.write_tag
    }

    pub(crate) fn set_read_tag(&mut self, tag: Tag) {
        self.read_tag = Some(tag);
    }

    pub(crate) fn set_write_tag(&mut self, tag: Tag) {
        self.write_tag = Some(tag);
    }

    /// Transfer status
    #[must_use]
    pub const fn status(&self) -> TransferStatus {
        self.status
    }

    /// Install a fresh holder instance, replacing any current one
    pub fn install_holder(&mut self, holder: Box<dyn TransportHolder>) {
        self.holder = Some(holder);
    }

    /// Whether a holder is installed
    #[must_use]
    pub const fn has_holder(&self) -> bool {
        self.holder.is_some()
    }

    /// Installed backend's type name
    #[must_use]
    pub fn holder_kind(&self) -> Option<&'static str> {
        self.holder.as_deref().map(TransportHolder::kind)
    }

    /// Peer feeding this port
    #[must_use]
    pub const fn source(&self) -> Option<&PortRef> {
        self.source.as_ref()
    }

    /// Peer fed by this port
    #[must_use]
    pub const fn target(&self) -> Option<&PortRef> {
        self.target.as_ref()
    }

    pub(crate) fn set_source(&mut self, peer: PortRef) {
        self.source = Some(peer);
    }

    pub(crate) fn set_target(&mut self, peer: PortRef) {
        self.target = Some(peer);
    }

    /// Allocate a buffer through the installed holder.
    ///
    /// Falls back to the generic allocator when no holder is installed yet.
    pub fn allocate(&mut self, size: usize) -> Vec<u8> {
        match self.holder.as_deref_mut() {
            Some(holder) => holder.allocate(size),
            None => vec![0; size],
        }
    }

    /// Return a buffer to the installed holder
    pub fn deallocate(&mut self, buf: Vec<u8>) {
        match self.holder.as_deref_mut() {
            Some(holder) => holder.deallocate(buf),
            None => drop(buf),
        }
    }

    /// Gated read: a no-op unless the rate gate is open this cycle.
    ///
    /// Returns whether new data landed in `buf`. Delivery failure is soft -
    /// reported and the cycle's data simply not delivered.
    pub fn read(&mut self, buf: &mut [u8], cycle: Cycle) -> bool {
        if !self.rate.active_at(cycle) {
            return false;
        }
        let Some(tag) = self.read_tag else {
            return false;
        };
        let src_node = self.source.as_ref().and_then(PortRef::node).unwrap_or(0);
        let Some(holder) = self.holder.as_deref_mut() else {
            tracing::warn!(%tag, "read on endpoint without a transport holder");
            return false;
        };
        if holder.recv(buf, src_node, tag) {
            self.status = TransferStatus::Clean;
            true
        } else {
            tracing::warn!(%tag, src_node, cycle, "recv failed, cycle data not delivered");
            self.status = TransferStatus::Dirty;
            false
        }
    }

    /// Gated write: a no-op unless the rate gate is open this cycle.
    pub fn write(&mut self, buf: &[u8], cycle: Cycle) -> bool {
        if !self.rate.active_at(cycle) {
            return false;
        }
        self.write_now(buf)
    }

    /// Ungated write, used when flushing delayed writes at postprocess.
    pub fn write_now(&mut self, buf: &[u8]) -> bool {
        let Some(tag) = self.write_tag else {
            return false;
        };
        let dest_node = self.target.as_ref().and_then(PortRef::node).unwrap_or(0);
        let Some(holder) = self.holder.as_deref_mut() else {
            tracing::warn!(%tag, "write on endpoint without a transport holder");
            return false;
        };
        if holder.send(buf, dest_node, tag) {
            self.status = TransferStatus::Clean;
            true
        } else {
            tracing::warn!(%tag, dest_node, "send failed, cycle data not delivered");
            self.status = TransferStatus::Dirty;
            false
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("read_tag", &self.read_tag)
            .field("write_tag", &self.write_tag)
            .field("rate", &self.rate)
            .field("status", &self.status)
            .field("holder", &self.holder_kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_transport::{MemoryExchange, MemoryTransport};

    #[test]
    fn test_new_endpoint_unwired() {
        let t = Transport::new();
        assert!(t.id().is_none());
        assert!(t.read_tag().is_none());
        assert!(t.write_tag().is_none());
        assert_eq!(t.rate(), Rate::every_cycle());
        assert_eq!(t.status(), TransferStatus::Unknown);
        assert!(!t.has_holder());
    }

    #[test]
    fn test_allocate_without_holder_is_generic() {
        let mut t = Transport::new();
        let buf = t.allocate(16);
        assert_eq!(buf.len(), 16);
        t.deallocate(buf);
    }

    #[test]
    fn test_rate_gate_blocks_read() {
        let mut t = Transport::new();
        t.set_rate(Rate::new(10));
        t.set_read_tag(Tag::from_raw(1));
        t.install_holder(Box::new(MemoryTransport::new(MemoryExchange::new())));

        let mut buf = [0u8; 1];
        // Cycle 3 is gated off: no read attempt at all
        assert!(!t.read(&mut buf, 3));
        assert_eq!(t.status(), TransferStatus::Unknown);
    }

    #[test]
    fn test_write_then_read_via_memory() {
        let exchange = MemoryExchange::new();
        let tag = Tag::from_raw(7);

        let mut writer = Transport::new();
        writer.set_write_tag(tag);
        writer.install_holder(Box::new(MemoryTransport::new(exchange.clone())));

        let mut reader = Transport::new();
        reader.set_read_tag(tag);
        reader.install_holder(Box::new(MemoryTransport::new(exchange)));

        assert!(writer.write(b"z", 0));
        assert_eq!(writer.status(), TransferStatus::Clean);

        let mut buf = [0u8; 1];
        assert!(reader.read(&mut buf, 0));
        assert_eq!(&buf, b"z");
        assert_eq!(reader.status(), TransferStatus::Clean);
    }

    #[test]
    fn test_failed_recv_marks_dirty() {
        let mut reader = Transport::new();
        reader.set_read_tag(Tag::from_raw(9));
        reader.install_holder(Box::new(MemoryTransport::new(MemoryExchange::new())));

        let mut buf = [0u8; 1];
        assert!(!reader.read(&mut buf, 0));
        assert_eq!(reader.status(), TransferStatus::Dirty);
    }
}
