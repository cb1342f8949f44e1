//! The transport plugin contract.
//!
//! One `TransportHolder` instance serves one end of one channel. A fresh
//! instance is cloned from a prototype at connect time, so a prototype value
//! carries whatever shared state its backend needs (an exchange handle, a
//! file path) into every channel wired with it.

use cadence_core::Tag;

/// Pluggable backend implementing send/recv/allocate for one physical medium.
///
/// Delivery failure is soft: `send` and `recv` return `false` and the engine
/// reports it and moves on - the cycle's data is simply not delivered. A
/// backend may instead block until its peer is ready; the engine makes no
/// ordering guarantee beyond tag matching.
pub trait TransportHolder {
    /// Clone a fresh instance from this prototype
    fn make(&self) -> Box<dyn TransportHolder>;

    /// Backend type name
    fn kind(&self) -> &'static str;

    /// Send one buffer on the channel identified by `tag` toward `dest_node`
    fn send(&mut self, buf: &[u8], dest_node: u32, tag: Tag) -> bool;

    /// Receive one buffer from the channel identified by `tag` at `src_node`.
    ///
    /// On success the backend fills `buf` (up to `buf.len()` bytes).
    fn recv(&mut self, buf: &mut [u8], src_node: u32, tag: Tag) -> bool;

    /// Allocate a buffer suitable for this medium.
    ///
    /// Backends backed by special memory (shared segments) override this;
    /// the default is the generic allocator.
    fn allocate(&mut self, size: usize) -> Vec<u8> {
        vec![0; size]
    }

    /// Return a buffer obtained from [`TransportHolder::allocate`]
    fn deallocate(&mut self, buf: Vec<u8>) {
        drop(buf);
    }

    /// Whether this backend is suitable for same-node communication.
    ///
    /// The connection optimizer only swaps a channel onto a candidate
    /// backend that declares itself local-capable.
    fn is_local_capable(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn TransportHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransportHolder({})", self.kind())
    }
}
