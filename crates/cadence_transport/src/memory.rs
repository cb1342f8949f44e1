//! In-process copy backend.
//!
//! Channels are FIFO queues keyed by tag inside a shared [`MemoryExchange`].
//! Both ends of a connection cloned from the same prototype share the
//! exchange, so a send lands in the queue the matching recv pops from.
//! This is the cheapest backend and the one the connection optimizer swaps
//! in for same-node channels.

use crate::holder::TransportHolder;
use cadence_core::Tag;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Shared tag-keyed message queues for in-process channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryExchange {
    queues: Arc<Mutex<HashMap<Tag, VecDeque<Vec<u8>>>>>,
}

impl MemoryExchange {
    /// Create an empty exchange
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a message onto a channel's queue
    pub fn push(&self, tag: Tag, data: Vec<u8>) {
        let mut queues = self.queues.lock().expect("exchange poisoned");
        queues.entry(tag).or_default().push_back(data);
    }

    /// Pop the oldest message from a channel's queue
    pub fn pop(&self, tag: Tag) -> Option<Vec<u8>> {
        let mut queues = self.queues.lock().expect("exchange poisoned");
        queues.get_mut(&tag).and_then(VecDeque::pop_front)
    }

    /// Number of undelivered messages on a channel
    #[must_use]
    pub fn depth(&self, tag: Tag) -> usize {
        let queues = self.queues.lock().expect("exchange poisoned");
        queues.get(&tag).map_or(0, VecDeque::len)
    }
}

/// In-process copy transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    exchange: MemoryExchange,
}

impl MemoryTransport {
    /// Create a transport bound to an exchange
    #[must_use]
    pub fn new(exchange: MemoryExchange) -> Self {
        Self { exchange }
    }

    /// The exchange this transport is bound to
    #[must_use]
    pub fn exchange(&self) -> &MemoryExchange {
        &self.exchange
    }
}

impl TransportHolder for MemoryTransport {
    fn make(&self) -> Box<dyn TransportHolder> {
        Box::new(self.clone())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn send(&mut self, buf: &[u8], _dest_node: u32, tag: Tag) -> bool {
        self.exchange.push(tag, buf.to_vec());
        true
    }

    fn recv(&mut self, buf: &mut [u8], _src_node: u32, tag: Tag) -> bool {
        match self.exchange.pop(tag) {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                true
            }
            None => false,
        }
    }

    fn is_local_capable(&self) -> bool {
        true
    }
}
