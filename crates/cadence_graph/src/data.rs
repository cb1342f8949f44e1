//! Data ports.
//!
//! A `DataHolder` is one input or output port of a work holder: one packet,
//! one transport endpoint, and the port's identity. The type tag is fixed at
//! construction and must match the connection partner's tag.

use crate::endpoint::Transport;
use crate::packet::DataPacket;
use cadence_core::{CoreError, CoreResult, Cycle, Rate};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// One typed data port.
#[derive(Debug)]
pub struct DataHolder {
    name: String,
    type_tag: String,
    packet: DataPacket,
    transport: Transport,
    read_delay: u64,
    write_delay: u64,
    /// Remaining gated reads to swallow before real I/O starts
    reads_to_skip: u64,
    /// Writes buffered by the write delay, oldest first
    write_queue: VecDeque<Vec<u8>>,
    replay_in: Option<BufReader<File>>,
    replay_out: Option<BufWriter<File>>,
}

impl DataHolder {
    /// Create a port named `name` carrying `size` bytes of `type_tag` data
    #[must_use]
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            packet: DataPacket::new(size),
            transport: Transport::new(),
            read_delay: 0,
            write_delay: 0,
            reads_to_skip: 0,
            write_queue: VecDeque::new(),
            replay_in: None,
            replay_out: None,
        }
    }

    /// Port name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Immutable type tag
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The packet this port carries
    #[must_use]
    pub const fn packet(&self) -> &DataPacket {
        &self.packet
    }

    /// Mutable packet access
    pub fn packet_mut(&mut self) -> &mut DataPacket {
        &mut self.packet
    }

    /// The port's transport endpoint
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Mutable endpoint access
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Channel rate of this port
    #[must_use]
    pub const fn rate(&self) -> Rate {
        self.transport.rate()
    }

    /// Set the channel rate
    pub fn set_rate(&mut self, rate: Rate) {
        self.transport.set_rate(rate);
    }

    /// Buffer the first `cycles` active reads instead of issuing I/O
    pub fn set_read_delay(&mut self, cycles: u64) {
        self.read_delay = cycles;
        self.reads_to_skip = cycles;
    }

    /// Hold each write back `cycles` active cycles before issuing it
    pub fn set_write_delay(&mut self, cycles: u64) {
        self.write_delay = cycles;
    }

    /// Tap every write into a replay log at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn set_replay_output(&mut self, path: impl AsRef<Path>) -> CoreResult<()> {
        let file = File::create(path).map_err(|err| CoreError::Internal {
            message: format!("replay output for port '{}': {}", self.name, err),
        })?;
        self.replay_out = Some(BufWriter::new(file));
        Ok(())
    }

    /// Feed reads from a replay log at `path` instead of the transport
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn set_replay_input(&mut self, path: impl AsRef<Path>) -> CoreResult<()> {
        let file = File::open(path).map_err(|err| CoreError::Internal {
            message: format!("replay input for port '{}': {}", self.name, err),
        })?;
        self.replay_in = Some(BufReader::new(file));
        Ok(())
    }

    /// Structural clone: identity, size, rate and delay configuration, but a
    /// fresh unwired transport and no runtime state.
    #[must_use]
    pub fn make(&self) -> DataHolder {
        let mut clone = DataHolder::new(self.name.clone(), self.type_tag.clone(), self.packet.size());
        clone.transport.set_rate(self.transport.rate());
        clone.read_delay = self.read_delay;
        clone.write_delay = self.write_delay;
        clone.reads_to_skip = self.read_delay;
        clone
    }

    /// Allocate the packet buffer through the transport holder
    pub fn preprocess(&mut self) {
        if !self.packet.is_allocated() {
            let buf = self.transport.allocate(self.packet.size());
            self.packet.attach_buffer(buf);
        }
        self.reads_to_skip = self.read_delay;
        self.write_queue.clear();
    }

    /// Gated read into the packet.
    ///
    /// Returns whether fresh data landed this cycle.
    pub fn read(&mut self, cycle: Cycle) -> bool {
        if !self.transport.active_at(cycle) {
            return false;
        }
        if self.reads_to_skip > 0 {
            self.reads_to_skip -= 1;
            return false;
        }
        if let Some(reader) = self.replay_in.as_mut() {
            return read_replay_frame(reader, self.packet.as_bytes_mut(), &self.name);
        }
        self.transport.read(self.packet.as_bytes_mut(), cycle)
    }

    /// Gated write of the packet.
    ///
    /// Returns whether data actually left this cycle.
    pub fn write(&mut self, cycle: Cycle) -> bool {
        if !self.transport.active_at(cycle) {
            return false;
        }
        if let Some(writer) = self.replay_out.as_mut() {
            write_replay_frame(writer, self.packet.as_bytes(), &self.name);
        }
        if self.write_delay > 0 {
            self.write_queue.push_back(self.packet.as_bytes().to_vec());
            if self.write_queue.len() as u64 > self.write_delay {
                let oldest = self.write_queue.pop_front().expect("queue non-empty");
                return self.transport.write_now(&oldest);
            }
            return false;
        }
        self.transport.write(self.packet.as_bytes(), cycle)
    }

    /// Flush delayed writes and release the packet buffer
    pub fn postprocess(&mut self) {
        while let Some(buffered) = self.write_queue.pop_front() {
            self.transport.write_now(&buffered);
        }
        if let Some(writer) = self.replay_out.as_mut() {
            let _ = writer.flush();
        }
        let buf = self.packet.detach_buffer();
        self.transport.deallocate(buf);
    }
}

fn write_replay_frame(writer: &mut BufWriter<File>, payload: &[u8], port: &str) {
    let header = (payload.len() as u32).to_le_bytes();
    if writer.write_all(&header).is_err() || writer.write_all(payload).is_err() {
        tracing::warn!(port, "replay tap write failed");
    }
}

fn read_replay_frame(reader: &mut BufReader<File>, buf: &mut [u8], port: &str) -> bool {
    let mut header = [0u8; 4];
    if reader.read_exact(&mut header).is_err() {
        tracing::warn!(port, "replay stream exhausted");
        return false;
    }
    let len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    if reader.read_exact(&mut payload).is_err() {
        tracing::warn!(port, "replay stream truncated");
        return false;
    }
    let n = len.min(buf.len());
    buf[..n].copy_from_slice(&payload[..n]);
    true
}
