//! Units of work.
//!
//! A [`Work`] payload is the actual computation; a [`WorkHolder`] wraps one
//! payload together with its fixed set of input and output ports and drives
//! the read-process-write pass each cycle. Port counts are set once at
//! construction and never resized.

use crate::data::DataHolder;
use cadence_core::{CoreError, CoreResult, Cycle};
use indexmap::IndexMap;

/// Selects real computation or synthetic output for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcMode {
    /// Invoke the payload
    #[default]
    Process,
    /// Fill all outputs with zeroes without invoking the payload
    Zeroes,
    /// Fill all outputs with ones without invoking the payload
    Ones,
}

/// A computation payload.
pub trait Work {
    /// Payload type tag
    fn kind(&self) -> &str;

    /// Factory clone used when a composite template is instantiated more
    /// than once. Copies structure, never runtime state.
    fn make(&self) -> Box<dyn Work>;

    /// Transform the input packets into the output packets for one cycle.
    ///
    /// # Errors
    ///
    /// Returns an error on unrecoverable payload failure.
    fn process(
        &mut self,
        cycle: Cycle,
        inputs: &[DataHolder],
        outputs: &mut [DataHolder],
    ) -> CoreResult<()>;
}

impl std::fmt::Debug for dyn Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Work({})", self.kind())
    }
}

/// A computation with a fixed arity of input and output ports.
pub struct WorkHolder {
    name: String,
    mode: ProcMode,
    inputs: Vec<DataHolder>,
    outputs: Vec<DataHolder>,
    /// Lazily built name lookups; duplicate names error at build time
    in_names: Option<IndexMap<String, usize>>,
    out_names: Option<IndexMap<String, usize>>,
    work: Box<dyn Work>,
}

impl WorkHolder {
    /// Create a holder. The arity is fixed from here on.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<DataHolder>,
        outputs: Vec<DataHolder>,
        work: Box<dyn Work>,
    ) -> Self {
        Self {
            name: name.into(),
            mode: ProcMode::Process,
            inputs,
            outputs,
            in_names: None,
            out_names: None,
            work,
        }
    }

    /// Holder name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload type tag
    #[must_use]
    pub fn kind(&self) -> &str {
        self.work.kind()
    }

    /// Current processing mode
    #[must_use]
    pub const fn mode(&self) -> ProcMode {
        self.mode
    }

    /// Select real computation or synthetic output
    pub fn set_mode(&mut self, mode: ProcMode) {
        self.mode = mode;
    }

    /// Number of input ports
    #[must_use]
    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output ports
    #[must_use]
    pub fn n_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// All input ports
    #[must_use]
    pub fn inputs(&self) -> &[DataHolder] {
        &self.inputs
    }

    /// All input ports, mutable
    pub fn inputs_mut(&mut self) -> &mut [DataHolder] {
        &mut self.inputs
    }

    /// All output ports
    #[must_use]
    pub fn outputs(&self) -> &[DataHolder] {
        &self.outputs
    }

    /// All output ports, mutable
    pub fn outputs_mut(&mut self) -> &mut [DataHolder] {
        &mut self.outputs
    }

    /// Input port by index
    ///
    /// # Errors
    ///
    /// Returns an error when the index is outside the fixed arity.
    pub fn input(&self, index: usize) -> CoreResult<&DataHolder> {
        self.inputs.get(index).ok_or(CoreError::PortOutOfRange {
            index,
            count: self.inputs.len(),
        })
    }

    /// Input port by index, mutable
    ///
    /// # Errors
    ///
    /// Returns an error when the index is outside the fixed arity.
    pub fn input_mut(&mut self, index: usize) -> CoreResult<&mut DataHolder> {
        let count = self.inputs.len();
        self.inputs
            .get_mut(index)
            .ok_or(CoreError::PortOutOfRange { index, count })
    }

    /// Output port by index
    ///
    /// # Errors
    ///
    /// Returns an error when the index is outside the fixed arity.
    pub fn output(&self, index: usize) -> CoreResult<&DataHolder> {
        self.outputs.get(index).ok_or(CoreError::PortOutOfRange {
            index,
            count: self.outputs.len(),
        })
    }

    /// Output port by index, mutable
    ///
    /// # Errors
    ///
    /// Returns an error when the index is outside the fixed arity.
    pub fn output_mut(&mut self, index: usize) -> CoreResult<&mut DataHolder> {
        let count = self.outputs.len();
        self.outputs
            .get_mut(index)
            .ok_or(CoreError::PortOutOfRange { index, count })
    }

    /// Look an input port up by name.
    ///
    /// The lookup map is built on first use; a duplicate port name is a
    /// construction error at that point. An unknown name is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when two input ports share a name.
    pub fn input_named(&mut self, name: &str) -> CoreResult<Option<usize>> {
        if self.in_names.is_none() {
            self.in_names = Some(build_name_map(&self.inputs)?);
        }
        Ok(self.in_names.as_ref().and_then(|map| map.get(name).copied()))
    }

    /// Look an output port up by name. Same contract as [`Self::input_named`].
    ///
    /// # Errors
    ///
    /// Returns an error when two output ports share a name.
    pub fn output_named(&mut self, name: &str) -> CoreResult<Option<usize>> {
        if self.out_names.is_none() {
            self.out_names = Some(build_name_map(&self.outputs)?);
        }
        Ok(self.out_names.as_ref().and_then(|map| map.get(name).copied()))
    }

    /// Factory clone preserving arity and port names, never runtime state.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone fails to preserve arity or port names.
    pub fn make(&self) -> CoreResult<WorkHolder> {
        let clone = WorkHolder {
            name: self.name.clone(),
            mode: self.mode,
            inputs: self.inputs.iter().map(DataHolder::make).collect(),
            outputs: self.outputs.iter().map(DataHolder::make).collect(),
            in_names: None,
            out_names: None,
            work: self.work.make(),
        };

        if clone.inputs.len() != self.inputs.len() || clone.outputs.len() != self.outputs.len() {
            return Err(CoreError::ArityMismatch {
                expected_inputs: self.inputs.len(),
                expected_outputs: self.outputs.len(),
                actual_inputs: clone.inputs.len(),
                actual_outputs: clone.outputs.len(),
            });
        }
        for (original, cloned) in self.inputs.iter().zip(&clone.inputs) {
            if original.name() != cloned.name() {
                return Err(CoreError::Internal {
                    message: format!(
                        "clone of '{}' renamed port '{}' to '{}'",
                        self.name,
                        original.name(),
                        cloned.name()
                    ),
                });
            }
        }
        Ok(clone)
    }

    /// Allocate and initialize per-port state
    pub fn preprocess(&mut self) {
        for port in &mut self.inputs {
            port.preprocess();
        }
        for port in &mut self.outputs {
            port.preprocess();
        }
    }

    /// One cycle: read rate-active inputs, run the payload (or the synthetic
    /// fill), write rate-active outputs.
    ///
    /// # Errors
    ///
    /// Returns an error on payload failure.
    pub fn base_process(&mut self, cycle: Cycle) -> CoreResult<()> {
        for port in &mut self.inputs {
            port.read(cycle);
        }
        match self.mode {
            ProcMode::Process => self.work.process(cycle, &self.inputs, &mut self.outputs)?,
            ProcMode::Zeroes => {
                for port in &mut self.outputs {
                    port.packet_mut().fill(0);
                }
            }
            ProcMode::Ones => {
                for port in &mut self.outputs {
                    port.packet_mut().fill(1);
                }
            }
        }
        for port in &mut self.outputs {
            port.write(cycle);
        }
        Ok(())
    }

    /// Release per-port state and flush delayed writes
    pub fn postprocess(&mut self) {
        for port in &mut self.inputs {
            port.postprocess();
        }
        for port in &mut self.outputs {
            port.postprocess();
        }
    }
}

impl std::fmt::Debug for WorkHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHolder")
            .field("name", &self.name)
            .field("kind", &self.work.kind())
            .field("mode", &self.mode)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

fn build_name_map(ports: &[DataHolder]) -> CoreResult<IndexMap<String, usize>> {
    let mut map = IndexMap::new();
    for (index, port) in ports.iter().enumerate() {
        if map.insert(port.name().to_string(), index).is_some() {
            return Err(CoreError::DuplicatePort {
                name: port.name().to_string(),
            });
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DataPacket;
    use cadence_core::Tag;
    use cadence_transport::{MemoryExchange, MemoryTransport};

    struct Negate;

    impl Work for Negate {
        fn kind(&self) -> &str {
            "Negate"
        }

        fn make(&self) -> Box<dyn Work> {
            Box::new(Negate)
        }

        fn process(
            &mut self,
            _cycle: Cycle,
            inputs: &[DataHolder],
            outputs: &mut [DataHolder],
        ) -> CoreResult<()> {
            let value: u64 = inputs[0].packet().decode()?;
            outputs[0].packet_mut().encode(&u64::MAX.wrapping_sub(value))
        }
    }

    fn holder(in_names: &[&str], out_names: &[&str]) -> WorkHolder {
        let inputs = in_names
            .iter()
            .map(|n| DataHolder::new(*n, "u64", 12))
            .collect();
        let outputs = out_names
            .iter()
            .map(|n| DataHolder::new(*n, "u64", 12))
            .collect();
        WorkHolder::new("negate", inputs, outputs, Box::new(Negate))
    }

    #[test]
    fn test_arity_fixed_at_construction() {
        let wh = holder(&["in0", "in1"], &["out0"]);
        assert_eq!(wh.n_inputs(), 2);
        assert_eq!(wh.n_outputs(), 1);
    }

    #[test]
    fn test_make_preserves_arity_and_names() {
        let wh = holder(&["in0", "in1"], &["out0"]);
        let clone = wh.make().unwrap();

        assert_eq!(clone.n_inputs(), wh.n_inputs());
        assert_eq!(clone.n_outputs(), wh.n_outputs());
        assert_eq!(clone.input(1).unwrap().name(), "in1");
        assert_eq!(clone.kind(), "Negate");
    }

    #[test]
    fn test_port_out_of_range() {
        let wh = holder(&["in0"], &["out0"]);
        let err = wh.input(3).unwrap_err();
        assert_eq!(err, CoreError::PortOutOfRange { index: 3, count: 1 });
    }

    #[test]
    fn test_named_lookup() {
        let mut wh = holder(&["in0", "in1"], &["out0"]);
        assert_eq!(wh.input_named("in1").unwrap(), Some(1));
        assert_eq!(wh.input_named("nope").unwrap(), None);
        assert_eq!(wh.output_named("out0").unwrap(), Some(0));
    }

    #[test]
    fn test_duplicate_port_name_errors_at_map_build() {
        let mut wh = holder(&["in0", "in0"], &["out0"]);
        let err = wh.input_named("in0").unwrap_err();
        assert_eq!(err, CoreError::DuplicatePort { name: "in0".to_string() });
    }

    #[test]
    fn test_zeroes_and_ones_skip_payload() {
        let mut wh = holder(&[], &["out0"]);
        wh.preprocess();

        wh.set_mode(ProcMode::Ones);
        wh.base_process(0).unwrap();
        assert!(wh.output(0).unwrap().packet().as_bytes().iter().all(|&b| b == 1));

        wh.set_mode(ProcMode::Zeroes);
        wh.base_process(1).unwrap();
        assert!(wh.output(0).unwrap().packet().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_base_process_reads_then_writes() {
        let exchange = MemoryExchange::new();
        let tag_in = Tag::from_raw(1);
        let tag_out = Tag::from_raw(2);

        let mut wh = holder(&["in0"], &["out0"]);
        {
            let port = wh.input_mut(0).unwrap();
            port.transport_mut().set_read_tag(tag_in);
            port.transport_mut()
                .install_holder(Box::new(MemoryTransport::new(exchange.clone())));
        }
        {
            let port = wh.output_mut(0).unwrap();
            port.transport_mut().set_write_tag(tag_out);
            port.transport_mut()
                .install_holder(Box::new(MemoryTransport::new(exchange.clone())));
        }
        wh.preprocess();

        // Stage an input value on the exchange
        let mut feeder = DataPacket::new(12);
        feeder.attach_buffer(vec![0; 12]);
        feeder.encode(&5u64).unwrap();
        exchange.push(tag_in, feeder.as_bytes().to_vec());

        wh.base_process(0).unwrap();

        let produced = exchange.pop(tag_out).unwrap();
        let mut out = DataPacket::new(12);
        out.attach_buffer(produced);
        let value: u64 = out.decode().unwrap();
        assert_eq!(value, u64::MAX.wrapping_sub(5));
    }
}
