//! Composites: steps built from other steps.
//!
//! A composite owns an ordered list of child steps and a set of boundary
//! ports. Boundary ports are not real endpoints: each one forwards to a
//! port of a child, and connections made against the composite resolve
//! through the forwarding maps down to leaf ports before any channel is
//! built. A pipeline built flat and the same pipeline grouped into
//! composites therefore produce identical channel graphs.

use crate::data::DataHolder;
use crate::step::{Step, StepBody, StepRep, subtree_contains};
use cadence_core::{CoreError, CoreResult, IdAllocator};

/// The body of a composite step: children plus boundary forwarding.
pub struct CompositeBody {
    boundary_inputs: Vec<DataHolder>,
    boundary_outputs: Vec<DataHolder>,
    children: Vec<Step>,
    /// Boundary input index to (child index, child input port)
    in_forward: Vec<Option<(usize, usize)>>,
    /// Boundary output index to (child index, child output port)
    out_forward: Vec<Option<(usize, usize)>>,
}

impl CompositeBody {
    /// Boundary input ports
    #[must_use]
    pub fn boundary_inputs(&self) -> &[DataHolder] {
        &self.boundary_inputs
    }

    /// Boundary input ports, mutable
    pub fn boundary_inputs_mut(&mut self) -> &mut [DataHolder] {
        &mut self.boundary_inputs
    }

    /// Boundary output ports
    #[must_use]
    pub fn boundary_outputs(&self) -> &[DataHolder] {
        &self.boundary_outputs
    }

    /// Boundary output ports, mutable
    pub fn boundary_outputs_mut(&mut self) -> &mut [DataHolder] {
        &mut self.boundary_outputs
    }

    /// Child steps in definition order
    #[must_use]
    pub fn children(&self) -> &[Step] {
        &self.children
    }

    /// Where a boundary input forwards to, if forwarded yet
    #[must_use]
    pub fn input_forward(&self, boundary: usize) -> Option<(usize, usize)> {
        self.in_forward.get(boundary).copied().flatten()
    }

    /// Where a boundary output forwards from, if forwarded yet
    #[must_use]
    pub fn output_forward(&self, boundary: usize) -> Option<(usize, usize)> {
        self.out_forward.get(boundary).copied().flatten()
    }
}

/// A step composed of child steps.
///
/// Derefs to [`Step`], so a composite connects, places, and schedules like
/// any other step.
#[derive(Clone)]
pub struct Composite {
    step: Step,
}

impl Composite {
    /// Create an empty composite with the given boundary ports.
    ///
    /// Boundary ports receive transport IDs in the same order as a work
    /// holder's ports would: inputs first, then outputs.
    #[must_use]
    pub fn new(
        ids: &mut IdAllocator,
        name: impl Into<String>,
        boundary_inputs: Vec<DataHolder>,
        boundary_outputs: Vec<DataHolder>,
    ) -> Self {
        let in_forward = vec![None; boundary_inputs.len()];
        let out_forward = vec![None; boundary_outputs.len()];
        let body = CompositeBody {
            boundary_inputs,
            boundary_outputs,
            children: Vec::new(),
            in_forward,
            out_forward,
        };
        let step = Step::build(ids, name.into(), StepBody::Composite(body));
        Self { step }
    }

    /// The composite as a plain step handle
    #[must_use]
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Append a child. Its sequence number is its position in definition
    /// order, which the connection protocol enforces for data direction.
    ///
    /// # Errors
    ///
    /// Returns an error when the child already belongs to a composite or
    /// would introduce a containment cycle.
    pub fn add_step(&self, child: &Step) -> CoreResult<usize> {
        if self.step.same_step(child) {
            return Err(CoreError::MalformedComposite {
                reason: format!("composite '{}' cannot contain itself", self.step.name()),
            });
        }
        if subtree_contains(child.rep(), self.step.rep()) {
            return Err(CoreError::MalformedComposite {
                reason: format!(
                    "adding '{}' to '{}' would create a containment cycle",
                    child.name(),
                    self.step.name()
                ),
            });
        }
        if child.rep().borrow().seq().is_some() {
            return Err(CoreError::MalformedComposite {
                reason: format!("step '{}' already belongs to a composite", child.name()),
            });
        }

        let seq = {
            let mut rep = self.step.rep().borrow_mut();
            let body = composite_body_mut(&mut rep);
            body.children.push(child.clone());
            body.children.len() - 1
        };
        child.rep().borrow_mut().set_parent(self.step.rep(), seq);
        Ok(seq)
    }

    /// Forward a boundary input to an input port of a child.
    ///
    /// # Errors
    ///
    /// Fails fast when the target is not a child, an index is out of range,
    /// the port types or rates differ, or the boundary port is already
    /// forwarded.
    pub fn forward_input(&self, boundary: usize, child: &Step, child_port: usize) -> CoreResult<()> {
        let child_index = self.child_index(child)?;
        let (child_type, child_rate) = {
            let rep = child.rep().borrow();
            let ports = rep.input_ports();
            let port = ports.get(child_port).ok_or(CoreError::PortOutOfRange {
                index: child_port,
                count: ports.len(),
            })?;
            (port.type_tag().to_string(), port.rate())
        };

        let mut rep = self.step.rep().borrow_mut();
        let name = rep.name().to_string();
        let body = composite_body_mut(&mut rep);
        let count = body.boundary_inputs.len();
        let bport = body
            .boundary_inputs
            .get(boundary)
            .ok_or(CoreError::PortOutOfRange { index: boundary, count })?;
        if bport.type_tag() != child_type {
            return Err(CoreError::TypeMismatch {
                source: bport.type_tag().to_string(),
                dest: child_type,
            });
        }
        if bport.rate() != child_rate {
            return Err(CoreError::RateMismatch {
                source: bport.rate().as_u64(),
                dest: child_rate.as_u64(),
            });
        }
        if body.in_forward[boundary].is_some() {
            return Err(CoreError::MalformedComposite {
                reason: format!("boundary input {} of '{}' is already forwarded", boundary, name),
            });
        }
        body.in_forward[boundary] = Some((child_index, child_port));
        Ok(())
    }

    /// Forward a boundary output from an output port of a child.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::forward_input`].
    pub fn forward_output(
        &self,
        boundary: usize,
        child: &Step,
        child_port: usize,
    ) -> CoreResult<()> {
        let child_index = self.child_index(child)?;
        let (child_type, child_rate) = {
            let rep = child.rep().borrow();
            let ports = rep.output_ports();
            let port = ports.get(child_port).ok_or(CoreError::PortOutOfRange {
                index: child_port,
                count: ports.len(),
            })?;
            (port.type_tag().to_string(), port.rate())
        };

        let mut rep = self.step.rep().borrow_mut();
        let name = rep.name().to_string();
        let body = composite_body_mut(&mut rep);
        let count = body.boundary_outputs.len();
        let bport = body
            .boundary_outputs
            .get(boundary)
            .ok_or(CoreError::PortOutOfRange { index: boundary, count })?;
        if bport.type_tag() != child_type {
            return Err(CoreError::TypeMismatch {
                source: child_type,
                dest: bport.type_tag().to_string(),
            });
        }
        if bport.rate() != child_rate {
            return Err(CoreError::RateMismatch {
                source: child_rate.as_u64(),
                dest: bport.rate().as_u64(),
            });
        }
        if body.out_forward[boundary].is_some() {
            return Err(CoreError::MalformedComposite {
                reason: format!("boundary output {} of '{}' is already forwarded", boundary, name),
            });
        }
        body.out_forward[boundary] = Some((child_index, child_port));
        Ok(())
    }

    /// Forward all boundary inputs across the given children's input ports,
    /// consecutively in order.
    ///
    /// # Errors
    ///
    /// Returns an error when the port counts do not add up exactly, or a
    /// single forward fails.
    pub fn connect_input_array(&self, children: &[Step]) -> CoreResult<()> {
        let total = self.step.n_inputs();
        let mut boundary = 0;
        for child in children {
            for port in 0..child.n_inputs() {
                if boundary >= total {
                    return Err(CoreError::MalformedComposite {
                        reason: format!(
                            "'{}': more child input ports than boundary inputs ({})",
                            self.step.name(),
                            total
                        ),
                    });
                }
                self.forward_input(boundary, child, port)?;
                boundary += 1;
            }
        }
        if boundary != total {
            return Err(CoreError::MalformedComposite {
                reason: format!(
                    "'{}': {} of {} boundary inputs forwarded",
                    self.step.name(),
                    boundary,
                    total
                ),
            });
        }
        Ok(())
    }

    /// Forward all boundary outputs from the given children's output ports,
    /// consecutively in order. Same contract as
    /// [`Self::connect_input_array`].
    ///
    /// # Errors
    ///
    /// Returns an error when the port counts do not add up exactly, or a
    /// single forward fails.
    pub fn connect_output_array(&self, children: &[Step]) -> CoreResult<()> {
        let total = self.step.n_outputs();
        let mut boundary = 0;
        for child in children {
            for port in 0..child.n_outputs() {
                if boundary >= total {
                    return Err(CoreError::MalformedComposite {
                        reason: format!(
                            "'{}': more child output ports than boundary outputs ({})",
                            self.step.name(),
                            total
                        ),
                    });
                }
                self.forward_output(boundary, child, port)?;
                boundary += 1;
            }
        }
        if boundary != total {
            return Err(CoreError::MalformedComposite {
                reason: format!(
                    "'{}': {} of {} boundary outputs forwarded",
                    self.step.name(),
                    boundary,
                    total
                ),
            });
        }
        Ok(())
    }

    fn child_index(&self, child: &Step) -> CoreResult<usize> {
        let rep = self.step.rep().borrow();
        let StepBody::Composite(body) = rep.body() else {
            unreachable!("composite handle wraps a composite body");
        };
        body.children
            .iter()
            .position(|c| c.same_step(child))
            .ok_or_else(|| CoreError::MalformedComposite {
                reason: format!(
                    "step '{}' is not a child of composite '{}'",
                    child.name(),
                    self.step.name()
                ),
            })
    }
}

impl std::ops::Deref for Composite {
    type Target = Step;

    fn deref(&self) -> &Step {
        &self.step
    }
}

impl std::fmt::Debug for Composite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Composite").field(&self.step).finish()
    }
}

fn composite_body_mut(rep: &mut StepRep) -> &mut CompositeBody {
    match rep.body_mut() {
        StepBody::Composite(body) => body,
        StepBody::Work(_) => unreachable!("composite handle wraps a composite body"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::{Work, WorkHolder};
    use cadence_core::{Cycle, Rate};
    use cadence_transport::{MemoryExchange, MemoryTransport};

    struct Echo;

    impl Work for Echo {
        fn kind(&self) -> &str {
            "Echo"
        }

        fn make(&self) -> Box<dyn Work> {
            Box::new(Echo)
        }

        fn process(
            &mut self,
            _cycle: Cycle,
            inputs: &[DataHolder],
            outputs: &mut [DataHolder],
        ) -> CoreResult<()> {
            for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                let bytes = input.packet().as_bytes().to_vec();
                output.packet_mut().as_bytes_mut().copy_from_slice(&bytes);
            }
            Ok(())
        }
    }

    fn leaf(ids: &mut IdAllocator, name: &str, n_in: usize, n_out: usize) -> Step {
        let inputs = (0..n_in)
            .map(|i| DataHolder::new(format!("in{}", i), "u64", 12))
            .collect();
        let outputs = (0..n_out)
            .map(|i| DataHolder::new(format!("out{}", i), "u64", 12))
            .collect();
        Step::new(ids, WorkHolder::new(name, inputs, outputs, Box::new(Echo)))
    }

    fn boundary(n: usize, prefix: &str) -> Vec<DataHolder> {
        (0..n)
            .map(|i| DataHolder::new(format!("{}{}", prefix, i), "u64", 12))
            .collect()
    }

    fn memory_prototype() -> MemoryTransport {
        MemoryTransport::new(MemoryExchange::new())
    }

    #[test]
    fn test_add_step_assigns_sequence() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", vec![], vec![]);
        let a = leaf(&mut ids, "a", 0, 1);
        let b = leaf(&mut ids, "b", 1, 0);

        assert_eq!(group.add_step(&a).unwrap(), 0);
        assert_eq!(group.add_step(&b).unwrap(), 1);
        assert_eq!(a.rep().borrow().seq(), Some(0));
        assert_eq!(b.rep().borrow().seq(), Some(1));
    }

    #[test]
    fn test_add_step_twice_fails() {
        let mut ids = IdAllocator::new();
        let group_a = Composite::new(&mut ids, "ga", vec![], vec![]);
        let group_b = Composite::new(&mut ids, "gb", vec![], vec![]);
        let step = leaf(&mut ids, "a", 0, 1);

        group_a.add_step(&step).unwrap();
        let err = group_b.add_step(&step).unwrap_err();
        assert!(matches!(err, CoreError::MalformedComposite { .. }));
    }

    #[test]
    fn test_forward_requires_child() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", boundary(1, "in"), vec![]);
        let outsider = leaf(&mut ids, "outsider", 1, 0);

        let err = group.forward_input(0, &outsider, 0).unwrap_err();
        assert!(matches!(err, CoreError::MalformedComposite { .. }));
    }

    #[test]
    fn test_forward_rejects_rate_mismatch() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", boundary(1, "in"), vec![]);
        let child = leaf(&mut ids, "child", 1, 0);
        child.set_in_rate(Rate::new(10), None).unwrap();
        group.add_step(&child).unwrap();

        let err = group.forward_input(0, &child, 0).unwrap_err();
        assert_eq!(err, CoreError::RateMismatch { source: 1, dest: 10 });
    }

    #[test]
    fn test_forward_input_twice_fails() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", boundary(1, "in"), vec![]);
        let child = leaf(&mut ids, "child", 1, 0);
        group.add_step(&child).unwrap();

        group.forward_input(0, &child, 0).unwrap();
        let err = group.forward_input(0, &child, 0).unwrap_err();
        assert!(matches!(err, CoreError::MalformedComposite { .. }));
    }

    #[test]
    fn test_connect_through_boundary_lands_on_leaf() {
        let mut ids = IdAllocator::new();
        let source = leaf(&mut ids, "source", 0, 1);

        let group = Composite::new(&mut ids, "group", boundary(1, "in"), vec![]);
        let sink = leaf(&mut ids, "sink", 1, 0);
        group.add_step(&sink).unwrap();
        group.forward_input(0, &sink, 0).unwrap();

        group.connect(&source, 0, 0, 1, &memory_prototype()).unwrap();

        // The channel terminates at the leaf, not the boundary
        let tag = source.output_write_tag(0).unwrap().unwrap();
        assert_eq!(sink.input_read_tag(0).unwrap(), Some(tag));
        assert_eq!(group.input_read_tag(0).unwrap(), None);
    }

    #[test]
    fn test_connect_unforwarded_boundary_fails() {
        let mut ids = IdAllocator::new();
        let source = leaf(&mut ids, "source", 0, 1);
        let group = Composite::new(&mut ids, "group", boundary(1, "in"), vec![]);
        let sink = leaf(&mut ids, "sink", 1, 0);
        group.add_step(&sink).unwrap();

        let err = group.connect(&source, 0, 0, 1, &memory_prototype()).unwrap_err();
        assert!(matches!(err, CoreError::MalformedComposite { .. }));
    }

    #[test]
    fn test_connect_array_distributes_consecutively() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", boundary(3, "in"), vec![]);
        let first = leaf(&mut ids, "first", 2, 0);
        let second = leaf(&mut ids, "second", 1, 0);
        group.add_step(&first).unwrap();
        group.add_step(&second).unwrap();

        group.connect_input_array(&[first.clone(), second.clone()]).unwrap();

        let rep = group.rep().borrow();
        let StepBody::Composite(body) = rep.body() else { unreachable!() };
        assert_eq!(body.input_forward(0), Some((0, 0)));
        assert_eq!(body.input_forward(1), Some((0, 1)));
        assert_eq!(body.input_forward(2), Some((1, 0)));
    }

    #[test]
    fn test_connect_array_rejects_wrong_count() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", boundary(2, "in"), vec![]);
        let only = leaf(&mut ids, "only", 1, 0);
        group.add_step(&only).unwrap();

        let err = group.connect_input_array(&[only.clone()]).unwrap_err();
        assert!(matches!(err, CoreError::MalformedComposite { .. }));
    }

    #[test]
    fn test_internal_order_violation_detected() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", vec![], vec![]);
        let later = leaf(&mut ids, "later", 0, 1);
        let earlier = leaf(&mut ids, "earlier", 1, 0);
        // Destination defined before its source
        group.add_step(&earlier).unwrap();
        group.add_step(&later).unwrap();

        let err = earlier.connect(&later, 0, 0, 1, &memory_prototype()).unwrap_err();
        assert_eq!(err, CoreError::OrderViolation { source_seq: 1, dest_seq: 0 });
    }

    #[test]
    fn test_cross_composite_connect_rejected() {
        let mut ids = IdAllocator::new();
        let group_a = Composite::new(&mut ids, "ga", vec![], vec![]);
        let group_b = Composite::new(&mut ids, "gb", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        group_a.add_step(&src).unwrap();
        group_b.add_step(&dst).unwrap();

        let err = dst.connect(&src, 0, 0, 1, &memory_prototype()).unwrap_err();
        assert!(matches!(err, CoreError::CrossComposite { .. }));
    }

    #[test]
    fn test_nested_boundary_resolution() {
        let mut ids = IdAllocator::new();
        let source = leaf(&mut ids, "source", 0, 1);

        let inner = Composite::new(&mut ids, "inner", boundary(1, "in"), vec![]);
        let sink = leaf(&mut ids, "sink", 1, 0);
        inner.add_step(&sink).unwrap();
        inner.forward_input(0, &sink, 0).unwrap();

        let outer = Composite::new(&mut ids, "outer", boundary(1, "in"), vec![]);
        outer.add_step(inner.step()).unwrap();
        outer.forward_input(0, inner.step(), 0).unwrap();

        outer.connect(&source, 0, 0, 1, &memory_prototype()).unwrap();

        // Resolution goes through two boundary layers down to the leaf
        let tag = source.output_write_tag(0).unwrap().unwrap();
        assert_eq!(sink.input_read_tag(0).unwrap(), Some(tag));
    }

    #[test]
    fn test_forwarded_output_with_internal_target_rejected() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", vec![], boundary(1, "out"));
        let producer = leaf(&mut ids, "producer", 0, 1);
        let consumer = leaf(&mut ids, "consumer", 1, 0);
        group.add_step(&producer).unwrap();
        group.add_step(&consumer).unwrap();

        // The same leaf output is claimed by the boundary and by a sibling
        group.forward_output(0, &producer, 0).unwrap();
        consumer.connect(&producer, 0, 0, 1, &memory_prototype()).unwrap();

        let err = group.check_connections().unwrap_err();
        assert!(matches!(err, CoreError::MalformedComposite { .. }));
    }

    #[test]
    fn test_check_connections_validates_subtree() {
        let mut ids = IdAllocator::new();
        let group = Composite::new(&mut ids, "group", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        group.add_step(&src).unwrap();
        group.add_step(&dst).unwrap();

        // Unwired subtree fails the check
        assert!(group.check_connections().is_err());

        dst.connect(&src, 0, 0, 1, &memory_prototype()).unwrap();
        group.check_connections().unwrap();
    }
}
