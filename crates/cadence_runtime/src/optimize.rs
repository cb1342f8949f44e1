//! Connection optimizer.
//!
//! After a graph is wired, channels whose two endpoints landed on the same
//! cluster node can drop their remote-capable backend for a cheaper local
//! one. The optimizer walks the graph, inspects the placement on both ends
//! of every channel, and replaces the installed holders from a candidate
//! prototype. Running it again is harmless: a swapped channel just gets a
//! fresh instance of the same backend.

use cadence_graph::{Step, StepBody, StepRep};
use cadence_transport::{MemoryExchange, MemoryTransport, TransportHolder};
use std::cell::RefCell;
use std::rc::Rc;

/// Replace the backend of every same-node channel under `step` with fresh
/// instances of `candidate`. Returns the number of channels swapped.
///
/// A candidate that is not local-capable swaps nothing.
pub fn optimize_connections_with(step: &Step, candidate: &dyn TransportHolder) -> usize {
    if !candidate.is_local_capable() {
        tracing::warn!(backend = candidate.kind(), "candidate is not local-capable, nothing to do");
        return 0;
    }
    let swapped = optimize_rep(step.rep(), candidate);
    tracing::info!(root = %step.name(), swapped, backend = candidate.kind(), "connection optimization done");
    swapped
}

/// Swap same-node channels onto in-process memory queues backed by
/// `exchange`. Returns the number of channels swapped.
pub fn simplify_connections(step: &Step, exchange: &MemoryExchange) -> usize {
    optimize_connections_with(step, &MemoryTransport::new(exchange.clone()))
}

fn optimize_rep(rep: &Rc<RefCell<StepRep>>, candidate: &dyn TransportHolder) -> usize {
    let children = {
        let borrowed = rep.borrow();
        match borrowed.body() {
            StepBody::Composite(c) => Some(c.children().to_vec()),
            StepBody::Work(_) => None,
        }
    };
    if let Some(children) = children {
        return children
            .iter()
            .map(|child| optimize_rep(child.rep(), candidate))
            .sum();
    }

    // Leaf: every channel is visited exactly once, at its destination end
    let dest_node = rep.borrow().placement().node;
    let n_inputs = rep.borrow().input_ports().len();
    let mut swapped = 0;
    for index in 0..n_inputs {
        let source = {
            let borrowed = rep.borrow();
            borrowed.input_ports()[index].transport().source().cloned()
        };
        let Some(source) = source else {
            continue;
        };
        let Some(source_rep) = source.step() else {
            continue;
        };
        let source_node = source_rep.borrow().placement().node;
        if source_node != dest_node {
            continue;
        }

        rep.borrow_mut().input_ports_mut()[index]
            .transport_mut()
            .install_holder(candidate.make());
        source_rep.borrow_mut().output_ports_mut()[source.port()]
            .transport_mut()
            .install_holder(candidate.make());
        swapped += 1;
        tracing::debug!(
            dest = %rep.borrow().name(),
            port = index,
            node = dest_node,
            backend = candidate.kind(),
            "swapped same-node channel"
        );
    }
    swapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{CoreResult, Cycle, IdAllocator, Tag};
    use cadence_graph::{Composite, DataHolder, Work, WorkHolder};

    /// Stand-in for a cluster fabric backend: sends vanish, recvs fail.
    struct Fabric;

    impl TransportHolder for Fabric {
        fn make(&self) -> Box<dyn TransportHolder> {
            Box::new(Fabric)
        }

        fn kind(&self) -> &'static str {
            "fabric"
        }

        fn send(&mut self, _buf: &[u8], _dest_node: u32, _tag: Tag) -> bool {
            true
        }

        fn recv(&mut self, _buf: &mut [u8], _src_node: u32, _tag: Tag) -> bool {
            false
        }
    }

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
            .map(|i| DataHolder::new(format!("in{}", i), "bytes", 4))
            .collect();
        let outputs = (0..n_out)
            .map(|i| DataHolder::new(format!("out{}", i), "bytes", 4))
            .collect();
        Step::new(ids, WorkHolder::new(name, inputs, outputs, Box::new(Echo)))
    }

    fn holder_kinds(step: &Step) -> (Option<&'static str>, Option<&'static str>) {
        let rep = step.rep().borrow();
        let input = rep.input_ports().first().and_then(|p| p.transport().holder_kind());
        let output = rep.output_ports().first().and_then(|p| p.transport().holder_kind());
        (input, output)
    }

    #[test]
    fn test_same_node_channel_swapped() {
        let mut ids = IdAllocator::new();
        let root = Composite::new(&mut ids, "root", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        root.add_step(&src).unwrap();
        root.add_step(&dst).unwrap();
        dst.connect(&src, 0, 0, 1, &Fabric).unwrap();
        src.run_on_node(2, 1);
        dst.run_on_node(2, 1);

        let swapped = simplify_connections(root.step(), &MemoryExchange::new());
        assert_eq!(swapped, 1);
        assert_eq!(holder_kinds(&src).1, Some("memory"));
        assert_eq!(holder_kinds(&dst).0, Some("memory"));
    }

    #[test]
    fn test_cross_node_channel_kept() {
        let mut ids = IdAllocator::new();
        let root = Composite::new(&mut ids, "root", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        root.add_step(&src).unwrap();
        root.add_step(&dst).unwrap();
        dst.connect(&src, 0, 0, 1, &Fabric).unwrap();
        src.run_on_node(1, 1);
        dst.run_on_node(2, 1);

        let swapped = simplify_connections(root.step(), &MemoryExchange::new());
        assert_eq!(swapped, 0);
        assert_eq!(holder_kinds(&src).1, Some("fabric"));
        assert_eq!(holder_kinds(&dst).0, Some("fabric"));
    }

    #[test]
    fn test_optimizer_is_idempotent() {
        let mut ids = IdAllocator::new();
        let root = Composite::new(&mut ids, "root", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        root.add_step(&src).unwrap();
        root.add_step(&dst).unwrap();
        dst.connect(&src, 0, 0, 1, &Fabric).unwrap();
        src.run_on_node(0, 1);
        dst.run_on_node(0, 1);

        let exchange = MemoryExchange::new();
        let first = simplify_connections(root.step(), &exchange);
        let second = simplify_connections(root.step(), &exchange);
        assert_eq!(first, second);
        assert_eq!(holder_kinds(&dst).0, Some("memory"));
    }

    #[test]
    fn test_non_local_candidate_swaps_nothing() {
        let mut ids = IdAllocator::new();
        let root = Composite::new(&mut ids, "root", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        root.add_step(&src).unwrap();
        root.add_step(&dst).unwrap();
        dst.connect(&src, 0, 0, 1, &Fabric).unwrap();

        let swapped = optimize_connections_with(root.step(), &Fabric);
        assert_eq!(swapped, 0);
        assert_eq!(holder_kinds(&dst).0, Some("fabric"));
    }

    #[test]
    fn test_data_flows_after_swap() {
        let mut ids = IdAllocator::new();
        let root = Composite::new(&mut ids, "root", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let dst = leaf(&mut ids, "dst", 1, 0);
        root.add_step(&src).unwrap();
        root.add_step(&dst).unwrap();
        // Wired over the fabric stand-in, which never delivers
        dst.connect(&src, 0, 0, 1, &Fabric).unwrap();

        simplify_connections(root.step(), &MemoryExchange::new());

        root.preprocess();
        src.with_work_mut(|wh| {
            wh.output_mut(0)
                .unwrap()
                .packet_mut()
                .as_bytes_mut()
                .copy_from_slice(b"ping");
        })
        .unwrap();
        root.process(0).unwrap();

        let received = dst
            .with_work(|wh| wh.input(0).unwrap().packet().as_bytes().to_vec())
            .unwrap();
        assert_eq!(received, b"ping");
        root.postprocess();
    }

    #[test]
    fn test_nested_composites_walked() {
        let mut ids = IdAllocator::new();
        let root = Composite::new(&mut ids, "root", vec![], vec![]);
        let src = leaf(&mut ids, "src", 0, 1);
        let group = Composite::new(
            &mut ids,
            "group",
            vec![DataHolder::new("in0", "bytes", 4)],
            vec![],
        );
        let sink = leaf(&mut ids, "sink", 1, 0);
        group.add_step(&sink).unwrap();
        group.forward_input(0, &sink, 0).unwrap();
        root.add_step(&src).unwrap();
        root.add_step(group.step()).unwrap();
        group.connect(&src, 0, 0, 1, &Fabric).unwrap();

        let swapped = simplify_connections(root.step(), &MemoryExchange::new());
        assert_eq!(swapped, 1);
        assert_eq!(holder_kinds(&sink).0, Some("memory"));
    }
}
