//! Lock-step cycle driver.
//!
//! Runs a wired pipeline through its three phases: one preprocess pass,
//! a run of process cycles against a monotonically advancing clock, and
//! one postprocess pass. The driver never skips a cycle and never reorders
//! steps; determinism comes from the fixed definition order of the graph.

use cadence_core::{CoreResult, Cycle, CycleClock};
use cadence_graph::Step;

/// Drives one pipeline root through preprocess, cycles, and postprocess.
pub struct Runner {
    root: Step,
    clock: CycleClock,
}

impl Runner {
    /// Create a runner for a pipeline root with the clock at zero
    #[must_use]
    pub fn new(root: Step) -> Self {
        Self {
            root,
            clock: CycleClock::new(),
        }
    }

    /// The pipeline root
    #[must_use]
    pub fn root(&self) -> &Step {
        &self.root
    }

    /// Current cycle
    #[must_use]
    pub fn current_cycle(&self) -> Cycle {
        self.clock.current()
    }

    /// Validate the wiring of the whole graph before running it.
    ///
    /// # Errors
    ///
    /// Returns the first wiring violation found.
    pub fn validate(&self) -> CoreResult<()> {
        self.root.check_connections()
    }

    /// Allocate per-port state across the graph
    pub fn preprocess(&mut self) {
        self.root.preprocess();
    }

    /// Run `cycles` process passes, advancing the clock after each.
    ///
    /// The clock is not reset first; successive calls continue counting.
    ///
    /// # Errors
    ///
    /// Returns an error on payload failure, leaving the clock at the
    /// failed cycle.
    pub fn run(&mut self, cycles: u64) -> CoreResult<()> {
        for _ in 0..cycles {
            self.root.process(self.clock.current())?;
            self.clock.advance();
        }
        Ok(())
    }

    /// Release per-port state and flush delayed writes across the graph
    pub fn postprocess(&mut self) {
        self.root.postprocess();
    }

    /// Full run: validate, reset the clock, then all three phases.
    ///
    /// # Errors
    ///
    /// Returns an error on a wiring violation or payload failure.
    pub fn execute(&mut self, cycles: u64) -> CoreResult<()> {
        self.validate()?;
        self.clock.reset();
        tracing::info!(root = %self.root.name(), cycles, "pipeline run starting");
        self.preprocess();
        let outcome = self.run(cycles);
        self.postprocess();
        match &outcome {
            Ok(()) => tracing::info!(root = %self.root.name(), cycles, "pipeline run complete"),
            Err(err) => {
                tracing::error!(root = %self.root.name(), cycle = self.clock.current(), %err, "pipeline run failed");
            }
        }
        outcome
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("root", &self.root)
            .field("clock", &self.clock)
            .finish()
    }
}
