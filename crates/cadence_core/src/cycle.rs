//! Cycle clock and channel rates.
//!
//! Cadence runs in lock-step cycles. The clock is a plain counter advanced
//! once per top-level process pass by the driver and read by every channel's
//! rate gate. There is no implicit reset between runs; the driver resets it
//! explicitly. The core provides no inter-process barrier - callers that
//! need exact cycle alignment across processes insert their own.

use serde::{Deserialize, Serialize};

/// A single cycle number
pub type Cycle = u64;

/// Process-wide cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleClock {
    current: Cycle,
}

impl CycleClock {
    /// Create a clock at cycle zero
    #[must_use]
    pub const fn new() -> Self {
        Self { current: 0 }
    }

    /// Current cycle
    #[must_use]
    pub const fn current(&self) -> Cycle {
        self.current
    }

    /// Advance by one cycle
    pub fn advance(&mut self) {
        self.current += 1;
    }

    /// Reset to cycle zero
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

impl std::fmt::Display for CycleClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.current)
    }
}

/// Number of cycles between a channel's active transfers.
///
/// A channel with rate `n` moves data only on cycles where
/// `cycle % n == 0`. The default rate of 1 is active every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rate(u64);

impl Rate {
    /// Create a rate. A rate of zero is clamped to 1.
    #[must_use]
    pub const fn new(cycles: u64) -> Self {
        if cycles == 0 { Self(1) } else { Self(cycles) }
    }

    /// The default rate: active every cycle
    #[must_use]
    pub const fn every_cycle() -> Self {
        Self(1)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether the channel moves data on the given cycle
    #[must_use]
    pub const fn active_at(&self, cycle: Cycle) -> bool {
        cycle % self.0 == 0
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::every_cycle()
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "1/{}", self.0)
    }
}
