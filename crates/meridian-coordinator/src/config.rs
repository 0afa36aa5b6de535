//! Per-table read-repair configuration and request timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Speculative Retry Policy
// ============================================================================

/// Per-table policy for when the coordinator speculates an extra request
/// against a silent replica.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpeculativeRetry {
    /// Never speculate.
    Disabled,

    /// Speculate after a fixed delay from fan-out start.
    Fixed(Duration),

    /// Speculate once the request has been outstanding longer than this
    /// percentile of the request timeout.
    ///
    /// The real system feeds this from observed latency percentiles; the
    /// coordinator approximates it as a fraction of the configured request
    /// timeout, which keeps the policy deterministic.
    Percentile(f64),
}

impl SpeculativeRetry {
    /// Returns the speculation threshold in nanoseconds, or `None` when
    /// speculation is disabled.
    pub fn threshold_ns(&self, request_timeout: Duration) -> Option<u64> {
        match self {
            SpeculativeRetry::Disabled => None,
            SpeculativeRetry::Fixed(delay) => Some(duration_ns(*delay)),
            SpeculativeRetry::Percentile(p) => {
                debug_assert!((0.0..=100.0).contains(p), "percentile must be 0-100");
                #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
                let ns = (duration_ns(request_timeout) as f64 * (p / 100.0)) as u64;
                Some(ns)
            }
        }
    }
}

impl Default for SpeculativeRetry {
    fn default() -> Self {
        SpeculativeRetry::Percentile(99.0)
    }
}

// ============================================================================
// Table Parameters
// ============================================================================

/// Per-table knobs consumed by the read coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableParams {
    /// When to speculate extra requests against silent replicas.
    pub speculative_retry: SpeculativeRetry,

    /// Probability that a read below CL=ALL contacts every replica and
    /// repairs divergence in the background.
    pub read_repair_chance: f64,

    /// As `read_repair_chance`, but contacting only the coordinator's
    /// datacenter.
    pub dclocal_read_repair_chance: f64,
}

impl TableParams {
    /// Parameters with every optional behavior disabled.
    ///
    /// Reads contact exactly the replicas the consistency level requires
    /// and never speculate.
    pub fn none() -> Self {
        Self {
            speculative_retry: SpeculativeRetry::Disabled,
            read_repair_chance: 0.0,
            dclocal_read_repair_chance: 0.0,
        }
    }

    /// Sets the speculative retry policy.
    pub fn with_speculative_retry(mut self, policy: SpeculativeRetry) -> Self {
        self.speculative_retry = policy;
        self
    }

    /// Sets the global read-repair chance.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `chance` is outside `0.0..=1.0`.
    pub fn with_read_repair_chance(mut self, chance: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&chance), "chance must be 0.0 to 1.0");
        self.read_repair_chance = chance;
        self
    }

    /// Sets the datacenter-local read-repair chance.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `chance` is outside `0.0..=1.0`.
    pub fn with_dclocal_read_repair_chance(mut self, chance: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&chance), "chance must be 0.0 to 1.0");
        self.dclocal_read_repair_chance = chance;
        self
    }
}

impl Default for TableParams {
    fn default() -> Self {
        Self {
            speculative_retry: SpeculativeRetry::default(),
            read_repair_chance: 0.0,
            dclocal_read_repair_chance: 0.0,
        }
    }
}

// ============================================================================
// Request Timeouts
// ============================================================================

/// Deadlines for coordinated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Deadline for gathering read responses (phases before repair).
    pub read_request: Duration,

    /// Deadline for gathering write or repair acknowledgments.
    pub write_request: Duration,
}

impl Timeouts {
    /// Timeouts suitable for production deployments.
    pub fn production() -> Self {
        Self {
            read_request: Duration::from_secs(5),
            write_request: Duration::from_secs(2),
        }
    }

    /// Short timeouts for simulation testing.
    pub fn simulation() -> Self {
        Self {
            read_request: Duration::from_millis(500),
            write_request: Duration::from_millis(500),
        }
    }

    /// Returns the read deadline in nanoseconds.
    pub fn read_request_ns(&self) -> u64 {
        duration_ns(self.read_request)
    }

    /// Returns the write deadline in nanoseconds.
    pub fn write_request_ns(&self) -> u64 {
        duration_ns(self.write_request)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::production()
    }
}

/// Converts a duration to nanoseconds, saturating on overflow.
fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
