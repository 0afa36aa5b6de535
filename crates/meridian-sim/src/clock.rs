//! Simulated discrete clock.
//!
//! Nanosecond-precision simulated time that advances only when told to.
//! Same sequence of events yields the same timing, every run.

/// Simulated clock with nanosecond precision.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ns: u64,
}

impl SimClock {
    /// Creates a clock starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current simulated time in nanoseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now_ns
    }

    /// Advances the clock by the given number of nanoseconds.
    ///
    /// # Panics
    ///
    /// Panics on overflow.
    pub fn advance_by(&mut self, delta_ns: u64) {
        self.now_ns = self.now_ns.checked_add(delta_ns).expect("clock overflow");
    }

    /// Advances the clock to the given time.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the target is before the current time.
    pub fn advance_to(&mut self, target_ns: u64) {
        debug_assert!(
            target_ns >= self.now_ns,
            "cannot go back in time: current={}, target={}",
            self.now_ns,
            target_ns
        );
        self.now_ns = self.now_ns.max(target_ns);
    }
}

/// Converts milliseconds to nanoseconds.
#[inline]
pub const fn ms_to_ns(ms: u64) -> u64 {
    ms * 1_000_000
}

/// Converts seconds to nanoseconds.
#[inline]
pub const fn sec_to_ns(sec: u64) -> u64 {
    sec * 1_000_000_000
}
