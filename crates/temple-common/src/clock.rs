//! Shared simulation clock.

use std::cell::Cell;
use std::rc::Rc;

/// Manually advanced millisecond clock.
///
/// Cloning yields another handle to the same time value, so every system that
/// compares cooldowns or windows against "now" sees the same instant within a
/// tick. The simulation advances it once per frame; tests drive it directly.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<f64>>,
}

impl SimClock {
    /// Creates a clock at t = 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock at the given time.
    #[must_use]
    pub fn starting_at(ms: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(ms)),
        }
    }

    /// Current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> f64 {
        self.now.get()
    }

    /// Advances time by `ms` (negative values are ignored).
    pub fn advance(&self, ms: f64) {
        if ms > 0.0 {
            self.now.set(self.now.get() + ms);
        }
    }

    /// Sets the absolute time. Time never moves backwards.
    pub fn set(&self, ms: f64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }

    /// Milliseconds elapsed since `earlier`.
    #[must_use]
    pub fn since(&self, earlier: f64) -> f64 {
        self.now.get() - earlier
    }
}
