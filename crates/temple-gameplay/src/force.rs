//! Force energy pools.

use serde::{Deserialize, Serialize};

/// Regenerating Force energy gating Force-cost attacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcePool {
    /// Current energy
    pub energy: f32,
    /// Capacity
    pub max: f32,
    /// Energy regained per second
    pub regen_per_sec: f32,
    /// Pause after spending before regen resumes (ms)
    pub regen_delay_ms: f32,
    delay_remaining_ms: f32,
}

impl ForcePool {
    /// Creates a full pool.
    #[must_use]
    pub fn new(max: f32, regen_per_sec: f32, regen_delay_ms: f32) -> Self {
        Self {
            energy: max,
            max,
            regen_per_sec,
            regen_delay_ms,
            delay_remaining_ms: 0.0,
        }
    }

    /// Player pool.
    #[must_use]
    pub fn player() -> Self {
        Self::new(100.0, 15.0, 1000.0)
    }

    /// Boss pool: 100 energy, 10 per second, no delay.
    #[must_use]
    pub fn boss() -> Self {
        Self::new(100.0, 10.0, 0.0)
    }

    /// Whether `cost` can be paid.
    #[must_use]
    pub fn can_afford(&self, cost: f32) -> bool {
        self.energy >= cost
    }

    /// Spends energy if affordable.
    pub fn try_spend(&mut self, cost: f32) -> bool {
        if !self.can_afford(cost) {
            return false;
        }
        self.energy -= cost;
        self.delay_remaining_ms = self.regen_delay_ms;
        true
    }

    /// Energy as a fraction of capacity.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.max > 0.0 {
            self.energy / self.max
        } else {
            0.0
        }
    }

    /// Whether the pool is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.energy >= self.max
    }

    /// Regenerates. Returns true on the tick the pool becomes full again.
    pub fn update(&mut self, dt_ms: f32) -> bool {
        if self.is_full() {
            return false;
        }
        if self.delay_remaining_ms > 0.0 {
            self.delay_remaining_ms -= dt_ms;
            return false;
        }
        self.energy = (self.energy + self.regen_per_sec * dt_ms / 1000.0).min(self.max);
        self.is_full()
    }
}

impl Default for ForcePool {
    fn default() -> Self {
        Self::player()
    }
}
