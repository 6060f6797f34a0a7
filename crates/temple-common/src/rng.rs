//! Seeded random source for every stochastic decision in the simulation.

/// Deterministic RNG handle.
///
/// Crit rolls, block chances, attack picks and formation switches all draw
/// from one of these, so a fixed seed reproduces a fight exactly.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: fastrand::Rng,
    seed: u64,
}

impl SimRng {
    /// Create a new RNG with seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: fastrand::Rng::with_seed(seed),
            seed,
        }
    }

    /// Derive an independent stream (e.g. one per enemy) from this seed.
    #[must_use]
    pub fn derive(&self, salt: u64) -> Self {
        let seed = self
            .seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(salt.wrapping_mul(1_442_695_040_888_963_407));
        Self::new(seed)
    }

    /// The seed this RNG was created with.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Get random f32 in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.inner.f32()
    }

    /// True with probability `p` (clamped to [0, 1]).
    pub fn chance(&mut self, p: f32) -> bool {
        self.next_f32() < p.clamp(0.0, 1.0)
    }

    /// Get random value in range [min, max).
    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + self.next_f32() * (max - min)
    }

    /// Get random index in [0, len). Returns 0 when `len` is 0.
    pub fn index(&mut self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.inner.usize(..len)
        }
    }

    /// Choose random item from slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            items.get(self.index(items.len()))
        }
    }

    /// Choose an index using non-negative weights. Returns `None` if every
    /// weight is zero.
    pub fn weighted_index(&mut self, weights: &[f32]) -> Option<usize> {
        let total: f32 = weights.iter().map(|w| w.max(0.0)).sum();
        if total <= 0.0 {
            return None;
        }
        let mut roll = self.next_f32() * total;
        for (i, w) in weights.iter().enumerate() {
            let w = w.max(0.0);
            if roll < w {
                return Some(i);
            }
            roll -= w;
        }
        weights.iter().rposition(|w| *w > 0.0)
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::new(42)
    }
}
