//! # Temple Common
//!
//! Common types, utilities, and shared abstractions for the Temple combat core.
//!
//! This crate provides foundational types used across all Temple crates:
//! - ID types (EntityId, HitboxId, SquadId) and an explicit allocator
//! - A shared, manually advanced simulation clock
//! - A seeded RNG used for every stochastic decision
//! - 2D geometry (AABB, vector helpers)
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod clock;
pub mod error;
pub mod geometry;
pub mod ids;
pub mod rng;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::error::*;
    pub use crate::geometry::*;
    pub use crate::ids::*;
    pub use crate::rng::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entity_id_allocation() {
        let mut ids = IdAllocator::new();
        let id1 = ids.next_entity();
        let id2 = ids.next_entity();
        assert_ne!(id1, id2);
        assert!(id1.is_valid());
        assert!(!EntityId::NULL.is_valid());
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_allocators_are_independent() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::new();
        assert_eq!(a.next_entity(), b.next_entity());
    }

    #[test]
    fn test_clock_shared_between_handles() {
        let clock = SimClock::new();
        let other = clock.clone();
        clock.advance(16.0);
        assert_eq!(other.now_ms(), 16.0);

        other.set(10.0);
        assert_eq!(clock.now_ms(), 16.0, "time never moves backwards");
        assert_eq!(clock.since(6.0), 10.0);
    }

    #[test]
    fn test_aabb_overlap_center() {
        let a = Aabb::new(0.0, 0.0, 10.0, 10.0);
        let b = Aabb::new(5.0, 5.0, 15.0, 15.0);
        assert!(a.overlaps(&b));
        assert_eq!(a.overlap_center(&b), Some(Vec2::new(7.5, 7.5)));

        let touching = Aabb::new(10.0, 0.0, 20.0, 10.0);
        assert!(!a.overlaps(&touching));
        assert_eq!(a.overlap_center(&touching), None);
    }

    #[test]
    fn test_missing_target_sentinels() {
        let origin = Vec2::new(1.0, 1.0);
        assert_eq!(distance_or_infinity(origin, None), f32::INFINITY);
        assert_eq!(direction_or_zero(origin, None), Vec2::ZERO);
        assert_eq!(direction_or_zero(origin, Some(origin)), Vec2::ZERO);
    }

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = SimRng::new(12345);
        let mut rng2 = SimRng::new(12345);
        for _ in 0..100 {
            assert_eq!(rng1.next_f32().to_bits(), rng2.next_f32().to_bits());
        }
    }

    #[test]
    fn test_rng_weighted_index_skips_zero_weights() {
        let mut rng = SimRng::new(7);
        for _ in 0..200 {
            assert_eq!(rng.weighted_index(&[0.0, 3.0, 0.0]), Some(1));
        }
        assert_eq!(rng.weighted_index(&[0.0, 0.0]), None);
    }

    proptest! {
        #[test]
        fn prop_rng_range_bounds(seed in any::<u64>(), min in -100.0f32..100.0, span in 0.001f32..100.0) {
            let mut rng = SimRng::new(seed);
            let v = rng.range(min, min + span);
            prop_assert!(v >= min && v <= min + span);
        }

        #[test]
        fn prop_rotate_preserves_length(x in -100.0f32..100.0, y in -100.0f32..100.0, angle in -6.3f32..6.3) {
            let v = Vec2::new(x, y);
            let r = rotate(v, angle);
            prop_assert!((v.length() - r.length()).abs() < 1e-2);
        }
    }
}
