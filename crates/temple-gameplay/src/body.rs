//! Positionable / movable capability used by combat and AI code.
//!
//! The core never talks to a rendering engine's sprite or physics body
//! directly; a presentation layer implements [`Body`] for its own objects.

use serde::{Deserialize, Serialize};
use temple_common::{Aabb, Vec2};

/// Something with a position, a velocity and a facing.
pub trait Body {
    /// World position (center).
    fn position(&self) -> Vec2;

    /// Teleports the body.
    fn set_position(&mut self, position: Vec2);

    /// Current velocity (px/s).
    fn velocity(&self) -> Vec2;

    /// Sets the velocity (px/s).
    fn set_velocity(&mut self, velocity: Vec2);

    /// Whether the body faces +x.
    fn facing_right(&self) -> bool;

    /// Flips the body.
    fn set_facing_right(&mut self, facing_right: bool);

    /// Turns to face a point. Ignores points straight above or below.
    fn face_towards(&mut self, point: Vec2) {
        let dx = point.x - self.position().x;
        if dx.abs() > f32::EPSILON {
            self.set_facing_right(dx > 0.0);
        }
    }
}

/// Minimal headless body: integrates velocity and clamps to an optional arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicBody {
    /// Center position
    pub position: Vec2,
    /// Velocity (px/s)
    pub velocity: Vec2,
    /// Facing
    pub facing_right: bool,
    /// Hurtbox size
    pub size: Vec2,
    /// Movement bounds
    pub arena: Option<Aabb>,
}

impl KinematicBody {
    /// Creates a body at `position` with a hurtbox of `size`.
    #[must_use]
    pub fn new(position: Vec2, size: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            facing_right: true,
            size,
            arena: None,
        }
    }

    /// Restricts movement to `arena` (builder pattern).
    #[must_use]
    pub fn with_arena(mut self, arena: Aabb) -> Self {
        self.arena = Some(arena);
        self
    }

    /// World-space hurtbox.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_center(self.position, self.size.x, self.size.y)
    }

    /// Moves by velocity over `dt_ms`.
    pub fn integrate(&mut self, dt_ms: f32) {
        self.position += self.velocity * (dt_ms / 1000.0);
        if let Some(arena) = self.arena {
            self.position.x = self.position.x.clamp(arena.min_x, arena.max_x);
            self.position.y = self.position.y.clamp(arena.min_y, arena.max_y);
        }
    }
}

impl Body for KinematicBody {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    fn velocity(&self) -> Vec2 {
        self.velocity
    }

    fn set_velocity(&mut self, velocity: Vec2) {
        self.velocity = velocity;
    }

    fn facing_right(&self) -> bool {
        self.facing_right
    }

    fn set_facing_right(&mut self, facing_right: bool) {
        self.facing_right = facing_right;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrate_and_clamp() {
        let mut body = KinematicBody::new(Vec2::ZERO, Vec2::new(32.0, 48.0))
            .with_arena(Aabb::new(-10.0, -10.0, 10.0, 10.0));
        body.set_velocity(Vec2::new(100.0, 0.0));
        body.integrate(50.0);
        assert_eq!(body.position, Vec2::new(5.0, 0.0));
        body.integrate(1000.0);
        assert_eq!(body.position, Vec2::new(10.0, 0.0));
    }

    #[test]
    fn test_face_towards() {
        let mut body = KinematicBody::new(Vec2::ZERO, Vec2::ONE);
        body.face_towards(Vec2::new(-5.0, 0.0));
        assert!(!body.facing_right());
        body.face_towards(Vec2::new(0.0, 20.0));
        assert!(!body.facing_right(), "vertical target keeps facing");
    }
}
