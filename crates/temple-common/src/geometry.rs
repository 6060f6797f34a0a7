//! 2D geometry shared by hit detection, knockback and formations.

pub use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box for collision detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum X coordinate
    pub min_x: f32,
    /// Minimum Y coordinate
    pub min_y: f32,
    /// Maximum X coordinate
    pub max_x: f32,
    /// Maximum Y coordinate
    pub max_y: f32,
}

impl Aabb {
    /// Creates a new AABB.
    #[must_use]
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Creates an AABB from center and full size.
    #[must_use]
    pub fn from_center(center: Vec2, width: f32, height: f32) -> Self {
        let half_w = width.abs() / 2.0;
        let half_h = height.abs() / 2.0;
        Self {
            min_x: center.x - half_w,
            min_y: center.y - half_h,
            max_x: center.x + half_w,
            max_y: center.y + half_h,
        }
    }

    /// Returns the center of the AABB.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Returns the width of the AABB.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    /// Returns the height of the AABB.
    #[must_use]
    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    /// Checks if this AABB overlaps with another. Touching edges do not count.
    #[must_use]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Center of the overlapping region, if the boxes overlap.
    #[must_use]
    pub fn overlap_center(&self, other: &Aabb) -> Option<Vec2> {
        if !self.overlaps(other) {
            return None;
        }
        let min_x = self.min_x.max(other.min_x);
        let max_x = self.max_x.min(other.max_x);
        let min_y = self.min_y.max(other.min_y);
        let max_y = self.max_y.min(other.max_y);
        Some(Vec2::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
    }

    /// Returns the AABB re-centered on a new point.
    #[must_use]
    pub fn recentered(&self, center: Vec2) -> Self {
        Self::from_center(center, self.width(), self.height())
    }

    /// Returns the AABB translated by a vector.
    #[must_use]
    pub fn translated(&self, offset: Vec2) -> Self {
        Self {
            min_x: self.min_x + offset.x,
            min_y: self.min_y + offset.y,
            max_x: self.max_x + offset.x,
            max_y: self.max_y + offset.y,
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }
}

/// Distance between two optional points; a missing point is infinitely far.
#[must_use]
pub fn distance_or_infinity(from: Vec2, to: Option<Vec2>) -> f32 {
    to.map_or(f32::INFINITY, |to| from.distance(to))
}

/// Unit direction from `from` to `to`, or zero when either is missing or they coincide.
#[must_use]
pub fn direction_or_zero(from: Vec2, to: Option<Vec2>) -> Vec2 {
    to.map_or(Vec2::ZERO, |to| (to - from).normalize_or_zero())
}

/// Rotates a vector counter-clockwise by `radians`.
#[must_use]
pub fn rotate(v: Vec2, radians: f32) -> Vec2 {
    let (sin, cos) = radians.sin_cos();
    Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}
