//! Ray representation for visibility queries.
//!
//! A ray is defined as r(t) = origin + t * direction, restricted to the
//! parameter window [near, far]. Each ray is built per pixel or per sample
//! and consumed by exactly one nearest-hit query.

use glam::Vec3A;

/// Ray in 3D space with an active parameter window.
///
/// Mathematical representation: r(t) = origin + t * direction, t in [near, far]
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Starting point of the ray in world coordinates.
    pub origin: Vec3A,

    /// Direction vector of the ray.
    ///
    /// Eye rays carry a unit direction; query code only assumes the
    /// direction is consistent with the t-values it hands back.
    pub direction: Vec3A,

    /// Lower bound of the valid ray parameter.
    pub near: f32,

    /// Upper bound of the valid ray parameter. Primary rays use +infinity.
    pub far: f32,
}

impl Ray {
    /// Create a new ray with origin and direction over [near, far].
    pub fn new(origin: Vec3A, direction: Vec3A, near: f32, far: f32) -> Self {
        Self {
            origin,
            direction,
            near,
            far,
        }
    }

    /// Compute a point at parameter t along the ray.
    ///
    /// Returns r(t) = origin + t * direction.
    pub fn at(&self, t: f32) -> Vec3A {
        self.origin + t * self.direction
    }
}
