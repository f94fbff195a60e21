//! Axis-aligned bounding boxes and the slab intersection test.
//!
//! One `Aabb` instance holds the persistent scene bounds; an expanded copy
//! (fractional margin per side) bounds both training-sample synthesis and
//! the compositor's culling pass. Points inside the box are normalized into
//! [0,1] by the box extent before they reach the surrogate model.

use glam::Vec3A;

use crate::interval::Interval;

/// Axis-aligned box given by its min/max corners.
///
/// Invariant after construction and after `expand`: min <= max componentwise
/// (empty boxes produced by `EMPTY` violate this until the first `grow`).
#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3A,
    /// Maximum corner.
    pub max: Vec3A,
}

impl Aabb {
    /// Inverted box that absorbs the first grown point.
    pub const EMPTY: Self = Self {
        min: Vec3A::INFINITY,
        max: Vec3A::NEG_INFINITY,
    };

    /// Create a box from explicit corners.
    pub fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: Vec3A) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grow to include another box.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Componentwise extent (max - min).
    #[inline]
    pub fn extent(&self) -> Vec3A {
        self.max - self.min
    }

    /// Center point of the box.
    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// Surface area, used as the SAH cost metric during BVH builds.
    #[inline]
    pub fn area(&self) -> f32 {
        let d = self.extent();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// True once the box holds at least one point.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Return a copy expanded by `margin` times the extent on every side.
    ///
    /// Margins in [0, inf) preserve min <= max componentwise.
    pub fn expand(&self, margin: f32) -> Self {
        let pad = self.extent() * margin;
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Slab test: clip the line origin + t*direction against the box.
    ///
    /// Returns the entry/exit parameter window intersected with [near, far],
    /// or None when the line misses the box. Zero direction components
    /// produce infinite slab bounds which the min/max folding resolves;
    /// NaN comparisons fail and therefore also report a miss.
    pub fn clip_line(&self, origin: Vec3A, direction: Vec3A, near: f32, far: f32) -> Option<Interval> {
        let inv = direction.recip();
        let t0 = (self.min - origin) * inv;
        let t1 = (self.max - origin) * inv;
        let t_enter = t0.min(t1).max_element().max(near);
        let t_exit = t0.max(t1).min_element().min(far);
        if t_enter <= t_exit {
            Some(Interval::new(t_enter, t_exit))
        } else {
            None
        }
    }

    /// Map a world-space point into [0,1]^3 box coordinates.
    #[inline]
    pub fn normalize_point(&self, p: Vec3A) -> Vec3A {
        (p - self.min) / self.extent()
    }

    /// Map [0,1]^3 box coordinates back to world space.
    #[inline]
    pub fn denormalize_point(&self, p: Vec3A) -> Vec3A {
        p * self.extent() + self.min
    }
}
