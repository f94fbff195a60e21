//! Per-pixel eye-ray construction from inverse camera matrices.
//!
//! The renderer never stores a decomposed camera: it carries the inverse
//! projection and inverse view matrices produced by the scene loader (or the
//! bounds-derived fallback) and rebuilds each primary ray from them. Rays
//! start at the view-space eye point, pass through the pixel center, and are
//! transformed into world space with a normalized direction and infinite far
//! value.
//!
//! Singular matrices are not validated here. A degenerate unproject yields a
//! NaN direction, which downstream slab tests and hit queries classify as a
//! miss rather than an error.

use glam::{Mat4, Vec3A, Vec4};

use crate::aabb::Aabb;
use crate::ray::Ray;

/// Inverse projection and inverse view matrices driving ray generation.
#[derive(Debug, Clone, Copy)]
pub struct CameraMatrices {
    /// Inverse of the projection matrix.
    pub proj_inv: Mat4,
    /// Inverse of the view matrix (camera-to-world).
    pub world_view_inv: Mat4,
}

impl CameraMatrices {
    /// World-space position of the eye point.
    pub fn eye_position(&self) -> Vec3A {
        self.world_view_inv.transform_point3a(Vec3A::ZERO)
    }
}

/// Unproject a screen position (u, v in [0,1]) into a normalized
/// view-space direction.
pub fn eye_ray_direction(u: f32, v: f32, proj_inv: &Mat4) -> Vec3A {
    let ndc = Vec4::new(2.0 * u - 1.0, 2.0 * v - 1.0, 0.0, 1.0);
    let p = *proj_inv * ndc;
    let p = p / p.w;
    Vec3A::new(p.x, p.y, p.z).normalize()
}

/// Build the world-space primary ray through the center of pixel (x, y).
pub fn eye_ray(x: u32, y: u32, width: u32, height: u32, cams: &CameraMatrices) -> Ray {
    let u = (x as f32 + 0.5) / width as f32;
    let v = (y as f32 + 0.5) / height as f32;

    let dir_view = eye_ray_direction(u, v, &cams.proj_inv);
    let origin = cams.world_view_inv.transform_point3a(Vec3A::ZERO);
    let direction = cams
        .world_view_inv
        .transform_vector3a(dir_view)
        .normalize();

    Ray::new(origin, direction, 0.0, f32::INFINITY)
}

/// Derive a fallback camera when the scene file carries none.
///
/// Places the eye on the +Z side of the scene bounds, far enough back that
/// a 45-degree vertical field of view covers the whole box, looking at the
/// box center.
pub fn camera_from_bounds(width: u32, height: u32, bounds: &Aabb) -> CameraMatrices {
    let center = bounds.center();
    let diagonal = bounds.extent().length().max(1e-3);

    let vfov = 45f32.to_radians();
    let distance = 0.5 * diagonal / (0.5 * vfov).tan() + 0.5 * diagonal;
    let eye = center + Vec3A::new(0.0, 0.0, distance);

    let aspect = width as f32 / height as f32;
    let proj = Mat4::perspective_rh(vfov, aspect, 0.01 * distance, 10.0 * (distance + diagonal));
    let view = Mat4::look_at_rh(eye.into(), center.into(), glam::Vec3::Y);

    CameraMatrices {
        proj_inv: proj.inverse(),
        world_view_inv: view.inverse(),
    }
}
