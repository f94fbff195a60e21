//! Renderer orchestration and the reference ray-casting pass.
//!
//! `Renderer` owns the acceleration structure for its lifetime together
//! with the camera matrices, viewport, and tile traversal order. The
//! reference pass walks every pixel in tile order, queries the structure,
//! and shades hits by their decoded surface normal; the surrogate pass
//! lives in [`crate::compositor`].

use glam::Vec3A;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::aabb::Aabb;
use crate::accel::RayQuery;
use crate::camera::{self, CameraMatrices};
use crate::normal::unpack_normal;
use crate::ray::Ray;
use crate::scene::{self, SceneError};
use crate::tiling;

/// Depth sentinel written for pixels whose primary ray hits nothing.
pub const MISS_DEPTH: f32 = f32::INFINITY;

/// Render configuration knobs shared by both passes.
#[derive(Debug, Clone, Copy)]
pub struct RenderPresets {
    /// Skip all queries and shade by |direction| to measure ray-generation
    /// overhead in isolation.
    pub measure_overhead: bool,
    /// Fractional margin added to each side of the scene bounds before
    /// sampling and culling.
    pub bounds_margin: f32,
    /// Along-ray sample positions fed to the surrogate model per ray.
    pub samples_per_ray: usize,
}

impl Default for RenderPresets {
    fn default() -> Self {
        Self {
            measure_overhead: false,
            bounds_margin: 0.2,
            samples_per_ray: 32,
        }
    }
}

/// Pack three 8-bit channels into a 24-bit RGB color.
#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Map a unit normal to a packed color, one channel per component,
/// `(n + 1) / 2` rescaled to [0, 255] with round-to-nearest.
#[inline]
pub fn normal_to_color(n: Vec3A) -> u32 {
    let c = ((n + Vec3A::ONE) * 0.5 * 255.0).round().clamp(Vec3A::ZERO, Vec3A::splat(255.0));
    pack_rgb(c.x as u8, c.y as u8, c.z as u8)
}

/// Overhead-mode shading: |direction| rescaled to [0, 255] per channel.
#[inline]
fn direction_to_color(d: Vec3A) -> u32 {
    let c = (d.abs() * 255.0).round().clamp(Vec3A::ZERO, Vec3A::splat(255.0));
    pack_rgb(c.x as u8, c.y as u8, c.z as u8)
}

/// Owner of the acceleration structure and per-frame state.
pub struct Renderer {
    pub(crate) accel: Box<dyn RayQuery>,
    pub(crate) cameras: CameraMatrices,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) packed_xy: Vec<u32>,
    pub(crate) presets: RenderPresets,
    pub(crate) scene_bounds: Aabb,
}

impl Renderer {
    /// Wrap an acceleration structure with a default 500x500 viewport.
    pub fn new(accel: Box<dyn RayQuery>) -> Self {
        let mut renderer = Self {
            accel,
            cameras: camera::camera_from_bounds(500, 500, &Aabb::new(Vec3A::ZERO, Vec3A::ONE)),
            width: 500,
            height: 500,
            packed_xy: Vec::new(),
            presets: RenderPresets::default(),
            scene_bounds: Aabb::new(Vec3A::ZERO, Vec3A::ONE),
        };
        renderer.set_viewport(500, 500);
        renderer
    }

    /// Resize the output image and rebuild the tile traversal order.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.packed_xy = tiling::build_traversal_order(self.width, self.height);
    }

    /// Replace the render presets.
    pub fn set_presets(&mut self, presets: RenderPresets) {
        self.presets = presets;
    }

    /// Current render presets.
    pub fn presets(&self) -> &RenderPresets {
        &self.presets
    }

    /// Viewport width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Viewport height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Committed acceleration structure.
    pub fn accel(&self) -> &dyn RayQuery {
        self.accel.as_ref()
    }

    /// Camera matrices currently driving ray generation.
    pub fn cameras(&self) -> &CameraMatrices {
        &self.cameras
    }

    /// Override the camera matrices (scene loading sets them normally).
    pub fn set_cameras(&mut self, cameras: CameraMatrices) {
        self.cameras = cameras;
    }

    /// Unexpanded scene bounds.
    pub fn scene_bounds(&self) -> &Aabb {
        &self.scene_bounds
    }

    /// Override the scene bounds (scene loading sets them normally).
    pub fn set_scene_bounds(&mut self, bounds: Aabb) {
        self.scene_bounds = bounds;
    }

    /// Scene bounds expanded by the preset margin.
    pub fn expanded_bounds(&self) -> Aabb {
        self.scene_bounds.expand(self.presets.bounds_margin)
    }

    /// Load a glTF scene into the owned structure and adopt its camera and
    /// bounds. On success the structure is committed and ready to query.
    pub fn load_scene(&mut self, path: &std::path::Path) -> Result<(), SceneError> {
        let data = scene::load_gltf(path, self.accel.as_mut(), self.width, self.height)?;
        self.scene_bounds = data.bounds;
        self.cameras = data.cameras;
        info!(
            "scene bounds: min=({:.3},{:.3},{:.3}) max=({:.3},{:.3},{:.3}), {} triangles",
            data.bounds.min.x,
            data.bounds.min.y,
            data.bounds.min.z,
            data.bounds.max.x,
            data.bounds.max.y,
            data.bounds.max.z,
            data.total_triangles
        );
        let commit_start = std::time::Instant::now();
        self.accel.commit();
        info!("acceleration structure committed in {:.2?}", commit_start.elapsed());
        Ok(())
    }

    /// Primary ray through the pixel stored at the given traversal slot.
    pub(crate) fn eye_ray_at(&self, packed: u32) -> Ray {
        let (x, y) = tiling::unpack_xy(packed);
        camera::eye_ray(x, y, self.width, self.height, &self.cameras)
    }

    /// Reference pass: cast one primary ray per pixel in tile order.
    ///
    /// Returns (color, depth) buffers in row-major pixel order. Hits are
    /// shaded by the decoded compressed normal; misses write color 0 and
    /// the [`MISS_DEPTH`] sentinel. Pixels are independent and processed
    /// in parallel.
    pub fn cast_block(&self) -> (Vec<u32>, Vec<f32>) {
        let pixel_count = (self.width * self.height) as usize;

        info!(
            "casting {} reference rays on {} threads...",
            pixel_count,
            rayon::current_num_threads()
        );
        let start = std::time::Instant::now();
        let pb = ProgressBar::new(pixel_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40} {pos}/{len} ETA: {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        // Shade in tile order for query locality, scatter to row-major after.
        let shaded: Vec<(u32, f32)> = self
            .packed_xy
            .par_iter()
            .map(|&packed| {
                let result = self.shade_reference(packed);
                pb.inc(1);
                result
            })
            .collect();
        pb.finish_and_clear();

        let mut color = vec![0u32; pixel_count];
        let mut depth = vec![0f32; pixel_count];
        for (&packed, &(c, d)) in self.packed_xy.iter().zip(shaded.iter()) {
            let (x, y) = tiling::unpack_xy(packed);
            let slot = (y * self.width + x) as usize;
            color[slot] = c;
            depth[slot] = d;
        }

        info!("reference pass finished in {:.2?}", start.elapsed());
        (color, depth)
    }

    fn shade_reference(&self, packed: u32) -> (u32, f32) {
        let ray = self.eye_ray_at(packed);

        if self.presets.measure_overhead {
            return (direction_to_color(ray.direction), 0.0);
        }

        let hit = self.accel.nearest_hit(&ray);
        if hit.is_hit() {
            (normal_to_color(unpack_normal(hit.packed_normal)), hit.t)
        } else {
            (0, MISS_DEPTH)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::BvhAccel;
    use glam::Mat4;

    fn quad_renderer() -> Renderer {
        // Quad covering [0,1]^2 at z=0, camera derived from its bounds.
        let mut accel = BvhAccel::new();
        let vertices = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(1.0, 0.0, 0.0),
            Vec3A::new(1.0, 1.0, 0.0),
            Vec3A::new(0.0, 1.0, 0.0),
        ];
        let indices = [0u32, 1, 2, 0, 2, 3];
        let geom = accel.add_geometry(&vertices, &indices);
        accel.add_instance(geom, Mat4::IDENTITY);
        accel.commit();

        let bounds = Aabb::new(Vec3A::new(0.0, 0.0, -0.5), Vec3A::new(1.0, 1.0, 0.5));
        let mut renderer = Renderer::new(Box::new(accel));
        renderer.set_viewport(64, 64);
        renderer.set_scene_bounds(bounds);
        renderer.set_cameras(camera::camera_from_bounds(64, 64, &bounds));
        renderer
    }

    #[test]
    fn center_pixel_hits_the_quad() {
        let renderer = quad_renderer();
        let (color, depth) = renderer.cast_block();
        let center = (32 * 64 + 32) as usize;
        // The quad faces +Z toward the camera: normal (0,0,1) shades to
        // (128, 128, 255).
        assert_eq!(color[center], pack_rgb(128, 128, 255));
        assert!(depth[center].is_finite());
        assert!(depth[center] > 0.0);
    }

    #[test]
    fn corner_pixel_misses() {
        let renderer = quad_renderer();
        let (color, depth) = renderer.cast_block();
        assert_eq!(color[0], 0);
        assert_eq!(depth[0], MISS_DEPTH);
    }

    #[test]
    fn overhead_mode_never_queries() {
        let mut renderer = quad_renderer();
        renderer.set_presets(RenderPresets {
            measure_overhead: true,
            ..RenderPresets::default()
        });
        let (color, depth) = renderer.cast_block();
        assert!(depth.iter().all(|&d| d == 0.0));
        // Every pixel carries |direction| shading, so the forward (blue)
        // channel dominates everywhere.
        let center = (32 * 64 + 32) as usize;
        assert!((color[center] & 0xFF) > 200);
    }

    #[test]
    fn buffers_cover_the_viewport() {
        let renderer = quad_renderer();
        let (color, depth) = renderer.cast_block();
        assert_eq!(color.len(), 64 * 64);
        assert_eq!(depth.len(), 64 * 64);
    }

    #[test]
    fn normal_color_matches_rounding_rule() {
        let n = Vec3A::new(0.5, 0.5, 1.0).normalize();
        let packed = normal_to_color(n);
        let expect = |c: f32| ((c + 1.0) / 2.0 * 255.0).round() as u32;
        assert_eq!(packed >> 16, expect(n.x));
        assert_eq!((packed >> 8) & 0xFF, expect(n.y));
        assert_eq!(packed & 0xFF, expect(n.z));
    }
}
