//! Surrogate-model rendering pass.
//!
//! Culls each pixel against the expanded scene bounds, gathers chord
//! samples for the surviving rays into one flat batch, evaluates the
//! surrogate model exactly once per image, and composites its per-ray
//! outputs into the final packed-color buffer. Pixels whose rays miss the
//! bounds (or whose chord is shorter than the minimum extent) never reach
//! the model and stay background.

use glam::Vec3A;
use log::info;
use rayon::prelude::*;

use crate::camera;
use crate::model::SurrogateModel;
use crate::renderer::{normal_to_color, Renderer, MISS_DEPTH};

impl Renderer {
    /// Render the viewport through the surrogate model.
    ///
    /// Returns (color, depth) buffers in row-major pixel order. Depth is
    /// the distance from the camera position to the denormalized hit
    /// position, or [`MISS_DEPTH`] for background pixels. The model is
    /// invoked in a single batched `evaluate` call; per-pixel evaluation is
    /// deliberately not supported.
    pub fn render_via_model(&self, model: &dyn SurrogateModel) -> (Vec<u32>, Vec<f32>) {
        let bounds = self.expanded_bounds();
        let samples_per_ray = self.presets.samples_per_ray;
        let min_segment = bounds.extent().min_element() * self.presets.bounds_margin;
        let pixel_count = (self.width * self.height) as usize;
        let eye = self.cameras.eye_position();

        let start = std::time::Instant::now();

        // Classify every pixel and gather its chord samples. Rays that
        // clip to a too-short segment are "outside" and contribute nothing.
        let features: Vec<Option<Vec<f32>>> = (0..pixel_count)
            .into_par_iter()
            .map(|idx| {
                let x = idx as u32 % self.width;
                let y = idx as u32 / self.width;
                let ray = camera::eye_ray(x, y, self.width, self.height, &self.cameras);

                let segment = bounds.clip_line(ray.origin, ray.direction, ray.near, ray.far)?;
                if segment.size() < min_segment {
                    return None;
                }

                let mut chord = Vec::with_capacity(samples_per_ray * 3);
                for sample_idx in 0..samples_per_ray {
                    let s = (sample_idx + 1) as f32 / (samples_per_ray + 1) as f32;
                    let position = bounds.normalize_point(ray.at(segment.lerp(s)));
                    chord.extend_from_slice(&[position.x, position.y, position.z]);
                }
                Some(chord)
            })
            .collect();

        // Pack the surviving rays into one dense batch, remembering each
        // pixel's row.
        let mut batch = Vec::new();
        let mut batch_row = vec![usize::MAX; pixel_count];
        let mut rows = 0usize;
        for (idx, chord) in features.iter().enumerate() {
            if let Some(chord) = chord {
                batch.extend_from_slice(chord);
                batch_row[idx] = rows;
                rows += 1;
            }
        }
        info!(
            "surrogate batch: {} of {} rays inside bounds ({:.2?} to assemble)",
            rows,
            pixel_count,
            start.elapsed()
        );

        let eval_start = std::time::Instant::now();
        let outputs = if rows == 0 {
            Vec::new()
        } else {
            model.evaluate(&batch)
        };
        info!("surrogate evaluated in {:.2?}", eval_start.elapsed());

        let output_width = model.output_width();
        let composite_start = std::time::Instant::now();
        let composited: Vec<(u32, f32)> = batch_row
            .par_iter()
            .map(|&row| {
                if row == usize::MAX {
                    return (0, MISS_DEPTH);
                }
                let slice = &outputs[row * output_width..][..output_width];
                composite_output(slice, &bounds, eye)
            })
            .collect();
        info!("composited in {:.2?}", composite_start.elapsed());

        composited.into_iter().unzip()
    }
}

/// Turn one model output row into a packed color and depth.
///
/// Visibility below 0.5 is background. The position channels are
/// denormalized by the box extent, the normal channels by `n*2 - 1` and a
/// renormalize; a NaN normal (all-zero output) composites as background.
fn composite_output(output: &[f32], bounds: &crate::aabb::Aabb, eye: Vec3A) -> (u32, f32) {
    if output[0] < 0.5 {
        return (0, MISS_DEPTH);
    }

    let position = bounds.denormalize_point(Vec3A::new(output[1], output[2], output[3]));
    let normal = (Vec3A::new(output[4], output[5], output[6]) * 2.0 - Vec3A::ONE).normalize();
    if !normal.is_finite() {
        return (0, MISS_DEPTH);
    }

    (normal_to_color(normal), (position - eye).length())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::Aabb;
    use crate::accel::{BvhAccel, RayQuery};
    use crate::camera::CameraMatrices;
    use crate::dataset::LABEL_WIDTH;
    use crate::model::TrainConfig;
    use crate::renderer::pack_rgb;
    use glam::{Mat4, Vec3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Model stub answering every row with a fixed output.
    struct FixedModel {
        row: [f32; LABEL_WIDTH],
        rows_seen: AtomicUsize,
        calls: AtomicUsize,
        input_width: usize,
    }

    impl FixedModel {
        fn new(row: [f32; LABEL_WIDTH], input_width: usize) -> Self {
            Self {
                row,
                rows_seen: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                input_width,
            }
        }
    }

    impl SurrogateModel for FixedModel {
        fn input_width(&self) -> usize {
            self.input_width
        }
        fn output_width(&self) -> usize {
            LABEL_WIDTH
        }
        fn train(&mut self, _inputs: &[f32], _labels: &[f32], _config: &TrainConfig) {}
        fn evaluate(&self, inputs: &[f32]) -> Vec<f32> {
            let rows = inputs.len() / self.input_width;
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.rows_seen.fetch_add(rows, Ordering::Relaxed);
            self.row.repeat(rows)
        }
    }

    fn unit_box_renderer() -> Renderer {
        let mut accel = BvhAccel::new();
        accel.commit();
        let mut renderer = Renderer::new(Box::new(accel));
        renderer.set_viewport(16, 16);
        renderer.set_scene_bounds(Aabb::new(Vec3A::ZERO, Vec3A::ONE));
        renderer
    }

    #[test]
    fn rays_missing_the_bounds_stay_background() {
        // Eye beyond the +X face of the expanded box, looking further +X:
        // every ray (the central one exactly axis-parallel) points away.
        let mut renderer = unit_box_renderer();
        let view = Mat4::look_at_rh(
            Vec3::new(2.0, 0.5, 0.5),
            Vec3::new(3.0, 0.5, 0.5),
            Vec3::Y,
        );
        let proj = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0);
        renderer.set_cameras(CameraMatrices {
            proj_inv: proj.inverse(),
            world_view_inv: view.inverse(),
        });

        // The model claims everything is visible; culling must win anyway.
        let model = FixedModel::new([1.0, 0.5, 0.5, 0.5, 0.75, 0.75, 1.0], 32 * 3);
        let (color, depth) = renderer.render_via_model(&model);

        assert!(color.iter().all(|&c| c == 0));
        assert!(depth.iter().all(|&d| d == MISS_DEPTH));
        assert_eq!(model.rows_seen.load(Ordering::Relaxed), 0, "pixel leaked into the batch");
        assert_eq!(model.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn fixed_visible_output_decodes_to_expected_color() {
        let mut renderer = unit_box_renderer();
        renderer.set_cameras(camera::camera_from_bounds(16, 16, renderer.scene_bounds()));

        let samples = renderer.presets().samples_per_ray;
        let model = FixedModel::new([1.0, 0.5, 0.5, 0.5, 0.75, 0.75, 1.0], samples * 3);
        let (color, depth) = renderer.render_via_model(&model);

        // Encoded normal (0.75, 0.75, 1.0) decodes to (0.5, 0.5, 1.0);
        // after normalization each 8-bit channel is round((c+1)/2*255).
        let expected = {
            let n = Vec3A::new(0.5, 0.5, 1.0).normalize();
            let ch = |c: f32| ((c + 1.0) / 2.0 * 255.0).round() as u8;
            pack_rgb(ch(n.x), ch(n.y), ch(n.z))
        };
        assert_eq!(expected, pack_rgb(180, 180, 232));

        let center = (8 * 16 + 8) as usize;
        assert_eq!(color[center], expected);

        // Depth is the camera distance to the denormalized (0.5,0.5,0.5),
        // which is the box center.
        let eye = renderer.cameras().eye_position();
        let hit = renderer.expanded_bounds().denormalize_point(Vec3A::splat(0.5));
        assert!((depth[center] - (hit - eye).length()).abs() < 1e-3);
    }

    #[test]
    fn invisible_output_is_background_even_inside_bounds() {
        let mut renderer = unit_box_renderer();
        renderer.set_cameras(camera::camera_from_bounds(16, 16, renderer.scene_bounds()));

        let samples = renderer.presets().samples_per_ray;
        let model = FixedModel::new([0.2, 0.5, 0.5, 0.5, 0.75, 0.75, 1.0], samples * 3);
        let (color, _) = renderer.render_via_model(&model);
        assert!(color.iter().all(|&c| c == 0));
        assert!(model.rows_seen.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn batch_rows_match_chord_layout() {
        let mut renderer = unit_box_renderer();
        renderer.set_cameras(camera::camera_from_bounds(16, 16, renderer.scene_bounds()));

        let samples = renderer.presets().samples_per_ray;
        let model = FixedModel::new([1.0; LABEL_WIDTH], samples * 3);
        let _ = renderer.render_via_model(&model);

        let rows = model.rows_seen.load(Ordering::Relaxed);
        assert!(rows > 0 && rows <= 16 * 16);
        assert_eq!(model.calls.load(Ordering::Relaxed), 1, "evaluate must be batched");
    }
}
