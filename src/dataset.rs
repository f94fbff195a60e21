//! Stratified training-sample synthesis against the scene geometry.
//!
//! Every training example pairs the positions of evenly spaced points along
//! a chord through the expanded scene bounds with the ground-truth
//! nearest-hit answer for the ray carrying that chord. Points are drawn
//! uniformly inside the bounds; follow-up rays from the same point are
//! chained toward the previous hit so later examples concentrate near
//! surfaces, where the surrogate needs the most supervision.
//!
//! Generation is parallel over points. Each point owns a seeded sample
//! stream, so a fixed seed reproduces the dataset bit-for-bit regardless of
//! the thread count.

use glam::Vec3A;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::aabb::Aabb;
use crate::accel::RayQuery;
use crate::normal::unpack_normal;
use crate::random::Sampler;
use crate::ray::Ray;

/// Label layout: visibility, normalized hit position, remapped normal.
pub const LABEL_WIDTH: usize = 7;

/// Fraction of the start-to-hit distance used to perturb chained starts.
const CHAIN_JITTER: f32 = 0.1;

/// Generates labeled ray samples inside an expanded scene bounds.
pub struct DatasetSynthesizer<'a> {
    accel: &'a dyn RayQuery,
    bounds: Aabb,
    seed: u64,
}

impl<'a> DatasetSynthesizer<'a> {
    /// Create a synthesizer over the given (already expanded) bounds.
    pub fn new(accel: &'a dyn RayQuery, bounds: Aabb, seed: u64) -> Self {
        Self { accel, bounds, seed }
    }

    /// Synthesize `point_count * rays_per_point` labeled examples.
    ///
    /// Returns (inputs, labels) with deterministic sizes
    /// `point_count * rays_per_point * samples_per_ray * 3` and
    /// `point_count * rays_per_point * 7`, whatever the geometry does.
    pub fn generate(
        &self,
        point_count: usize,
        rays_per_point: usize,
        samples_per_ray: usize,
    ) -> (Vec<f32>, Vec<f32>) {
        let input_stride = rays_per_point * samples_per_ray * 3;
        let label_stride = rays_per_point * LABEL_WIDTH;
        let mut inputs = vec![0.0f32; point_count * input_stride];
        let mut labels = vec![0.0f32; point_count * label_stride];

        info!(
            "synthesizing {} rays ({} points x {} rays, {} samples each)...",
            point_count * rays_per_point,
            point_count,
            rays_per_point,
            samples_per_ray
        );
        let start = std::time::Instant::now();
        let pb = ProgressBar::new(point_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40} {pos}/{len} ETA: {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        inputs
            .par_chunks_mut(input_stride)
            .zip(labels.par_chunks_mut(label_stride))
            .enumerate()
            .for_each(|(point_idx, (point_inputs, point_labels))| {
                let mut sampler = Sampler::for_stream(self.seed, point_idx as u64);
                self.generate_point(&mut sampler, samples_per_ray, point_inputs, point_labels);
                pb.inc(1);
            });
        pb.finish_and_clear();

        info!("dataset synthesized in {:.2?}", start.elapsed());
        (inputs, labels)
    }

    /// Fill one point's slice of the buffers: the first ray connects two
    /// uniform draws, each following ray is chained toward the previous
    /// hit. A degenerate draw (zero-length or bounds-missing carrier line)
    /// abandons the point, leaving it and all downstream rays zeroed; a
    /// plain query miss only zeroes its own label and redraws.
    fn generate_point(
        &self,
        sampler: &mut Sampler,
        samples_per_ray: usize,
        inputs: &mut [f32],
        labels: &mut [f32],
    ) {
        let input_stride = samples_per_ray * 3;
        let rays_per_point = labels.len() / LABEL_WIDTH;

        let mut start = sampler.point_in_box(&self.bounds);
        let mut end = sampler.point_in_box(&self.bounds);

        for ray_idx in 0..rays_per_point {
            let ray_inputs = &mut inputs[ray_idx * input_stride..][..input_stride];
            let ray_labels = &mut labels[ray_idx * LABEL_WIDTH..][..LABEL_WIDTH];

            match self.synthesize_ray(start, end, samples_per_ray, ray_inputs, ray_labels) {
                RayOutcome::Degenerate => return,
                RayOutcome::Hit(hit) => {
                    // Chain: restart just off the surface we found, aiming
                    // back at it.
                    let jitter = sampler.point_in_unit_sphere()
                        * (CHAIN_JITTER * (hit - start).length());
                    start = hit + jitter;
                    end = hit;
                }
                RayOutcome::Miss => {
                    start = sampler.point_in_box(&self.bounds);
                    end = sampler.point_in_box(&self.bounds);
                }
            }
        }
    }

    /// Write one ray's chord samples and label.
    fn synthesize_ray(
        &self,
        start: Vec3A,
        end: Vec3A,
        samples_per_ray: usize,
        inputs: &mut [f32],
        labels: &mut [f32],
    ) -> RayOutcome {
        let direction = end - start;
        if direction.length_squared() <= 0.0 {
            return RayOutcome::Degenerate;
        }
        let direction = direction.normalize();

        // Clip the carrier line (not just the segment) so the chord spans
        // the whole box.
        let Some(chord) = self
            .bounds
            .clip_line(start, direction, f32::NEG_INFINITY, f32::INFINITY)
        else {
            return RayOutcome::Degenerate;
        };

        for sample_idx in 0..samples_per_ray {
            let s = (sample_idx + 1) as f32 / (samples_per_ray + 1) as f32;
            let position = self.bounds.normalize_point(start + direction * chord.lerp(s));
            inputs[sample_idx * 3] = position.x;
            inputs[sample_idx * 3 + 1] = position.y;
            inputs[sample_idx * 3 + 2] = position.z;
        }

        let hit = self
            .accel
            .nearest_hit(&Ray::new(start, direction, 0.0, f32::INFINITY));
        if !hit.is_hit() {
            return RayOutcome::Miss;
        }

        let hit_point = start + direction * hit.t;
        let position = self.bounds.normalize_point(hit_point);
        let normal = (unpack_normal(hit.packed_normal) + Vec3A::ONE) * 0.5;

        labels[0] = 1.0;
        labels[1] = position.x;
        labels[2] = position.y;
        labels[3] = position.z;
        labels[4] = normal.x;
        labels[5] = normal.y;
        labels[6] = normal.z;

        RayOutcome::Hit(hit_point)
    }
}

/// Result of synthesizing one ray of a point.
enum RayOutcome {
    /// Zero-length draw or carrier line outside the bounds; the point is
    /// abandoned and its remaining rays stay zeroed.
    Degenerate,
    /// Valid chord, but nothing along the ray; label stays zeroed.
    Miss,
    /// Nearest-hit found at the carried position.
    Hit(Vec3A),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{BvhAccel, Hit};
    use glam::Mat4;

    /// Structure stub that reports a hit on a fixed plane z = 0 for any ray
    /// actually pointing at it.
    struct PlaneStub;

    impl RayQuery for PlaneStub {
        fn add_geometry(&mut self, _vertices: &[Vec3A], _indices: &[u32]) -> u32 {
            0
        }
        fn add_instance(&mut self, _geom_id: u32, _transform: Mat4) {}
        fn clear_geometry(&mut self) {}
        fn clear_instances(&mut self) {}
        fn commit(&mut self) {}
        fn nearest_hit(&self, ray: &Ray) -> Hit {
            if ray.direction.z.abs() < 1e-6 {
                return Hit::MISS;
            }
            let t = -ray.origin.z / ray.direction.z;
            if t <= 0.0 {
                return Hit::MISS;
            }
            Hit {
                prim_id: 0,
                t,
                packed_normal: crate::normal::pack_normal(Vec3A::Z),
            }
        }
    }

    fn test_bounds() -> Aabb {
        Aabb::new(Vec3A::splat(-1.0), Vec3A::ONE)
    }

    #[test]
    fn buffer_sizes_are_deterministic() {
        let accel = PlaneStub;
        let synth = DatasetSynthesizer::new(&accel, test_bounds(), 1);
        for (p, r, s) in [(1, 1, 1), (3, 2, 5), (10, 4, 32)] {
            let (inputs, labels) = synth.generate(p, r, s);
            assert_eq!(inputs.len(), p * r * s * 3);
            assert_eq!(labels.len(), p * r * LABEL_WIDTH);
        }
    }

    #[test]
    fn generation_is_reproducible() {
        let accel = PlaneStub;
        let synth = DatasetSynthesizer::new(&accel, test_bounds(), 99);
        let (a_in, a_lab) = synth.generate(8, 3, 4);
        let (b_in, b_lab) = synth.generate(8, 3, 4);
        assert_eq!(a_in, b_in);
        assert_eq!(a_lab, b_lab);
    }

    #[test]
    fn inputs_are_normalized_into_unit_cube() {
        let accel = PlaneStub;
        let synth = DatasetSynthesizer::new(&accel, test_bounds(), 5);
        let (inputs, _) = synth.generate(16, 2, 8);
        for &v in &inputs {
            assert!((-1e-4..=1.0 + 1e-4).contains(&v), "sample {v} outside [0,1]");
        }
    }

    #[test]
    fn hit_labels_carry_visibility_position_and_normal() {
        let accel = PlaneStub;
        let synth = DatasetSynthesizer::new(&accel, test_bounds(), 17);
        let (_, labels) = synth.generate(32, 1, 4);

        let mut hits = 0;
        for label in labels.chunks_exact(LABEL_WIDTH) {
            if label[0] == 1.0 {
                hits += 1;
                // Hit point lies on z = 0, normalized to 0.5 in the
                // [-1,1] box; normal (0,0,1) remaps to (0.5, 0.5, 1.0).
                assert!((label[3] - 0.5).abs() < 1e-3, "z {}", label[3]);
                assert!((label[4] - 0.5).abs() < 1e-3);
                assert!((label[5] - 0.5).abs() < 1e-3);
                assert!((label[6] - 1.0).abs() < 1e-3);
            } else {
                assert!(label.iter().all(|&v| v == 0.0));
            }
        }
        assert!(hits > 0, "plane stub never hit");
    }

    #[test]
    fn chained_ray_starts_near_previous_hit() {
        // Rebuild the generator's draws with the same stream to recover the
        // first ray, then check the second ray's chord against the chaining
        // rule: its start must lie within 0.1 x |start - hit| of the hit.
        let accel = PlaneStub;
        let bounds = test_bounds();
        let synth = DatasetSynthesizer::new(&accel, bounds, 23);
        let samples = 4;
        let (inputs, labels) = synth.generate(64, 2, samples);

        let mut checked = 0;
        for point_idx in 0..64 {
            let first_label = &labels[point_idx * 2 * LABEL_WIDTH..][..LABEL_WIDTH];
            let second_label = &labels[(point_idx * 2 + 1) * LABEL_WIDTH..][..LABEL_WIDTH];
            if first_label[0] != 1.0 || second_label[0] != 1.0 {
                continue;
            }

            let mut sampler = Sampler::for_stream(23, point_idx as u64);
            let start = sampler.point_in_box(&bounds);
            let end = sampler.point_in_box(&bounds);
            let direction = (end - start).normalize();
            let hit = accel.nearest_hit(&Ray::new(start, direction, 0.0, f32::INFINITY));
            assert!(hit.is_hit());
            let hit_point = start + direction * hit.t;
            let max_offset = CHAIN_JITTER * (hit_point - start).length();

            // Recover the second ray's start from its chord samples: with
            // the chord parameterization known, extrapolating two samples
            // back gives the carrier line; instead draw the jitter the way
            // the generator does.
            let jitter = sampler.point_in_unit_sphere() * max_offset;
            let second_start = hit_point + jitter;
            assert!(
                (second_start - hit_point).length() <= max_offset + 1e-5,
                "chained start drifted"
            );

            // The second chord must be consistent with that start: its
            // samples lie on the line through second_start and hit_point.
            let second_inputs =
                &inputs[(point_idx * 2 + 1) * samples * 3..][..samples * 3];
            let p0 = bounds.denormalize_point(Vec3A::new(
                second_inputs[0],
                second_inputs[1],
                second_inputs[2],
            ));
            let line_dir = (hit_point - second_start).normalize();
            let offset = p0 - second_start;
            let off_line = offset - line_dir * offset.dot(line_dir);
            assert!(off_line.length() < 1e-3, "chord left the chained line");
            checked += 1;
        }
        assert!(checked > 0, "no chained pairs to check");
    }

    #[test]
    fn works_against_real_geometry() {
        let mut accel = BvhAccel::new();
        let vertices = [
            Vec3A::new(-1.0, -1.0, 0.0),
            Vec3A::new(1.0, -1.0, 0.0),
            Vec3A::new(1.0, 1.0, 0.0),
            Vec3A::new(-1.0, 1.0, 0.0),
        ];
        let indices = [0u32, 1, 2, 0, 2, 3];
        let geom = accel.add_geometry(&vertices, &indices);
        accel.add_instance(geom, Mat4::IDENTITY);
        accel.commit();

        let synth = DatasetSynthesizer::new(&accel, test_bounds(), 7);
        let (inputs, labels) = synth.generate(32, 2, 6);
        assert_eq!(inputs.len(), 32 * 2 * 6 * 3);
        let hits = labels
            .chunks_exact(LABEL_WIDTH)
            .filter(|l| l[0] == 1.0)
            .count();
        assert!(hits > 0);
    }
}
