//! Binned-SAH bounding-volume hierarchy over instanced triangle meshes.
//!
//! Meshes are registered once and instanced with per-node transforms;
//! `commit` flattens every instance into world-space triangles, packs their
//! geometric normals, and builds a flat node array with an explicit task
//! stack. Traversal is likewise iterative: slab tests against node bounds,
//! Moller-Trumbore against leaf triangles, closest hit wins.

use glam::{Mat4, Vec3A};

use crate::aabb::Aabb;
use crate::normal::pack_normal;
use crate::ray::Ray;

use super::{Hit, RayQuery};

/// SAH bin count per axis.
const NUM_BINS: usize = 8;

/// Triangles per leaf before a split is forced.
const MAX_LEAF_SIZE: usize = 4;

/// Hard build-depth limit; keeps traversal inside its fixed stack.
const MAX_DEPTH: u32 = 60;

/// Determinant threshold below which a triangle is treated as edge-on.
const MT_EPSILON: f32 = 1e-8;

struct Mesh {
    vertices: Vec<Vec3A>,
    indices: Vec<u32>,
}

struct Instance {
    geom_id: u32,
    transform: Mat4,
}

/// World-space triangle with precomputed edges for intersection.
struct WorldTriangle {
    v0: Vec3A,
    e1: Vec3A,
    e2: Vec3A,
    packed_normal: u32,
}

impl WorldTriangle {
    fn bounds(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        b.grow_point(self.v0);
        b.grow_point(self.v0 + self.e1);
        b.grow_point(self.v0 + self.e2);
        b
    }

    fn centroid(&self) -> Vec3A {
        self.v0 + (self.e1 + self.e2) / 3.0
    }
}

/// Flat BVH node.
///
/// Internal node: `left_or_first` = left child index, `count` = 0 (right
/// child is `left_or_first + 1`). Leaf: `left_or_first` = first entry in
/// the reordered index list, `count` > 0.
struct BvhNode {
    bounds: Aabb,
    left_or_first: u32,
    count: u32,
}

/// Triangle-mesh BVH implementing the [`RayQuery`] capability.
#[derive(Default)]
pub struct BvhAccel {
    meshes: Vec<Mesh>,
    instances: Vec<Instance>,
    triangles: Vec<WorldTriangle>,
    nodes: Vec<BvhNode>,
    tri_indices: Vec<u32>,
}

impl BvhAccel {
    /// Create an empty structure; register geometry, then `commit`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of world-space triangles after the last commit.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    fn flatten_instances(&mut self) {
        self.triangles.clear();
        for instance in &self.instances {
            let Some(mesh) = self.meshes.get(instance.geom_id as usize) else {
                continue;
            };
            for tri in mesh.indices.chunks_exact(3) {
                let v0 = instance
                    .transform
                    .transform_point3a(mesh.vertices[tri[0] as usize]);
                let v1 = instance
                    .transform
                    .transform_point3a(mesh.vertices[tri[1] as usize]);
                let v2 = instance
                    .transform
                    .transform_point3a(mesh.vertices[tri[2] as usize]);

                let e1 = v1 - v0;
                let e2 = v2 - v0;
                let normal = e1.cross(e2);
                if normal.length_squared() <= 0.0 {
                    // Degenerate triangle, cannot be hit or shaded.
                    continue;
                }
                self.triangles.push(WorldTriangle {
                    v0,
                    e1,
                    e2,
                    packed_normal: pack_normal(normal),
                });
            }
        }
    }

    fn build(&mut self) {
        let n = self.triangles.len();
        self.nodes.clear();
        self.tri_indices = (0..n as u32).collect();
        if n == 0 {
            return;
        }

        let bounds: Vec<Aabb> = self.triangles.iter().map(|t| t.bounds()).collect();
        let centroids: Vec<Vec3A> = self.triangles.iter().map(|t| t.centroid()).collect();

        self.nodes.push(BvhNode {
            bounds: Aabb::EMPTY,
            left_or_first: 0,
            count: 0,
        });

        struct Task {
            node: usize,
            start: usize,
            end: usize,
            depth: u32,
        }

        let mut stack = vec![Task {
            node: 0,
            start: 0,
            end: n,
            depth: 0,
        }];

        while let Some(task) = stack.pop() {
            let span = &self.tri_indices[task.start..task.end];
            let count = span.len();

            let mut node_bounds = Aabb::EMPTY;
            let mut centroid_bounds = Aabb::EMPTY;
            for &idx in span {
                node_bounds.grow(&bounds[idx as usize]);
                centroid_bounds.grow_point(centroids[idx as usize]);
            }

            let split = if count <= MAX_LEAF_SIZE || task.depth >= MAX_DEPTH {
                None
            } else {
                find_best_split(span, &bounds, &centroids, &centroid_bounds)
                    .filter(|&(_, _, cost)| cost < count as f32 * node_bounds.area())
            };

            let Some((axis, split_pos, _)) = split else {
                self.nodes[task.node] = BvhNode {
                    bounds: node_bounds,
                    left_or_first: task.start as u32,
                    count: count as u32,
                };
                continue;
            };

            let local_mid = partition(&mut self.tri_indices[task.start..task.end], |&idx| {
                centroids[idx as usize][axis] < split_pos
            });
            // A one-sided partition would recurse forever; fall back to an
            // equal split.
            let mid = if local_mid == 0 || local_mid == count {
                task.start + count / 2
            } else {
                task.start + local_mid
            };

            let left = self.nodes.len();
            for _ in 0..2 {
                self.nodes.push(BvhNode {
                    bounds: Aabb::EMPTY,
                    left_or_first: 0,
                    count: 0,
                });
            }
            self.nodes[task.node] = BvhNode {
                bounds: node_bounds,
                left_or_first: left as u32,
                count: 0,
            };

            stack.push(Task {
                node: left + 1,
                start: mid,
                end: task.end,
                depth: task.depth + 1,
            });
            stack.push(Task {
                node: left,
                start: task.start,
                end: mid,
                depth: task.depth + 1,
            });
        }
    }
}

impl RayQuery for BvhAccel {
    fn add_geometry(&mut self, vertices: &[Vec3A], indices: &[u32]) -> u32 {
        let id = self.meshes.len() as u32;
        self.meshes.push(Mesh {
            vertices: vertices.to_vec(),
            indices: indices.to_vec(),
        });
        id
    }

    fn add_instance(&mut self, geom_id: u32, transform: Mat4) {
        self.instances.push(Instance { geom_id, transform });
    }

    fn clear_geometry(&mut self) {
        self.meshes.clear();
    }

    fn clear_instances(&mut self) {
        self.instances.clear();
    }

    fn commit(&mut self) {
        self.flatten_instances();
        self.build();
    }

    fn nearest_hit(&self, ray: &Ray) -> Hit {
        if self.nodes.is_empty() {
            return Hit::MISS;
        }

        let inv_dir = ray.direction.recip();
        let mut closest = ray.far;
        let mut best = Hit::MISS;

        let mut stack = [0u32; 64];
        let mut top = 0usize;
        stack[top] = 0;
        top += 1;

        while top > 0 {
            top -= 1;
            let node = &self.nodes[stack[top] as usize];
            if !slab_hit(&node.bounds, ray.origin, inv_dir, ray.near, closest) {
                continue;
            }

            if node.count > 0 {
                let first = node.left_or_first as usize;
                for &tri_id in &self.tri_indices[first..first + node.count as usize] {
                    let tri = &self.triangles[tri_id as usize];
                    if let Some(t) = intersect_triangle(ray, tri, ray.near, closest) {
                        closest = t;
                        best = Hit {
                            prim_id: tri_id,
                            t,
                            packed_normal: tri.packed_normal,
                        };
                    }
                }
            } else {
                // Fixed-depth stack; with <= 4 triangles per leaf this depth
                // is unreachable for any committable scene.
                debug_assert!(top + 2 <= stack.len());
                stack[top] = node.left_or_first;
                stack[top + 1] = node.left_or_first + 1;
                top += 2;
            }
        }

        best
    }
}

/// Slab test with a precomputed reciprocal direction.
#[inline]
fn slab_hit(bounds: &Aabb, origin: Vec3A, inv_dir: Vec3A, t_min: f32, t_max: f32) -> bool {
    let t0 = (bounds.min - origin) * inv_dir;
    let t1 = (bounds.max - origin) * inv_dir;
    let enter = t0.min(t1).max_element().max(t_min);
    let exit = t0.max(t1).min_element().min(t_max);
    enter <= exit
}

/// Moller-Trumbore intersection returning the hit parameter inside
/// (t_min, t_max), if any.
#[inline]
fn intersect_triangle(ray: &Ray, tri: &WorldTriangle, t_min: f32, t_max: f32) -> Option<f32> {
    let pvec = ray.direction.cross(tri.e2);
    let det = tri.e1.dot(pvec);
    if det.abs() < MT_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - tri.v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(tri.e1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = tri.e2.dot(qvec) * inv_det;
    if t <= t_min || t >= t_max {
        return None;
    }
    Some(t)
}

/// Stable-order partition; returns the number of elements satisfying `pred`.
fn partition<T, F: FnMut(&T) -> bool>(slice: &mut [T], mut pred: F) -> usize {
    let mut split = 0;
    for i in 0..slice.len() {
        if pred(&slice[i]) {
            slice.swap(split, i);
            split += 1;
        }
    }
    split
}

/// Binned SAH split search across all three axes.
///
/// Returns (axis, split position, cost), or None when the centroids are too
/// clustered to separate.
fn find_best_split(
    span: &[u32],
    bounds: &[Aabb],
    centroids: &[Vec3A],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let hi = centroid_bounds.max[axis];
        if hi - lo <= f32::EPSILON {
            continue;
        }
        let scale = NUM_BINS as f32 / (hi - lo);

        let mut bin_bounds = [Aabb::EMPTY; NUM_BINS];
        let mut bin_counts = [0usize; NUM_BINS];
        for &idx in span {
            let bin = (((centroids[idx as usize][axis] - lo) * scale) as usize).min(NUM_BINS - 1);
            bin_bounds[bin].grow(&bounds[idx as usize]);
            bin_counts[bin] += 1;
        }

        // Sweep suffix areas right-to-left, then prefix left-to-right.
        let mut right_area = [0.0f32; NUM_BINS];
        let mut acc = Aabb::EMPTY;
        let mut acc_count = 0usize;
        let mut right_count = [0usize; NUM_BINS];
        for i in (1..NUM_BINS).rev() {
            acc.grow(&bin_bounds[i]);
            acc_count += bin_counts[i];
            right_area[i] = if acc_count == 0 { 0.0 } else { acc.area() };
            right_count[i] = acc_count;
        }

        let mut left = Aabb::EMPTY;
        let mut left_count = 0usize;
        for i in 0..NUM_BINS - 1 {
            left.grow(&bin_bounds[i]);
            left_count += bin_counts[i];
            if left_count == 0 || right_count[i + 1] == 0 {
                continue;
            }
            let cost = left_count as f32 * left.area()
                + right_count[i + 1] as f32 * right_area[i + 1];
            if best.map_or(true, |(_, _, c)| cost < c) {
                let split_pos = lo + (i + 1) as f32 / scale;
                best = Some((axis, split_pos, cost));
            }
        }
    }

    best
}
