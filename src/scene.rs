//! glTF scene import.
//!
//! Feeds mesh geometry and instances into the acceleration structure and
//! extracts the camera matrices and aggregate scene bounds the renderer
//! needs. The node hierarchy is walked with an explicit worklist (node plus
//! accumulated transform) so deep scene graphs cannot exhaust the call
//! stack. Meshes are registered once per glTF mesh and re-instanced for
//! every node that references them.

use std::collections::HashMap;
use std::path::Path;

use glam::{Mat4, Vec3, Vec3A};
use log::{info, warn};
use thiserror::Error;

use crate::aabb::Aabb;
use crate::accel::RayQuery;
use crate::camera::{self, CameraMatrices};

/// Scene loading failures, fatal to the driver.
#[derive(Debug, Error)]
pub enum SceneError {
    /// The file could not be read or parsed as glTF.
    #[error("failed to import glTF scene: {0}")]
    Import(#[from] gltf::Error),
    /// The file parsed but contained no usable triangle geometry.
    #[error("scene contains no triangle geometry")]
    EmptyScene,
}

/// Everything the renderer adopts from a loaded scene.
#[derive(Debug, Clone, Copy)]
pub struct SceneData {
    /// Aggregate bounds of all instanced geometry.
    pub bounds: Aabb,
    /// Inverse projection/view matrices, from the scene camera or the
    /// bounds-derived fallback.
    pub cameras: CameraMatrices,
    /// False when the fallback camera was used.
    pub camera_found: bool,
    /// Total instanced triangle count.
    pub total_triangles: u64,
}

/// Load a glTF scene into `accel` (geometry and instances only; the caller
/// commits) and return the derived camera and bounds.
pub fn load_gltf(
    path: &Path,
    accel: &mut dyn RayQuery,
    width: u32,
    height: u32,
) -> Result<SceneData, SceneError> {
    let (document, buffers, _images) = gltf::import(path)?;

    accel.clear_geometry();
    accel.clear_instances();

    // Take the first perspective camera; orthographic cameras are not
    // supported for eye-ray generation.
    let aspect = width as f32 / height as f32;
    let mut proj_inv = None;
    let mut chosen_camera = None;
    for gltf_camera in document.cameras() {
        match gltf_camera.projection() {
            gltf::camera::Projection::Perspective(perspective) => {
                let proj = Mat4::perspective_rh(
                    perspective.yfov(),
                    perspective.aspect_ratio().unwrap_or(aspect),
                    perspective.znear(),
                    perspective.zfar().unwrap_or(1e4),
                );
                proj_inv = Some(proj.inverse());
                chosen_camera = Some(gltf_camera.index());
                break;
            }
            gltf::camera::Projection::Orthographic(_) => {
                warn!("orthographic camera ignored");
            }
        }
    }

    let mut bounds = Aabb::EMPTY;
    let mut world_view_inv = None;
    let mut total_triangles = 0u64;
    let mut mesh_cache: HashMap<usize, (u32, Aabb)> = HashMap::new();

    // Worklist traversal: pending nodes with their accumulated transform.
    let mut pending: Vec<(gltf::Node, Mat4)> = Vec::new();
    if let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) {
        for node in scene.nodes() {
            pending.push((node, Mat4::IDENTITY));
        }
    }

    while let Some((node, parent)) = pending.pop() {
        let transform = parent * Mat4::from_cols_array_2d(&node.transform().matrix());

        for child in node.children() {
            pending.push((child, transform));
        }

        if let Some(gltf_camera) = node.camera() {
            if Some(gltf_camera.index()) == chosen_camera {
                let eye = transform.transform_point3(Vec3::ZERO);
                let center = transform.transform_point3(Vec3::NEG_Z);
                let view = Mat4::look_at_rh(eye, center, Vec3::Y);
                world_view_inv = Some(view.inverse());
            }
        }

        let Some(mesh) = node.mesh() else {
            continue;
        };

        let entry = match mesh_cache.get(&mesh.index()) {
            Some(entry) => *entry,
            None => {
                let Some((geom_id, local_bounds, triangles)) =
                    register_mesh(&mesh, &buffers, accel)
                else {
                    continue;
                };
                info!("loaded mesh #{geom_id} ({triangles} triangles)");
                total_triangles += triangles;
                mesh_cache.insert(mesh.index(), (geom_id, local_bounds));
                (geom_id, local_bounds)
            }
        };

        let (geom_id, local_bounds) = entry;
        accel.add_instance(geom_id, transform);
        bounds.grow(&instance_bounds(transform, &local_bounds));
    }

    if !bounds.is_valid() {
        return Err(SceneError::EmptyScene);
    }

    let camera_found = proj_inv.is_some() && world_view_inv.is_some();
    let cameras = if camera_found {
        CameraMatrices {
            proj_inv: proj_inv.unwrap_or(Mat4::IDENTITY),
            world_view_inv: world_view_inv.unwrap_or(Mat4::IDENTITY),
        }
    } else {
        // No usable camera in the file: derive one from the bounds.
        camera::camera_from_bounds(width, height, &bounds)
    };

    let eye = cameras.eye_position();
    info!(
        "camera {} at ({:.3}, {:.3}, {:.3})",
        if camera_found { "from scene" } else { "derived from bounds" },
        eye.x,
        eye.y,
        eye.z
    );

    Ok(SceneData {
        bounds,
        cameras,
        camera_found,
        total_triangles,
    })
}

/// Concatenate a mesh's triangle primitives and register them as one
/// geometry. Returns None for meshes without positions or triangles.
fn register_mesh(
    mesh: &gltf::Mesh<'_>,
    buffers: &[gltf::buffer::Data],
    accel: &mut dyn RayQuery,
) -> Option<(u32, Aabb, u64)> {
    let mut vertices: Vec<Vec3A> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut local_bounds = Aabb::EMPTY;

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            warn!("non-triangle primitive ignored in mesh #{}", mesh.index());
            continue;
        }
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
        let Some(positions) = reader.read_positions() else {
            continue;
        };

        let base = vertices.len() as u32;
        for position in positions {
            let p = Vec3A::from_array(position);
            local_bounds.grow_point(p);
            vertices.push(p);
        }

        match reader.read_indices() {
            Some(read) => indices.extend(read.into_u32().map(|i| base + i)),
            // Unindexed primitive: consecutive vertex triples.
            None => indices.extend(base..vertices.len() as u32),
        }
    }

    if vertices.is_empty() || indices.len() < 3 {
        return None;
    }
    let triangles = (indices.len() / 3) as u64;
    let geom_id = accel.add_geometry(&vertices, &indices);
    Some((geom_id, local_bounds, triangles))
}

/// World-space bounds of an instanced mesh: the transformed local box.
///
/// All eight corners are transformed and re-aggregated; transforming only
/// the min/max corners would shear under rotation.
fn instance_bounds(transform: Mat4, local: &Aabb) -> Aabb {
    let mut out = Aabb::EMPTY;
    for i in 0..8 {
        let corner = Vec3A::new(
            if i & 1 == 0 { local.min.x } else { local.max.x },
            if i & 2 == 0 { local.min.y } else { local.max.y },
            if i & 4 == 0 { local.min.z } else { local.max.z },
        );
        out.grow_point(transform.transform_point3a(corner));
    }
    out
}
