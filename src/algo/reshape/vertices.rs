//! Vertex pass of the reshape.

use nalgebra::{Vector3, Vector4};
use rayon::prelude::*;

use super::{read_point_bindings, DriftCounter, Evaluated, ShapeSurface, PARALLEL_BATCH};
use crate::buffer::iter::{read_channel_vec3f, read_channel_vec4f, write_channel_vec3f};
use crate::buffer::{MeshBufferSemantic, UntypedMeshBufferIterator, UntypedMeshBufferIteratorConst};
use crate::mesh::Mesh;

/// Vertex data the pass reads and writes.
struct VertexFrames {
    positions: Vec<Vector3<f32>>,
    normals: Option<Vec<Vector3<f32>>>,
    tangents: Option<Vec<Vector4<f32>>>,
    binormals: Option<Vec<Vector3<f32>>>,
}

/// New values of one vertex.
#[derive(Debug, Clone, Copy)]
struct Reshaped {
    position: Vector3<f32>,
    normal: Option<Vector3<f32>>,
    tangent: Option<Vector3<f32>>,
    binormal: Option<Vector3<f32>>,
}

fn from_frame(frame: &[Vector3<f32>; 3], local: &Vector3<f32>) -> Vector3<f32> {
    frame[0] * local.x + frame[1] * local.y + frame[2] * local.z
}

fn read_weights(mesh: &Mesh) -> Option<Vec<f32>> {
    let mut it = UntypedMeshBufferIteratorConst::new(
        &mesh.vertex_buffers,
        MeshBufferSemantic::ShapeBindingWeight,
        0,
    );
    it.ptr()?;
    let mut weights = Vec::with_capacity(mesh.vertex_count());
    for _ in 0..mesh.vertex_count() {
        weights.push(it.get_component_f32(0).clamp(0.0, 1.0));
        it.inc();
    }
    Some(weights)
}

/// Reshape the vertices of `mesh`. Returns `false` without binding channels.
pub(crate) fn reshape_vertices(mesh: &mut Mesh, surface: &ShapeSurface, parallel: bool) -> bool {
    let Some(bindings) = read_point_bindings(&mesh.vertex_buffers) else {
        return false;
    };
    let Some(positions) = mesh.positions() else {
        return false;
    };
    let buffers = &mesh.vertex_buffers;
    let frames = VertexFrames {
        positions,
        normals: read_channel_vec3f(buffers, MeshBufferSemantic::Normal, 0),
        tangents: read_channel_vec4f(buffers, MeshBufferSemantic::Tangent, 0),
        binormals: read_channel_vec3f(buffers, MeshBufferSemantic::Binormal, 0),
    };
    let local_normals = read_channel_vec3f(buffers, MeshBufferSemantic::ShapeBindingNormal, 0);
    let local_tangents = read_channel_vec3f(buffers, MeshBufferSemantic::ShapeBindingNormal, 1);
    let weights = read_weights(mesh);

    let reshape_one = |v: usize| -> Option<Reshaped> {
        let binding = &bindings[v];
        let Evaluated::Point(target) = surface.evaluate(binding) else {
            return None;
        };
        let weight = weights.as_ref().map_or(1.0, |w| w[v]);
        let frame = surface.frame(binding.triangle as usize);
        let position = frames.positions[v].lerp(&target, weight);

        let old_normal = frames.normals.as_ref().map(|n| n[v]);
        let normal = match (old_normal, &local_normals) {
            (Some(old), Some(local)) => {
                let new = from_frame(&frame, &local[v]);
                Some(
                    old.lerp(&new, weight)
                        .try_normalize(1e-12)
                        .unwrap_or(old),
                )
            }
            (old, _) => old,
        };

        let old_tangent = frames.tangents.as_ref().map(|t| t[v].xyz());
        let tangent = match (old_tangent, &local_tangents) {
            (Some(old), Some(local)) => {
                let mut t = old.lerp(&from_frame(&frame, &local[v]), weight);
                if let Some(n) = normal {
                    t -= n * n.dot(&t);
                }
                Some(t.try_normalize(1e-12).unwrap_or(old))
            }
            (old, _) => old,
        };

        // Keep the handedness of the original tangent basis.
        let binormal = match (frames.binormals.as_ref(), old_normal, old_tangent, normal, tangent) {
            (Some(b), Some(on), Some(ot), Some(n), Some(t)) => {
                let sign = if on.cross(&ot).dot(&b[v]) < 0.0 { -1.0 } else { 1.0 };
                Some(n.cross(&t) * sign)
            }
            _ => None,
        };

        Some(Reshaped {
            position,
            normal,
            tangent,
            binormal,
        })
    };

    let count = frames.positions.len();
    let reshaped: Vec<Option<Reshaped>> = if parallel {
        (0..count)
            .into_par_iter()
            .with_min_len(PARALLEL_BATCH)
            .map(reshape_one)
            .collect()
    } else {
        (0..count).map(reshape_one).collect()
    };

    let drift = DriftCounter {
        out_of_range: bindings
            .iter()
            .filter(|b| b.is_bound() && b.triangle as usize >= surface.triangles.len())
            .count(),
    };
    drift.warn("vertex", surface.triangles.len());

    let VertexFrames {
        mut positions,
        mut normals,
        tangents,
        mut binormals,
    } = frames;
    for (v, r) in reshaped.iter().enumerate() {
        let Some(r) = r else { continue };
        positions[v] = r.position;
        if let (Some(n), Some(new)) = (normals.as_mut(), r.normal) {
            n[v] = new;
        }
        if let (Some(b), Some(new)) = (binormals.as_mut(), r.binormal) {
            b[v] = new;
        }
    }

    let buffers = &mut mesh.vertex_buffers;
    write_channel_vec3f(buffers, MeshBufferSemantic::Position, 0, &positions);
    if let Some(normals) = normals {
        write_channel_vec3f(buffers, MeshBufferSemantic::Normal, 0, &normals);
    }
    if let Some(binormals) = binormals {
        write_channel_vec3f(buffers, MeshBufferSemantic::Binormal, 0, &binormals);
    }
    if tangents.is_some() {
        // Three component writes keep the tangent sign in `w`.
        let mut it = UntypedMeshBufferIterator::new(buffers, MeshBufferSemantic::Tangent, 0);
        for r in &reshaped {
            if let Some(t) = r.and_then(|r| r.tangent) {
                it.set_from_vec3f(&t);
            }
            it.inc();
        }
    }
    true
}
