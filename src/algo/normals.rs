//! Normal and tangent recomputation.

use nalgebra::Vector3;

use crate::buffer::{MeshBufferSemantic, UntypedMeshBufferIterator};
use crate::error::{MeshError, Result};
use crate::geometry::triangle_cross;
use crate::mesh::Mesh;

/// Area-weighted vertex normals of `positions` over `triangles`.
///
/// Vertices are not collapsed, so seams and hard edges stay as authored.
/// Vertices without faces get a zero normal.
pub fn vertex_normals(positions: &[Vector3<f32>], triangles: &[[u32; 3]]) -> Vec<Vector3<f32>> {
    let mut normals = vec![Vector3::zeros(); positions.len()];
    for t in triangles {
        let [a, b, c] = t.map(|v| positions[v as usize]);
        // Cross product length is twice the area, so this is area weighted.
        let n = triangle_cross(&a, &b, &c);
        for &v in t {
            normals[v as usize] += n;
        }
    }
    for n in &mut normals {
        *n = n.try_normalize(1e-20).unwrap_or_else(Vector3::zeros);
    }
    normals
}

/// Recompute the normals of `mesh` from its positions, in place.
///
/// Tangents, if present, are re-orthogonalized against the new normals
/// keeping their sign. Vertices without faces keep their normal.
///
/// Returns [`MeshError::MissingChannel`] without a position or normal
/// channel and [`MeshError::EmptyMesh`] without faces.
pub fn recompute_normals(mesh: &mut Mesh) -> Result<()> {
    let positions = mesh.positions().ok_or(MeshError::MissingChannel {
        semantic: MeshBufferSemantic::Position,
    })?;
    if !mesh.has_vertex_channel(MeshBufferSemantic::Normal, 0) {
        return Err(MeshError::MissingChannel {
            semantic: MeshBufferSemantic::Normal,
        });
    }
    if mesh.face_count() == 0 {
        return Err(MeshError::EmptyMesh);
    }

    let normals = vertex_normals(&positions, &mesh.triangles());
    {
        let mut it =
            UntypedMeshBufferIterator::new(&mut mesh.vertex_buffers, MeshBufferSemantic::Normal, 0);
        for n in &normals {
            if *n != Vector3::zeros() {
                it.set_from_vec3f(n);
            }
            it.inc();
        }
    }

    let mut tangents =
        UntypedMeshBufferIterator::new(&mut mesh.vertex_buffers, MeshBufferSemantic::Tangent, 0);
    if tangents.ptr().is_some() {
        for n in &normals {
            if *n != Vector3::zeros() {
                let t = tangents.get_as_vec3f();
                if let Some(t) = (t - n * n.dot(&t)).try_normalize(1e-12) {
                    tangents.set_from_vec3f(&t);
                }
            }
            tangents.inc();
        }
    }
    Ok(())
}
