//! Vertex and face removal.
//!
//! Removal compacts the buffers in place and rebuilds the surface ranges.
//! Vertex ids are preserved: an implicit-id mesh is given a relative id
//! channel before anything moves, so survivors keep their identity.
//!
//! Masks are meshes that only carry a 64-bit `VertexIndex` channel listing
//! vertex ids; [`remove_mask_inline`] removes the listed vertices.

use bit_vec::BitVec;
use rustc_hash::FxHashSet;

use crate::buffer::{kept_runs, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic};
use crate::error::{MeshError, Result};
use crate::mesh::{
    make_vertex_ids_relative, read_index, vertex_ids, write_index, IndexFormat, Mesh, MeshIndex,
    Surface, SurfaceSubMesh,
};

/// Remove culled vertices and the faces that use them.
///
/// A face is removed when all of its vertices are culled if
/// `remove_if_all_vertices_culled` is set, otherwise when any of them is.
/// A culled vertex still used by a kept face survives. Vertices that are not
/// culled always survive, even when no face uses them anymore.
///
/// An all-false cull set leaves the mesh untouched.
///
/// # Panics
/// Panics if `cull` does not have one bit per vertex.
///
/// # Example
///
/// ```
/// use bit_vec::BitVec;
/// use mutable_mesh::algo::remove::remove_vertices_with_cull_set;
/// use mutable_mesh::mesh::build_from_triangles;
/// use nalgebra::Vector3;
///
/// let positions = vec![
///     Vector3::new(0.0, 0.0, 0.0),
///     Vector3::new(1.0, 0.0, 0.0),
///     Vector3::new(0.0, 1.0, 0.0),
///     Vector3::new(1.0, 1.0, 0.0),
/// ];
/// let mut mesh = build_from_triangles(&positions, &[[0, 1, 2], [1, 3, 2]]).unwrap();
///
/// let mut cull = BitVec::from_elem(4, false);
/// cull.set(0, true);
/// remove_vertices_with_cull_set(&mut mesh, &cull, false);
///
/// assert_eq!(mesh.vertex_count(), 3);
/// assert_eq!(mesh.face_count(), 1);
/// ```
pub fn remove_vertices_with_cull_set(
    mesh: &mut Mesh,
    cull: &BitVec,
    remove_if_all_vertices_culled: bool,
) {
    let vertex_count = mesh.vertex_count();
    assert_eq!(
        cull.len(),
        vertex_count,
        "cull set has {} bits for {} vertices",
        cull.len(),
        vertex_count
    );
    if cull.none() {
        return;
    }

    make_vertex_ids_relative(mesh);

    let triangles = mesh.triangles();
    let mut kept_faces = BitVec::from_elem(triangles.len(), true);
    let mut kept_vertices = cull.clone();
    kept_vertices.negate();

    for (f, t) in triangles.iter().enumerate() {
        debug_assert!(t.iter().all(|&v| (v as usize) < vertex_count));
        let culled = t.iter().filter(|&&v| cull[v as usize]).count();
        let remove = if remove_if_all_vertices_culled {
            culled == 3
        } else {
            culled > 0
        };
        if remove {
            kept_faces.set(f, false);
        } else {
            for &v in t {
                kept_vertices.set(v as usize, true);
            }
        }
    }

    // Old vertex index to new, built from the runs of kept vertices.
    let mut remap = vec![u32::MAX; vertex_count];
    let mut next = 0u32;
    for (start, end) in kept_runs(&kept_vertices) {
        for slot in &mut remap[start..end] {
            *slot = next;
            next += 1;
        }
    }

    // Indices past the last whole triangle are dropped with the culled faces.
    let dangling = mesh.index_count() - triangles.len() * 3;
    if dangling > 0 {
        log::warn!("dropping {dangling} indices that don't form a triangle");
    }
    let mut kept_indices = BitVec::from_elem(mesh.index_count(), false);
    for f in 0..triangles.len() {
        if kept_faces[f] {
            for k in 0..3 {
                kept_indices.set(f * 3 + k, true);
            }
        }
    }
    mesh.index_buffers.compact_elements(&kept_indices);
    mesh.vertex_buffers.compact_elements(&kept_vertices);
    remap_indices(mesh, &remap);

    remove_recreate_surfaces(mesh, &kept_vertices, &kept_faces);
    debug_assert!(mesh.is_valid());
}

fn remap_indices(mesh: &mut Mesh, remap: &[u32]) {
    let Some(format) = mesh.index_format() else {
        return;
    };
    let count = mesh.index_count();
    let Some((buffer, _)) = mesh
        .index_buffers
        .find_channel(MeshBufferSemantic::VertexIndex, 0)
    else {
        return;
    };
    let data = mesh.index_buffers.buffer_data_mut(buffer);
    match format {
        IndexFormat::U16 => remap_index_data::<u16>(data, count, remap),
        IndexFormat::U32 => remap_index_data::<u32>(data, count, remap),
    }
}

fn remap_index_data<I: MeshIndex>(data: &mut [u8], count: usize, remap: &[u32]) {
    for i in 0..count {
        let old = read_index::<I>(data, i).to_usize();
        let new = remap[old];
        debug_assert_ne!(new, u32::MAX, "kept face uses removed vertex {old}");
        write_index(data, i, I::from_usize(new as usize));
    }
}

/// Rebuild the surface ranges after a removal.
///
/// `kept_vertices` and `kept_faces` are indexed by the vertex and face
/// indices before the removal. Each submesh keeps the vertices and faces of
/// its old range. Submeshes left empty are dropped, except the first submesh
/// of the first surface, and surfaces left without submeshes are dropped.
pub fn remove_recreate_surfaces(mesh: &mut Mesh, kept_vertices: &BitVec, kept_faces: &BitVec) {
    let count_set = |bits: &BitVec, begin: u32, end: u32| -> u32 {
        (begin as usize..(end as usize).min(bits.len()))
            .filter(|&i| bits[i])
            .count() as u32
    };

    let mut vertex_begin = 0u32;
    let mut index_begin = 0u32;
    let mut surfaces = Vec::with_capacity(mesh.surfaces.len());
    for (s, surface) in mesh.surfaces.iter().enumerate() {
        let mut sub_meshes = Vec::with_capacity(surface.sub_meshes.len());
        for (m, sub) in surface.sub_meshes.iter().enumerate() {
            let vertices = count_set(kept_vertices, sub.vertex_begin, sub.vertex_end);
            let indices = 3 * count_set(kept_faces, sub.index_begin / 3, sub.index_end / 3);
            if vertices == 0 && indices == 0 && !(s == 0 && m == 0) {
                continue;
            }
            sub_meshes.push(SurfaceSubMesh {
                vertex_begin,
                vertex_end: vertex_begin + vertices,
                index_begin,
                index_end: index_begin + indices,
                external_id: sub.external_id,
            });
            vertex_begin += vertices;
            index_begin += indices;
        }
        if !sub_meshes.is_empty() {
            surfaces.push(Surface {
                sub_meshes,
                ..surface.clone()
            });
        }
    }
    mesh.surfaces = surfaces;
}

/// A mask mesh listing `ids`.
///
/// The mask has one explicit 64-bit `VertexIndex` channel, no indices and a
/// single surface spanning its vertices.
pub fn mask_from_ids(ids: &[u64]) -> Mesh {
    let mut mask = Mesh::new();
    mask.vertex_buffers.set_element_count(ids.len());
    let b = mask.vertex_buffers.push_packed_buffer(&[MeshBufferChannel::new(
        MeshBufferSemantic::VertexIndex,
        0,
        MeshBufferFormat::UInt64,
        1,
        0,
    )]);
    let data = mask.vertex_buffers.buffer_data_mut(b);
    for (chunk, id) in data.chunks_exact_mut(8).zip(ids) {
        chunk.copy_from_slice(&id.to_le_bytes());
    }
    mask.surfaces = vec![Surface::single(SurfaceSubMesh {
        vertex_end: ids.len() as u32,
        ..SurfaceSubMesh::default()
    })];
    mask
}

/// Remove the vertices listed by `mask`, in place.
///
/// Returns [`MeshError::NoChange`] when no vertex of `mesh` is in the mask
/// and [`MeshError::EmptyMesh`] when `mesh` has no vertices.
pub fn remove_mask_inline(
    mesh: &mut Mesh,
    mask: &Mesh,
    remove_if_all_vertices_culled: bool,
) -> Result<()> {
    if mesh.vertex_count() == 0 {
        return Err(MeshError::EmptyMesh);
    }
    let masked: FxHashSet<u64> = vertex_ids(mask).into_iter().collect();
    if masked.is_empty() {
        return Err(MeshError::NoChange);
    }

    let mut cull = BitVec::from_elem(mesh.vertex_count(), false);
    for (v, id) in vertex_ids(mesh).into_iter().enumerate() {
        if masked.contains(&id) {
            cull.set(v, true);
        }
    }
    if cull.none() {
        return Err(MeshError::NoChange);
    }

    remove_vertices_with_cull_set(mesh, &cull, remove_if_all_vertices_culled);
    Ok(())
}

/// [`remove_mask_inline`] on a copy of `source`.
pub fn remove_mask(
    source: &Mesh,
    mask: &Mesh,
    remove_if_all_vertices_culled: bool,
) -> Result<Mesh> {
    let mut result = source.clone();
    remove_mask_inline(&mut result, mask, remove_if_all_vertices_culled)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, MeshBuilder, VertexIdMode};
    use nalgebra::Vector3;

    fn strip(prefix: u32) -> Mesh {
        // Four triangles in a row, two surfaces of two triangles each.
        let positions: Vec<_> = (0..6)
            .flat_map(|i| {
                [
                    Vector3::new(i as f32, 0.0, 0.0),
                    Vector3::new(i as f32, 1.0, 0.0),
                ]
            })
            .take(10)
            .collect();
        MeshBuilder::new()
            .positions(positions)
            .triangles(vec![[0, 2, 1], [1, 2, 3], [4, 6, 5], [5, 6, 7]])
            .surface(0..4, 0..6)
            .surface(4..10, 6..12)
            .id_prefix(prefix)
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_cull_set_is_identity() {
        let mut mesh = strip(1);
        let before = mesh.clone();
        remove_vertices_with_cull_set(&mut mesh, &BitVec::from_elem(10, false), false);
        assert_eq!(mesh.vertex_count(), before.vertex_count());
        assert_eq!(mesh.index_count(), before.index_count());
        assert_eq!(mesh.surfaces, before.surfaces);
        assert!(mesh.are_vertex_ids_implicit());
    }

    #[test]
    fn test_remove_any_culled() {
        let mut mesh = strip(3);
        let mut cull = BitVec::from_elem(10, false);
        cull.set(0, true);
        remove_vertices_with_cull_set(&mut mesh, &cull, false);

        assert_eq!(mesh.vertex_count(), 9);
        assert_eq!(mesh.face_count(), 3);
        assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Relative);
        assert_eq!(vertex_ids(&mesh)[0], (3u64 << 32) | 1);
        assert!(mesh.is_valid());
        assert_eq!(mesh.surfaces[0].sub_meshes[0].vertex_end, 3);
        assert_eq!(mesh.surfaces[0].sub_meshes[0].index_end, 3);
    }

    #[test]
    fn test_remove_all_culled_keeps_shared_vertices() {
        let mut mesh = strip(0);
        let mut cull = BitVec::from_elem(10, false);
        cull.set(0, true);
        cull.set(1, true);
        remove_vertices_with_cull_set(&mut mesh, &cull, true);

        // No face has all three vertices culled, so vertices 0 and 1 are still used.
        assert_eq!(mesh.vertex_count(), 10);
        assert_eq!(mesh.face_count(), 4);
    }

    #[test]
    fn test_emptied_surface_is_dropped() {
        let mut mesh = strip(0);
        let mut cull = BitVec::from_elem(10, false);
        for v in 4..10 {
            cull.set(v, true);
        }
        remove_vertices_with_cull_set(&mut mesh, &cull, false);

        assert_eq!(mesh.surfaces.len(), 1);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert!(mesh.is_valid());
    }

    #[test]
    fn test_first_submesh_survives_empty() {
        let mut mesh = strip(0);
        remove_vertices_with_cull_set(&mut mesh, &BitVec::from_elem(10, true), false);
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.surfaces.len(), 1);
        assert_eq!(mesh.surfaces[0].sub_meshes.len(), 1);
        assert!(mesh.surfaces[0].sub_meshes[0].is_empty());
    }

    #[test]
    fn test_trailing_indices_are_dropped() {
        let positions = [Vector3::zeros(), Vector3::x(), Vector3::y(), Vector3::new(1.0, 1.0, 0.0)];
        let mut mesh = build_from_triangles(&positions, &[[0, 1, 2], [1, 3, 2]]).unwrap();
        mesh.set_indices(&[0, 1, 2, 1, 3, 2, 0]);

        remove_vertices_with_cull_set(&mut mesh, &BitVec::from_fn(4, |v| v == 0), false);
        assert_eq!(mesh.indices(), vec![0, 2, 1]);
        assert!(mesh.is_valid());
    }

    #[test]
    fn test_remove_mask() {
        let mesh = strip(2);
        let mask = mask_from_ids(&[(2u64 << 32) | 8, (2u64 << 32) | 9]);
        let result = remove_mask(&mesh, &mask, false).unwrap();
        // No triangle uses vertices 8 and 9.
        assert_eq!(result.vertex_count(), 8);
        assert_eq!(result.face_count(), 4);

        let unrelated = mask_from_ids(&[99]);
        let err = remove_mask(&mesh, &unrelated, false).unwrap_err();
        assert!(err.is_no_op());
    }
}
