//! Morph target extraction.

use crate::buffer::{
    MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet,
    UntypedMeshBufferIterator, UntypedMeshBufferIteratorConst,
};
use crate::error::{MeshError, Result};
use crate::mesh::{vertex_ids, Mesh, Surface, SurfaceSubMesh};

/// Deltas smaller than this in every component are treated as zero.
pub const DIFFERENCE_EPSILON: f32 = 1e-5;

/// Sparse morph target taking `base` to `target`.
///
/// Both meshes must have the same vertex count; vertex `i` of `base` is
/// compared with vertex `i` of `target`. `channels` selects the channels to
/// compare. When it is empty every geometric channel present in both meshes
/// is compared, texture coordinates only if `ignore_texture_coords` is not
/// set.
///
/// The result holds one Float32 delta channel per compared channel plus the
/// ids of the vertices with a non-zero delta, in the id mode of `base`. It
/// has no indices and one surface spanning its vertices. Identical meshes
/// give an empty target.
///
/// # Example
///
/// ```
/// use mutable_mesh::algo::difference::difference;
/// use mutable_mesh::mesh::build_from_triangles;
/// use nalgebra::Vector3;
///
/// let positions = [Vector3::zeros(), Vector3::x(), Vector3::y()];
/// let base = build_from_triangles(&positions, &[[0, 1, 2]]).unwrap();
/// let target = difference(&base, &base, &[], false).unwrap();
/// assert_eq!(target.vertex_count(), 0);
/// assert_eq!(target.surfaces.len(), 1);
/// ```
pub fn difference(
    base: &Mesh,
    target: &Mesh,
    channels: &[(MeshBufferSemantic, i32)],
    ignore_texture_coords: bool,
) -> Result<Mesh> {
    let vertex_count = base.vertex_count();
    if vertex_count == 0 {
        return Err(MeshError::EmptyMesh);
    }
    if target.vertex_count() != vertex_count {
        return Err(MeshError::IncompatibleMeshes {
            reason: "difference needs meshes with the same vertex count",
        });
    }

    let compared: Vec<(MeshBufferSemantic, i32, u16)> = if channels.is_empty() {
        base.vertex_buffers
            .buffers()
            .iter()
            .flat_map(|b| b.channels.iter())
            .filter(|c| c.semantic.is_geometric())
            .filter(|c| !(ignore_texture_coords && c.semantic == MeshBufferSemantic::TexCoords))
            .filter(|c| target.has_vertex_channel(c.semantic, c.semantic_index))
            .map(|c| (c.semantic, c.semantic_index, delta_components(c)))
            .collect()
    } else {
        channels
            .iter()
            .filter_map(|&(semantic, index)| {
                let (b, c) = base.vertex_buffers.find_channel(semantic, index)?;
                if !target.has_vertex_channel(semantic, index) {
                    return None;
                }
                let channel = base.vertex_buffers.channel(b, c);
                Some((semantic, index, delta_components(channel)))
            })
            .collect()
    };

    // Per vertex deltas, channel after channel.
    let stride: usize = compared.iter().map(|c| c.2 as usize).sum();
    let mut deltas = vec![0.0f32; vertex_count * stride];
    let mut offset = 0usize;
    for &(semantic, index, components) in &compared {
        let mut from = UntypedMeshBufferIteratorConst::new(&base.vertex_buffers, semantic, index);
        let mut to = UntypedMeshBufferIteratorConst::new(&target.vertex_buffers, semantic, index);
        for v in 0..vertex_count {
            let d = to.get_as_vec4f() - from.get_as_vec4f();
            for k in 0..components as usize {
                deltas[v * stride + offset + k] = d[k];
            }
            from.inc();
            to.inc();
        }
        offset += components as usize;
    }

    let kept: Vec<usize> = (0..vertex_count)
        .filter(|&v| {
            deltas[v * stride..(v + 1) * stride]
                .iter()
                .any(|d| d.abs() > DIFFERENCE_EPSILON)
        })
        .collect();

    let mut result = Mesh::new();
    result.vertex_buffers = MeshBufferSet::new();
    result.vertex_buffers.set_element_count(kept.len());
    if !compared.is_empty() {
        let delta_channels: Vec<MeshBufferChannel> = compared
            .iter()
            .map(|&(semantic, index, components)| {
                MeshBufferChannel::new(semantic, index, MeshBufferFormat::Float32, components, 0)
            })
            .collect();
        result.vertex_buffers.push_packed_buffer(&delta_channels);
        let mut offset = 0usize;
        for &(semantic, index, components) in &compared {
            let mut it = UntypedMeshBufferIterator::new(&mut result.vertex_buffers, semantic, index);
            for &v in &kept {
                for k in 0..components as usize {
                    it.set_component_f32(k, deltas[v * stride + offset + k]);
                }
                it.inc();
            }
            offset += components as usize;
        }
    }

    let explicit = base.are_vertex_ids_explicit();
    result.vertex_buffers.push_packed_buffer(&[MeshBufferChannel::new(
        MeshBufferSemantic::VertexIndex,
        0,
        if explicit {
            MeshBufferFormat::UInt64
        } else {
            MeshBufferFormat::UInt32
        },
        1,
        0,
    )]);
    let ids = vertex_ids(base);
    {
        let mut it =
            UntypedMeshBufferIterator::new(&mut result.vertex_buffers, MeshBufferSemantic::VertexIndex, 0);
        for &v in &kept {
            if explicit {
                it.set_from_u64(ids[v]);
            } else {
                it.set_from_u32(ids[v] as u32);
            }
            it.inc();
        }
    }
    result.mesh_id_prefix = if explicit { 0 } else { base.mesh_id_prefix };

    result.surfaces = vec![Surface::single(SurfaceSubMesh {
        vertex_end: kept.len() as u32,
        ..SurfaceSubMesh::default()
    })];

    log::debug!(
        "difference keeps {} of {} vertices over {} channels",
        kept.len(),
        vertex_count,
        compared.len()
    );
    Ok(result)
}

/// Float components stored for the delta of `channel`.
fn delta_components(channel: &MeshBufferChannel) -> u16 {
    if channel.semantic.is_direction() {
        3
    } else {
        channel.component_count.min(4)
    }
}
