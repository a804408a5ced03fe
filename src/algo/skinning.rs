//! Skinning data optimisation.

use crate::buffer::convert::{read_component_u64, write_component_u64};
use crate::buffer::{MeshBuffer, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet};
use crate::error::{MeshError, Result};
use crate::mesh::Mesh;

/// Largest number of bones addressable with 8-bit bone indices.
const MAX_8BIT_BONES: usize = 256;

/// Number of bone map entries a bone index can address in `mesh`.
///
/// Uses the per-surface bone map ranges when the surfaces have them,
/// otherwise the whole bone map.
pub fn max_bone_map_count(mesh: &Mesh) -> usize {
    let per_surface = mesh
        .surfaces
        .iter()
        .map(|s| s.bone_map_count as usize)
        .max()
        .unwrap_or(0);
    if per_surface > 0 {
        per_surface
    } else {
        mesh.bone_map.len()
    }
}

/// Narrow 16-bit or wider bone indices to 8 bits when every bone fits.
///
/// Only the buffers holding `BoneIndices` channels are rebuilt, every other
/// channel keeps its format and bytes. Returns [`MeshError::NoChange`] when
/// the indices are already 8-bit or the bone map is too large, and
/// [`MeshError::MissingChannel`] without bone indices.
///
/// # Example
///
/// ```
/// use mutable_mesh::algo::skinning::optimize_skinning;
/// use mutable_mesh::buffer::{MeshBufferFormat, UntypedMeshBufferIteratorConst, MeshBufferSemantic};
/// use mutable_mesh::mesh::{BoneName, MeshBuilder};
/// use nalgebra::Vector3;
///
/// let mesh = MeshBuilder::new()
///     .positions(vec![Vector3::zeros(), Vector3::x(), Vector3::y()])
///     .skin(vec![[0, 1, 0, 0]; 3], vec![[0.5, 0.5, 0.0, 0.0]; 3])
///     .bone_map(vec![BoneName::new(10), BoneName::new(11)])
///     .triangles(vec![[0, 1, 2]])
///     .build()
///     .unwrap();
///
/// let optimized = optimize_skinning(&mesh).unwrap();
/// let it = UntypedMeshBufferIteratorConst::new(
///     &optimized.vertex_buffers,
///     MeshBufferSemantic::BoneIndices,
///     0,
/// );
/// assert_eq!(it.format(), MeshBufferFormat::UInt8);
/// ```
pub fn optimize_skinning(source: &Mesh) -> Result<Mesh> {
    let bone_channels: Vec<MeshBufferChannel> = source
        .vertex_buffers
        .buffers()
        .iter()
        .flat_map(|b| b.channels.iter())
        .filter(|c| c.semantic == MeshBufferSemantic::BoneIndices)
        .copied()
        .collect();
    if bone_channels.is_empty() {
        return Err(MeshError::MissingChannel {
            semantic: MeshBufferSemantic::BoneIndices,
        });
    }
    if bone_channels.iter().all(|c| c.format.size() == 1) {
        return Err(MeshError::NoChange);
    }
    if max_bone_map_count(source) > MAX_8BIT_BONES {
        return Err(MeshError::NoChange);
    }

    let element_count = source.vertex_buffers.element_count();
    let mut vertex_buffers = MeshBufferSet::new();
    vertex_buffers.set_element_count(element_count);
    for buffer in source.vertex_buffers.buffers() {
        let narrows = buffer
            .channels
            .iter()
            .any(|c| c.semantic == MeshBufferSemantic::BoneIndices && c.format.size() > 1);
        if narrows {
            vertex_buffers.push_buffer(narrow_bone_indices(buffer, element_count));
        } else {
            vertex_buffers.push_buffer(buffer.clone());
        }
    }

    let mut result = source.clone();
    result.vertex_buffers = vertex_buffers;
    Ok(result)
}

fn narrow_bone_indices(buffer: &MeshBuffer, element_count: usize) -> MeshBuffer {
    let mut offset = 0u16;
    let channels: Vec<MeshBufferChannel> = buffer
        .channels
        .iter()
        .map(|c| {
            let mut c = *c;
            if c.semantic == MeshBufferSemantic::BoneIndices {
                c.format = MeshBufferFormat::UInt8;
            }
            c.offset = offset;
            offset += c.size() as u16;
            c
        })
        .collect();
    let element_size = offset as usize;
    let old_size = buffer.element_size as usize;

    let mut data = vec![0u8; element_count * element_size];
    for e in 0..element_count {
        let src_element = &buffer.data[e * old_size..(e + 1) * old_size];
        let dst_element = &mut data[e * element_size..(e + 1) * element_size];
        for (from, to) in buffer.channels.iter().zip(&channels) {
            let src = &src_element[from.offset as usize..from.end()];
            let dst = &mut dst_element[to.offset as usize..to.end()];
            if from.format == to.format {
                dst.copy_from_slice(src);
                continue;
            }
            for k in 0..from.component_count as usize {
                let v = read_component_u64(src, from.format, k);
                // Indices past the 8-bit range cannot occur after the bone
                // count check; they are zeroed rather than wrapped.
                let v = if v > u8::MAX as u64 { 0 } else { v };
                write_component_u64(dst, to.format, k, v);
            }
        }
    }

    MeshBuffer {
        channels,
        element_size: element_size as u32,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::iter::read_channel_vec3f;
    use crate::buffer::UntypedMeshBufferIteratorConst;
    use crate::mesh::{BoneName, MeshBuilder};
    use nalgebra::Vector3;

    fn skinned(bones: usize, format: MeshBufferFormat) -> Mesh {
        MeshBuilder::new()
            .positions(vec![Vector3::zeros(), Vector3::x(), Vector3::y()])
            .skin(
                vec![[0, 1, 2, 3], [4, 5, 6, 7], [255, 0, 0, 0]],
                vec![[0.25; 4]; 3],
            )
            .with_bone_index_format(format)
            .bone_map((0..bones as u32).map(BoneName::new).collect())
            .triangles(vec![[0, 1, 2]])
            .build()
            .unwrap()
    }

    #[test]
    fn test_narrows_and_keeps_values() {
        let source = skinned(256, MeshBufferFormat::UInt16);
        let result = optimize_skinning(&source).unwrap();

        let mut it = UntypedMeshBufferIteratorConst::new(
            &result.vertex_buffers,
            MeshBufferSemantic::BoneIndices,
            0,
        );
        assert_eq!(it.format(), MeshBufferFormat::UInt8);
        assert_eq!(it.get_as_vec4f(), nalgebra::Vector4::new(0.0, 1.0, 2.0, 3.0));
        it += 2;
        assert_eq!(it.get_as_u32(), 255);

        let weights = UntypedMeshBufferIteratorConst::new(
            &result.vertex_buffers,
            MeshBufferSemantic::BoneWeights,
            0,
        );
        assert!((weights.get_as_vec4f().x - 0.25).abs() < 0.01);
        assert_eq!(
            read_channel_vec3f(&result.vertex_buffers, MeshBufferSemantic::Position, 0),
            source.positions()
        );
        assert!(result.vertex_buffers.data_size() < source.vertex_buffers.data_size());
    }

    #[test]
    fn test_too_many_bones() {
        let source = skinned(300, MeshBufferFormat::UInt16);
        assert!(matches!(optimize_skinning(&source), Err(MeshError::NoChange)));
    }

    #[test]
    fn test_already_narrow() {
        let source = skinned(8, MeshBufferFormat::UInt8);
        assert!(matches!(optimize_skinning(&source), Err(MeshError::NoChange)));
    }

    #[test]
    fn test_missing_bone_indices() {
        let mesh = crate::mesh::build_from_triangles(
            &[Vector3::zeros(), Vector3::x(), Vector3::y()],
            &[[0, 1, 2]],
        )
        .unwrap();
        assert!(optimize_skinning(&mesh).unwrap_err().is_no_op());
    }
}
