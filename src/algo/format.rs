//! Vertex layout conversion.

use crate::buffer::convert::try_convert_component;
use crate::buffer::{MeshBuffer, MeshBufferSemantic, MeshBufferSet};
use crate::error::Result;
use crate::mesh::{Mesh, MeshCopyFlags};

/// Copy of `source` with its vertex data laid out as `target_format`.
///
/// `target_format` only provides the buffer and channel descriptions; its
/// element count and data are ignored. Every channel present in both layouts
/// is converted through the conversion engine. Channels the source lacks and
/// components beyond the source component count are zero.
///
/// Vertex ids are never lost: when `target_format` has no `VertexIndex`
/// channel but the source has one, the source id buffer is appended.
///
/// Returns [`MeshError::UnsupportedConversion`] if a shared channel cannot
/// be converted between the two formats.
///
/// # Example
///
/// ```
/// use mutable_mesh::algo::format::format_mesh;
/// use mutable_mesh::buffer::{MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet};
/// use mutable_mesh::mesh::build_from_triangles;
/// use nalgebra::Vector3;
///
/// let mesh = build_from_triangles(
///     &[Vector3::zeros(), Vector3::x(), Vector3::y()],
///     &[[0, 1, 2]],
/// )
/// .unwrap();
///
/// let mut layout = MeshBufferSet::new();
/// layout.push_packed_buffer(&[MeshBufferChannel::new(
///     MeshBufferSemantic::Position,
///     0,
///     MeshBufferFormat::Float16,
///     3,
///     0,
/// )]);
///
/// let half = format_mesh(&mesh, &layout).unwrap();
/// assert_eq!(half.vertex_buffers.element_size(0), 6);
/// assert_eq!(half.positions(), mesh.positions());
/// ```
pub fn format_mesh(source: &Mesh, target_format: &MeshBufferSet) -> Result<Mesh> {
    let element_count = source.vertex_count();
    let src = &source.vertex_buffers;

    let mut vertex_buffers = MeshBufferSet::new();
    vertex_buffers.set_element_count(element_count);
    for layout in target_format.buffers() {
        let element_size = layout.element_size as usize;
        let mut buffer = MeshBuffer {
            channels: layout.channels.clone(),
            element_size: layout.element_size,
            data: vec![0u8; element_count * element_size],
        };

        for dst_channel in &layout.channels {
            let Some((b, c)) = src.find_channel(dst_channel.semantic, dst_channel.semantic_index)
            else {
                continue;
            };
            let src_channel = *src.channel(b, c);
            let src_size = src.element_size(b);
            let src_data = src.buffer_data(b);
            let components = src_channel
                .component_count
                .min(dst_channel.component_count) as usize;

            for e in 0..element_count {
                let from = &src_data[e * src_size + src_channel.offset as usize
                    ..e * src_size + src_channel.end()];
                let to = &mut buffer.data[e * element_size + dst_channel.offset as usize
                    ..e * element_size + dst_channel.end()];
                for k in 0..components {
                    try_convert_component(to, dst_channel.format, k, from, src_channel.format, k)?;
                }
            }
        }
        vertex_buffers.push_buffer(buffer);
    }

    if !vertex_buffers.has_channel(MeshBufferSemantic::VertexIndex, 0) {
        if let Some((b, c)) = src.find_channel(MeshBufferSemantic::VertexIndex, 0) {
            if src.channel_count(b) == 1 {
                vertex_buffers.add_buffer(src, b);
            } else {
                let mut channel = *src.channel(b, c);
                let src_offset = channel.offset as usize;
                channel.offset = 0;
                let id_buffer = vertex_buffers.push_packed_buffer(&[channel]);
                let size = src.element_size(b);
                let width = channel.size();
                let data = src.buffer_data(b);
                let dst = vertex_buffers.buffer_data_mut(id_buffer);
                for e in 0..element_count {
                    let start = e * size + src_offset;
                    dst[e * width..(e + 1) * width].copy_from_slice(&data[start..start + width]);
                }
            }
        }
    }

    let mut result = source.clone_with(MeshCopyFlags::all() - MeshCopyFlags::VERTEX_BUFFERS);
    result.vertex_buffers = vertex_buffers;
    Ok(result)
}
