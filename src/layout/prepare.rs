//! Assign mesh vertices to the blocks of an existing layout.

use std::sync::Arc;

use nalgebra::Vector2;

use super::{write_block_channel, Layout, NO_BLOCK};
use crate::buffer::iter::read_channel_vec2f;
use crate::buffer::{MeshBufferFormat, MeshBufferSemantic, UntypedMeshBufferIterator};
use crate::error::{MeshError, Result};
use crate::mesh::Mesh;

/// Options for [`prepare_layout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareLayoutOptions {
    /// Texture coordinate set the layout belongs to.
    pub uv_channel: i32,
    /// Rewrite UVs relative to their block, so every block spans `[0, 1]`.
    pub normalize_uvs: bool,
    /// Clamp UVs into the rectangle of their block.
    pub clamp_uv_islands: bool,
    /// Vertices outside every block go to the nearest one.
    pub ensure_all_vertices_have_block: bool,
    /// Store 64-bit block ids instead of 16-bit relative ones.
    pub use_absolute_block_ids: bool,
}

impl PrepareLayoutOptions {
    /// Options for texture coordinate set `uv_channel`.
    pub fn new(uv_channel: i32) -> Self {
        Self {
            uv_channel,
            ..Default::default()
        }
    }

    /// Normalize UVs to block space.
    pub fn normalize_uvs(mut self) -> Self {
        self.normalize_uvs = true;
        self
    }

    /// Clamp UVs into their block.
    pub fn clamp_uv_islands(mut self) -> Self {
        self.clamp_uv_islands = true;
        self
    }

    /// Give every vertex a block.
    pub fn ensure_all_vertices_have_block(mut self) -> Self {
        self.ensure_all_vertices_have_block = true;
        self
    }

    /// Store absolute block ids.
    pub fn absolute_block_ids(mut self) -> Self {
        self.use_absolute_block_ids = true;
        self
    }
}

/// Assign every vertex of `mesh` to a block of `layout` and attach the layout.
///
/// A triangle belongs to the block that contains the centroid of its UVs,
/// and its vertices follow the first triangle that claims them. Vertices no
/// triangle places in a block use the block containing their own UV, then,
/// with `ensure_all_vertices_have_block`, the nearest block.
///
/// The `LayoutBlock` channel with the UV channel's index is replaced, and
/// `layout` becomes the mesh layout for that channel.
pub fn prepare_layout(mesh: &mut Mesh, layout: &Layout, options: &PrepareLayoutOptions) -> Result<()> {
    if mesh.vertex_count() == 0 {
        return Err(MeshError::EmptyMesh);
    }
    if layout.blocks.is_empty() {
        return Err(MeshError::NoChange);
    }
    let mut uvs = read_channel_vec2f(
        &mesh.vertex_buffers,
        MeshBufferSemantic::TexCoords,
        options.uv_channel,
    )
    .ok_or(MeshError::MissingChannel {
        semantic: MeshBufferSemantic::TexCoords,
    })?;

    let mut assigned: Vec<Option<usize>> = vec![None; mesh.vertex_count()];
    for tri in mesh.triangles() {
        let centroid = tri
            .iter()
            .fold(Vector2::zeros(), |acc, &v| acc + uvs[v as usize])
            / 3.0;
        let Some(block) = layout.find_block_at(&centroid) else {
            continue;
        };
        for v in tri {
            assigned[v as usize].get_or_insert(block);
        }
    }
    let mut unassigned = 0usize;
    for (v, block) in assigned.iter_mut().enumerate() {
        if block.is_none() {
            *block = layout.find_block_at(&uvs[v]);
        }
        if block.is_none() && options.ensure_all_vertices_have_block {
            *block = layout.nearest_block(&uvs[v]);
        }
        if block.is_none() {
            unassigned += 1;
        }
    }
    if unassigned > 0 {
        log::warn!("{unassigned} vertices are outside every layout block");
    }

    if options.clamp_uv_islands || options.normalize_uvs {
        for (uv, block) in uvs.iter_mut().zip(&assigned) {
            let Some(block) = *block else { continue };
            let (min, max) = layout.block_uv_rect(block);
            if options.clamp_uv_islands {
                *uv = Vector2::new(uv.x.clamp(min.x, max.x), uv.y.clamp(min.y, max.y));
            }
            if options.normalize_uvs {
                *uv = (*uv - min).component_div(&(max - min));
            }
        }
        let mut it = UntypedMeshBufferIterator::new(
            &mut mesh.vertex_buffers,
            MeshBufferSemantic::TexCoords,
            options.uv_channel,
        );
        for uv in &uvs {
            it.set_from_vec2f(uv);
            it.inc();
        }
    }

    let (format, none) = if options.use_absolute_block_ids {
        (MeshBufferFormat::UInt64, u64::MAX)
    } else {
        (MeshBufferFormat::UInt16, NO_BLOCK as u64)
    };
    let values: Vec<u64> = assigned
        .iter()
        .map(|block| match block {
            Some(b) if options.use_absolute_block_ids => layout.blocks[*b].id,
            Some(b) => layout.blocks[*b].id & 0xffff,
            None => none,
        })
        .collect();
    write_block_channel(&mut mesh.vertex_buffers, options.uv_channel, format, &values);

    let slot = options.uv_channel.max(0) as usize;
    let layout = Arc::new(layout.clone());
    if slot < mesh.layouts.len() {
        mesh.layouts[slot] = layout;
    } else {
        mesh.layouts.push(layout);
    }
    Ok(())
}
