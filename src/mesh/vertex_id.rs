//! Stable vertex identities.
//!
//! Every vertex has a 64-bit id that survives vertex removal and is used to
//! match vertices across meshes (morph targets, masks, reshape data). A mesh
//! stores ids in one of three ways, see [`VertexIdMode`]:
//!
//! | mode     | `VertexIndex` channel | id                       |
//! |----------|-----------------------|--------------------------|
//! | implicit | none                  | `prefix << 32 \| index`  |
//! | relative | 32-bit                | `prefix << 32 \| value`  |
//! | explicit | 64-bit                | `value`, prefix is zero  |
//!
//! ```
//! use mutable_mesh::mesh::{make_vertex_ids_relative, MeshBuilder, MeshVertexIdIterator};
//! use nalgebra::Vector3;
//!
//! let mut mesh = MeshBuilder::new()
//!     .positions(vec![Vector3::zeros(); 3])
//!     .triangles(vec![[0, 1, 2]])
//!     .id_prefix(7)
//!     .build()
//!     .unwrap();
//!
//! make_vertex_ids_relative(&mut mesh);
//! let ids: Vec<u64> = MeshVertexIdIterator::new(&mesh).collect();
//! assert_eq!(ids, vec![7 << 32, (7 << 32) | 1, (7 << 32) | 2]);
//! ```

use std::ops::AddAssign;

use super::entity::{Mesh, VertexIdMode};
use crate::buffer::{
    MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, UntypedMeshBufferIterator,
    UntypedMeshBufferIteratorConst,
};
use crate::layout::NO_BLOCK;

/// Cursor producing the 64-bit id of each vertex in order.
///
/// Also an [`Iterator`] over the remaining ids.
#[derive(Debug, Clone, Copy)]
pub struct MeshVertexIdIterator<'a> {
    start: UntypedMeshBufferIteratorConst<'a>,
    ids: UntypedMeshBufferIteratorConst<'a>,
    mode: VertexIdMode,
    prefix: u64,
    index: usize,
    count: usize,
}

impl<'a> MeshVertexIdIterator<'a> {
    /// Cursor at vertex 0 of `mesh`.
    pub fn new(mesh: &'a Mesh) -> Self {
        let start = UntypedMeshBufferIteratorConst::new(
            &mesh.vertex_buffers,
            MeshBufferSemantic::VertexIndex,
            0,
        );
        Self {
            start,
            ids: start,
            mode: mesh.vertex_id_mode(),
            prefix: (mesh.mesh_id_prefix as u64) << 32,
            index: 0,
            count: mesh.vertex_count(),
        }
    }

    /// Id of the current vertex.
    ///
    /// # Panics
    /// Panics past the last vertex.
    pub fn get(&self) -> u64 {
        assert!(self.index < self.count, "vertex id iterator exhausted");
        match self.mode {
            VertexIdMode::Implicit => self.prefix | self.index as u64,
            VertexIdMode::Relative => self.prefix | (self.ids.get_as_u64() & 0xFFFF_FFFF),
            VertexIdMode::Explicit => self.ids.get_as_u64(),
        }
    }

    /// Current vertex index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the cursor is past the last vertex.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.index >= self.count
    }

    /// Advance by one vertex.
    #[inline]
    pub fn inc(&mut self) {
        *self += 1;
    }

    /// Id of vertex `index` without moving the cursor.
    ///
    /// # Panics
    /// Panics if `index` is not a vertex of the mesh.
    pub fn id_of(&self, index: usize) -> u64 {
        assert!(index < self.count, "vertex {index} out of range");
        match self.mode {
            VertexIdMode::Implicit => self.prefix | index as u64,
            VertexIdMode::Relative => self.prefix | ((self.start + index).get_as_u64() & 0xFFFF_FFFF),
            VertexIdMode::Explicit => (self.start + index).get_as_u64(),
        }
    }
}

impl AddAssign<usize> for MeshVertexIdIterator<'_> {
    fn add_assign(&mut self, vertices: usize) {
        self.index += vertices;
        if self.mode != VertexIdMode::Implicit {
            self.ids += vertices;
        }
    }
}

impl Iterator for MeshVertexIdIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.is_done() {
            return None;
        }
        let id = self.get();
        self.inc();
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.count.saturating_sub(self.index);
        (n, Some(n))
    }
}

impl ExactSizeIterator for MeshVertexIdIterator<'_> {}

/// All vertex ids of `mesh`.
pub fn vertex_ids(mesh: &Mesh) -> Vec<u64> {
    MeshVertexIdIterator::new(mesh).collect()
}

/// Give an implicit-id mesh a 32-bit id channel holding `0..vertex_count`.
///
/// Meshes that already store ids are left alone. Needed before removing
/// vertices so survivors keep their identity.
pub fn make_vertex_ids_relative(mesh: &mut Mesh) {
    if !mesh.are_vertex_ids_implicit() {
        return;
    }
    let count = mesh.vertex_count();
    mesh.vertex_buffers.push_packed_buffer(&[MeshBufferChannel::new(
        MeshBufferSemantic::VertexIndex,
        0,
        MeshBufferFormat::UInt32,
        1,
        0,
    )]);
    let mut it =
        UntypedMeshBufferIterator::new(&mut mesh.vertex_buffers, MeshBufferSemantic::VertexIndex, 0);
    for i in 0..count {
        it.set_from_u32(i as u32);
        it.inc();
    }
}

/// Store full 64-bit ids and clear the prefix.
///
/// 16-bit `LayoutBlock` channels are widened the same way, combining their
/// relative block ids with the prefix, and so are the block ids of the
/// mesh layouts. Vertices without a block ([`NO_BLOCK`]) get `u64::MAX`,
/// the unassigned value of absolute block channels.
pub fn make_ids_explicit(mesh: &mut Mesh) {
    let prefix = (mesh.mesh_id_prefix as u64) << 32;

    if !mesh.are_vertex_ids_explicit() {
        let ids = vertex_ids(mesh);
        mesh.vertex_buffers
            .remove_channel(MeshBufferSemantic::VertexIndex, 0);
        write_u64_channel(mesh, MeshBufferSemantic::VertexIndex, 0, &ids);
    }

    let layout_channels: Vec<i32> = mesh
        .vertex_buffers
        .buffers()
        .iter()
        .flat_map(|b| b.channels.iter())
        .filter(|c| {
            c.semantic == MeshBufferSemantic::LayoutBlock && c.format == MeshBufferFormat::UInt16
        })
        .map(|c| c.semantic_index)
        .collect();
    for index in layout_channels {
        let mut blocks = Vec::with_capacity(mesh.vertex_count());
        let mut it = UntypedMeshBufferIteratorConst::new(
            &mesh.vertex_buffers,
            MeshBufferSemantic::LayoutBlock,
            index,
        );
        for _ in 0..mesh.vertex_count() {
            let block = it.get_as_u64();
            blocks.push(if block == NO_BLOCK as u64 {
                u64::MAX
            } else {
                prefix | block
            });
            it.inc();
        }
        mesh.vertex_buffers
            .remove_channel(MeshBufferSemantic::LayoutBlock, index);
        write_u64_channel(mesh, MeshBufferSemantic::LayoutBlock, index, &blocks);
    }

    if prefix != 0 {
        for layout in &mut mesh.layouts {
            let layout = std::sync::Arc::make_mut(layout);
            for block in &mut layout.blocks {
                if block.id >> 32 == 0 {
                    block.id |= prefix;
                }
            }
        }
    }

    mesh.mesh_id_prefix = 0;
}

fn write_u64_channel(mesh: &mut Mesh, semantic: MeshBufferSemantic, index: i32, values: &[u64]) {
    mesh.vertex_buffers.push_packed_buffer(&[MeshBufferChannel::new(
        semantic,
        index,
        MeshBufferFormat::UInt64,
        1,
        0,
    )]);
    let mut it = UntypedMeshBufferIterator::new(&mut mesh.vertex_buffers, semantic, index);
    for &v in values {
        it.set_from_u64(v);
        it.inc();
    }
}
