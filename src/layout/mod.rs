//! Texture layouts and layout block assignment.
//!
//! A [`Layout`] divides the texture space of one UV channel into a grid of
//! cells. [`LayoutBlock`]s are rectangles of cells that get packed into
//! texture atlases later on. Every vertex refers to the block it belongs to
//! through the `LayoutBlock` channel with the same semantic index as its
//! UV channel.
//!
//! - [`generate_uv_islands`] finds connected UV charts.
//! - [`generate_blocks`] creates one block per chart and labels the vertices.
//! - [`block_mask`] rasterises the texels a block covers.
//! - [`prepare_layout`] assigns the vertices of a mesh to the blocks of an
//!   existing layout.
//!
//! ```
//! use mutable_mesh::layout::{generate_blocks, LayoutOptions};
//! use mutable_mesh::mesh::MeshBuilder;
//! use nalgebra::{Vector2, Vector3};
//!
//! let mut mesh = MeshBuilder::new()
//!     .positions(vec![Vector3::zeros(), Vector3::x(), Vector3::new(1.0, 1.0, 0.0), Vector3::y()])
//!     .tex_coords(vec![
//!         Vector2::new(0.1, 0.1), Vector2::new(0.4, 0.1),
//!         Vector2::new(0.4, 0.4), Vector2::new(0.1, 0.4),
//!     ])
//!     .quads(&[[0, 1, 2, 3]])
//!     .build()
//!     .unwrap();
//!
//! let (layout, blocks) = generate_blocks(&mut mesh, &LayoutOptions::default()).unwrap();
//! assert_eq!(layout.blocks.len(), 1);
//! assert_eq!(layout.blocks[0].size, [2, 2]);
//! assert!(blocks.iter().all(|&b| b == 0));
//! ```

mod blocks;
mod islands;
mod mask;
mod prepare;

use nalgebra::Vector2;

use crate::buffer::{
    MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet,
    UntypedMeshBufferIterator,
};

pub use blocks::{generate_blocks, LayoutOptions};
pub use islands::{generate_uv_islands, UvIslands};
pub use mask::block_mask;
pub use prepare::{prepare_layout, PrepareLayoutOptions};

/// Block value of vertices that belong to no block.
pub const NO_BLOCK: u16 = u16::MAX;

/// What happens when the blocks do not fit the layout grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PackStrategy {
    /// The grid grows up to `max_size`.
    #[default]
    Resizable = 0,
    /// The grid keeps its size; blocks are reduced to fit.
    Fixed = 1,
    /// Blocks that do not fit are dropped.
    Overflow = 2,
}

impl PackStrategy {
    /// Decode a persisted value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Resizable),
            1 => Some(Self::Fixed),
            2 => Some(Self::Overflow),
            _ => None,
        }
    }
}

/// How blocks shrink when a fixed layout overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ReductionMethod {
    /// Halve the block size.
    #[default]
    Halve = 0,
    /// Remove one cell at a time.
    Unitary = 1,
}

impl ReductionMethod {
    /// Decode a persisted value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Halve),
            1 => Some(Self::Unitary),
            _ => None,
        }
    }
}

/// A rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutBlock {
    /// First cell.
    pub min: [u16; 2],
    /// Size in cells.
    pub size: [u16; 2],
    /// Block id. Relative ids fit in 32 bits; absolute ids carry the mesh
    /// id prefix in the high half.
    pub id: u64,
    /// Packing priority; higher priorities are reduced last.
    pub priority: i32,
    /// Reduce both axes at once.
    pub reduce_both_axes: bool,
    /// Reduce by two cells instead of one.
    pub reduce_by_two: bool,
}

impl LayoutBlock {
    /// Whether `other` lies inside this block.
    pub fn contains(&self, other: &LayoutBlock) -> bool {
        (0..2).all(|a| {
            self.min[a] <= other.min[a]
                && other.min[a] as u32 + other.size[a] as u32
                    <= self.min[a] as u32 + self.size[a] as u32
        })
    }

    /// Number of cells.
    pub fn area(&self) -> u32 {
        self.size[0] as u32 * self.size[1] as u32
    }
}

/// Texture layout of one UV channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layout {
    /// Grid size in cells.
    pub size: [u16; 2],
    /// Largest grid a resizable layout may grow to.
    pub max_size: [u16; 2],
    /// Blocks.
    pub blocks: Vec<LayoutBlock>,
    /// Packing strategy.
    pub strategy: PackStrategy,
    /// Reduction method for fixed layouts.
    pub reduction_method: ReductionMethod,
}

impl Layout {
    /// Empty layout with a `size` grid.
    pub fn new(size: [u16; 2]) -> Self {
        Self {
            size,
            max_size: size,
            ..Default::default()
        }
    }

    /// Index of the block with `id`.
    pub fn find_block(&self, id: u64) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    /// UV rectangle `(min, max)` covered by `block`.
    pub fn block_uv_rect(&self, block: usize) -> (Vector2<f32>, Vector2<f32>) {
        let b = &self.blocks[block];
        let grid = self.grid();
        let min = Vector2::new(b.min[0] as f32 / grid.x, b.min[1] as f32 / grid.y);
        let max = Vector2::new(
            (b.min[0] as f32 + b.size[0] as f32) / grid.x,
            (b.min[1] as f32 + b.size[1] as f32) / grid.y,
        );
        (min, max)
    }

    /// First block whose rectangle contains `uv`.
    pub fn find_block_at(&self, uv: &Vector2<f32>) -> Option<usize> {
        (0..self.blocks.len()).find(|&b| {
            let (min, max) = self.block_uv_rect(b);
            uv.x >= min.x && uv.y >= min.y && uv.x <= max.x && uv.y <= max.y
        })
    }

    /// Block whose rectangle is closest to `uv`.
    pub fn nearest_block(&self, uv: &Vector2<f32>) -> Option<usize> {
        (0..self.blocks.len())
            .map(|b| {
                let (min, max) = self.block_uv_rect(b);
                let clamped = Vector2::new(uv.x.clamp(min.x, max.x), uv.y.clamp(min.y, max.y));
                (b, (uv - clamped).norm_squared())
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(b, _)| b)
    }

    fn grid(&self) -> Vector2<f32> {
        Vector2::new(self.size[0].max(1) as f32, self.size[1].max(1) as f32)
    }
}

/// Replace the `LayoutBlock` channel `index` of `set` with `blocks`.
pub(crate) fn write_block_channel(
    set: &mut MeshBufferSet,
    index: i32,
    format: MeshBufferFormat,
    blocks: &[u64],
) {
    debug_assert_eq!(blocks.len(), set.element_count());
    set.remove_channel(MeshBufferSemantic::LayoutBlock, index);
    set.push_packed_buffer(&[MeshBufferChannel::new(
        MeshBufferSemantic::LayoutBlock,
        index,
        format,
        1,
        0,
    )]);
    let mut it = UntypedMeshBufferIterator::new(set, MeshBufferSemantic::LayoutBlock, index);
    for &b in blocks {
        it.set_from_u64(b);
        it.inc();
    }
}

#[cfg(test)]
pub(crate) mod test_meshes {
    use crate::mesh::{Mesh, MeshBuilder};
    use nalgebra::{Vector2, Vector3};

    /// Two quads sharing the edge x = 1; the right quad has its own UVs
    /// along that edge when `seam` is set.
    pub(crate) fn two_quads(seam: bool) -> Mesh {
        let mut positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let mut uvs = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(0.25, 0.0),
            Vector2::new(0.25, 0.25),
            Vector2::new(0.0, 0.25),
        ];
        // Duplicates of vertices 1 and 2, as a normal seam would create.
        positions.extend([Vector3::new(1.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 0.0)]);
        if seam {
            uvs.extend([Vector2::new(0.75, 0.5), Vector2::new(0.75, 0.75)]);
        } else {
            let (a, b) = (uvs[1], uvs[2]);
            uvs.extend([a, b]);
        }
        positions.extend([Vector3::new(2.0, 0.0, 0.0), Vector3::new(2.0, 1.0, 0.0)]);
        let offset = if seam { 0.75 } else { 0.25 };
        let base = if seam { 0.5 } else { 0.0 };
        uvs.extend([
            Vector2::new(offset + 0.25, base),
            Vector2::new(offset + 0.25, base + 0.25),
        ]);
        MeshBuilder::new()
            .positions(positions)
            .tex_coords(uvs)
            .quads(&[[0, 1, 2, 3], [4, 6, 7, 5]])
            .build()
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        let mut layout = Layout::new([4, 4]);
        layout.blocks.push(LayoutBlock {
            min: [0, 0],
            size: [2, 2],
            id: 10,
            ..Default::default()
        });
        layout.blocks.push(LayoutBlock {
            min: [2, 2],
            size: [2, 1],
            id: 11,
            ..Default::default()
        });
        layout
    }

    #[test]
    fn test_block_uv_rect() {
        let (min, max) = layout().block_uv_rect(1);
        assert_eq!(min, Vector2::new(0.5, 0.5));
        assert_eq!(max, Vector2::new(1.0, 0.75));
    }

    #[test]
    fn test_find_blocks() {
        let layout = layout();
        assert_eq!(layout.find_block(11), Some(1));
        assert_eq!(layout.find_block(12), None);
        assert_eq!(layout.find_block_at(&Vector2::new(0.25, 0.25)), Some(0));
        assert_eq!(layout.find_block_at(&Vector2::new(0.9, 0.1)), None);
        assert_eq!(layout.nearest_block(&Vector2::new(0.9, 0.05)), Some(0));
        assert_eq!(layout.nearest_block(&Vector2::new(0.9, 0.9)), Some(1));
    }

    #[test]
    fn test_contains() {
        let layout = layout();
        let inner = LayoutBlock {
            min: [1, 0],
            size: [1, 2],
            ..Default::default()
        };
        assert!(layout.blocks[0].contains(&inner));
        assert!(!layout.blocks[1].contains(&inner));
        assert!(layout.blocks[0].contains(&layout.blocks[0]));
    }

    #[test]
    fn test_decode_enums() {
        assert_eq!(PackStrategy::from_u32(2), Some(PackStrategy::Overflow));
        assert_eq!(PackStrategy::from_u32(3), None);
        assert_eq!(ReductionMethod::from_u32(1), Some(ReductionMethod::Unitary));
    }
}
