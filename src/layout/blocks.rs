//! Layout block generation from UV islands.

use nalgebra::Vector2;

use super::{generate_uv_islands, write_block_channel, Layout, LayoutBlock, NO_BLOCK};
use crate::buffer::iter::read_channel_vec2f;
use crate::buffer::{MeshBufferFormat, MeshBufferSemantic};
use crate::error::{MeshError, Result};
use crate::mesh::Mesh;

/// Options for [`generate_blocks`].
#[derive(Debug, Clone, Copy)]
pub struct LayoutOptions {
    /// Texture coordinate set the blocks are made for.
    pub uv_channel: i32,
    /// Grid size of the new layout.
    pub grid_size: [u16; 2],
    /// Islands whose block lies inside another block share that block.
    pub merge_contained: bool,
    /// Write the 16-bit `LayoutBlock` channel into the mesh.
    pub write_channel: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            uv_channel: 0,
            grid_size: [4, 4],
            merge_contained: true,
            write_channel: true,
        }
    }
}

impl LayoutOptions {
    /// Set the texture coordinate set.
    pub fn with_uv_channel(mut self, uv_channel: i32) -> Self {
        self.uv_channel = uv_channel;
        self
    }

    /// Set the grid size. Zero sizes become one.
    pub fn with_grid_size(mut self, grid_size: [u16; 2]) -> Self {
        self.grid_size = [grid_size[0].max(1), grid_size[1].max(1)];
        self
    }

    /// Give every island its own block.
    pub fn keep_contained(mut self) -> Self {
        self.merge_contained = false;
        self
    }

    /// Only return the assignment.
    pub fn without_channel(mut self) -> Self {
        self.write_channel = false;
        self
    }
}

/// Cells covered by the UV range `[min, max]` along one axis.
fn cell_span(min: f32, max: f32, cells: u16) -> (u16, u16) {
    let n = cells as f32;
    let first = (min * n).floor().clamp(0.0, n - 1.0) as u16;
    let last = ((max * n).ceil().clamp(0.0, n) as u16).max(first + 1);
    (first, last - first)
}

/// Create one layout block per UV island of `mesh`.
///
/// Blocks cover the grid cells touched by the UV bounds of their island, and
/// get ids `0..n` in island order. Returns the layout and the block index of
/// every vertex ([`NO_BLOCK`] for vertices no triangle uses).
pub fn generate_blocks(mesh: &mut Mesh, options: &LayoutOptions) -> Result<(Layout, Vec<u16>)> {
    let islands = generate_uv_islands(mesh, options.uv_channel)?;
    let uvs = read_channel_vec2f(
        &mesh.vertex_buffers,
        MeshBufferSemantic::TexCoords,
        options.uv_channel,
    )
    .ok_or(MeshError::MissingChannel {
        semantic: MeshBufferSemantic::TexCoords,
    })?;
    let triangles = mesh.triangles();
    let grid = [options.grid_size[0].max(1), options.grid_size[1].max(1)];

    let island_blocks: Vec<LayoutBlock> = islands
        .triangles_per_island()
        .iter()
        .map(|tris| {
            let mut min = Vector2::repeat(f32::MAX);
            let mut max = Vector2::repeat(f32::MIN);
            for &t in tris {
                for &v in &triangles[t] {
                    min = min.inf(&uvs[v as usize]);
                    max = max.sup(&uvs[v as usize]);
                }
            }
            let (x, w) = cell_span(min.x, max.x, grid[0]);
            let (y, h) = cell_span(min.y, max.y, grid[1]);
            LayoutBlock {
                min: [x, y],
                size: [w, h],
                ..Default::default()
            }
        })
        .collect();

    // Larger blocks first so contained blocks find their container.
    let mut order: Vec<usize> = (0..island_blocks.len()).collect();
    if options.merge_contained {
        order.sort_by_key(|&i| std::cmp::Reverse(island_blocks[i].area()));
    }
    let mut layout = Layout::new(grid);
    let mut block_of_island = vec![0u16; island_blocks.len()];
    for &i in &order {
        let candidate = &island_blocks[i];
        let container = options
            .merge_contained
            .then(|| layout.blocks.iter().position(|b| b.contains(candidate)))
            .flatten();
        block_of_island[i] = match container {
            Some(b) => b as u16,
            None => {
                layout.blocks.push(*candidate);
                (layout.blocks.len() - 1) as u16
            }
        };
    }
    // Number blocks in order of their first island.
    let mut renumber = vec![NO_BLOCK; layout.blocks.len()];
    let mut blocks = Vec::with_capacity(layout.blocks.len());
    for b in block_of_island.iter_mut() {
        if renumber[*b as usize] == NO_BLOCK {
            renumber[*b as usize] = blocks.len() as u16;
            blocks.push(layout.blocks[*b as usize]);
        }
        *b = renumber[*b as usize];
    }
    for (id, block) in blocks.iter_mut().enumerate() {
        block.id = id as u64;
    }
    layout.blocks = blocks;

    let mut vertex_blocks = vec![NO_BLOCK; mesh.vertex_count()];
    for (t, tri) in triangles.iter().enumerate() {
        let block = block_of_island[islands.triangle_island[t] as usize];
        for &v in tri {
            if vertex_blocks[v as usize] == NO_BLOCK {
                vertex_blocks[v as usize] = block;
            }
        }
    }

    if options.write_channel {
        let values: Vec<u64> = vertex_blocks.iter().map(|&b| b as u64).collect();
        write_block_channel(
            &mut mesh.vertex_buffers,
            options.uv_channel,
            MeshBufferFormat::UInt16,
            &values,
        );
    }
    log::debug!(
        "{} layout blocks from {} uv islands",
        layout.blocks.len(),
        islands.island_count
    );
    Ok((layout, vertex_blocks))
}

#[cfg(test)]
mod tests {
    use super::super::test_meshes::two_quads;
    use super::*;
    use crate::buffer::iter::read_channel_u64;
    use crate::buffer::UntypedMeshBufferIterator;

    #[test]
    fn test_cell_span() {
        assert_eq!(cell_span(0.0, 0.25, 4), (0, 1));
        assert_eq!(cell_span(0.3, 0.3, 4), (1, 1));
        assert_eq!(cell_span(0.9, 1.2, 4), (3, 1));
        assert_eq!(cell_span(-0.5, 0.6, 4), (0, 3));
    }

    #[test]
    fn test_one_block_per_island() {
        let mut mesh = two_quads(true);
        let (layout, blocks) = generate_blocks(&mut mesh, &LayoutOptions::default()).unwrap();
        assert_eq!(layout.size, [4, 4]);
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(layout.blocks[0].min, [0, 0]);
        assert_eq!(layout.blocks[0].size, [1, 1]);
        assert_eq!(layout.blocks[1].min, [3, 2]);
        assert_eq!(layout.blocks[1].size, [1, 1]);
        assert_eq!(layout.blocks[1].id, 1);
        assert_eq!(blocks, vec![0, 0, 0, 0, 1, 1, 1, 1]);

        let channel = read_channel_u64(&mesh.vertex_buffers, MeshBufferSemantic::LayoutBlock, 0);
        assert_eq!(channel.unwrap(), vec![0, 0, 0, 0, 1, 1, 1, 1]);
        let (b, c) = mesh
            .vertex_buffers
            .find_channel(MeshBufferSemantic::LayoutBlock, 0)
            .unwrap();
        assert_eq!(mesh.vertex_buffers.channel(b, c).format, MeshBufferFormat::UInt16);
    }

    #[test]
    fn test_contained_islands_merge() {
        let mut mesh = two_quads(true);
        // Move the second island inside the cell of the first.
        {
            let mut it = UntypedMeshBufferIterator::at(
                &mut mesh.vertex_buffers,
                MeshBufferSemantic::TexCoords,
                0,
                4,
            );
            for uv in [[0.1, 0.1], [0.1, 0.2], [0.2, 0.1], [0.2, 0.2]] {
                it.set_from_vec2f(&Vector2::new(uv[0], uv[1]));
                it.inc();
            }
        }
        let options = LayoutOptions::default().without_channel();
        let (layout, blocks) = generate_blocks(&mut mesh, &options).unwrap();
        assert_eq!(layout.blocks.len(), 1);
        assert!(blocks.iter().all(|&b| b == 0));
        assert!(!mesh.has_vertex_channel(MeshBufferSemantic::LayoutBlock, 0));

        let (layout, blocks) = generate_blocks(&mut mesh, &options.keep_contained()).unwrap();
        assert_eq!(layout.blocks.len(), 2);
        assert_eq!(blocks[7], 1);
    }

    #[test]
    fn test_unused_vertices_have_no_block() {
        let mut mesh = two_quads(false);
        let mut indices = mesh.indices();
        indices.truncate(6);
        mesh.set_indices(&indices);
        let (_, blocks) = generate_blocks(&mut mesh, &LayoutOptions::default()).unwrap();
        assert_eq!(&blocks[..4], &[0, 0, 0, 0]);
        assert_eq!(blocks[6], NO_BLOCK);
    }
}
