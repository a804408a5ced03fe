//! Block coverage masks.

use image::{GrayImage, Luma};
use nalgebra::Vector2;

use super::Layout;
use crate::buffer::iter::{read_channel_u64, read_channel_vec2f};
use crate::buffer::{MeshBufferFormat, MeshBufferSemantic};
use crate::error::{MeshError, Result};
use crate::geometry::barycentric_2d;
use crate::mesh::Mesh;

const COVERED: Luma<u8> = Luma([255]);

/// Whether a stored block value refers to block `id`.
///
/// 16-bit channels only hold the low half of relative ids.
fn block_matches(value: u64, id: u64, format: MeshBufferFormat) -> bool {
    match format {
        MeshBufferFormat::UInt16 => value == id & 0xffff,
        MeshBufferFormat::UInt32 => value == id & 0xffff_ffff,
        _ => value == id,
    }
}

fn rasterize(image: &mut GrayImage, corners: [Vector2<f32>; 3]) {
    let (w, h) = image.dimensions();
    let lo = corners[0].inf(&corners[1]).inf(&corners[2]);
    let hi = corners[0].sup(&corners[1]).sup(&corners[2]);
    let x0 = lo.x.floor().max(0.0) as u32;
    let y0 = lo.y.floor().max(0.0) as u32;
    let x1 = (hi.x.ceil().max(0.0) as u32).min(w);
    let y1 = (hi.y.ceil().max(0.0) as u32).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);
            let Some(bary) = barycentric_2d(&p, &corners[0], &corners[1], &corners[2]) else {
                return;
            };
            if bary.iter().all(|&b| b >= -1e-5) {
                image.put_pixel(x, y, COVERED);
            }
        }
    }
}

/// Grow covered texels into their 8 neighbours.
fn dilate(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let covered = (y.saturating_sub(1)..(y + 2).min(h))
            .any(|ny| (x.saturating_sub(1)..(x + 2).min(w)).any(|nx| image.get_pixel(nx, ny)[0] > 0));
        if covered {
            COVERED
        } else {
            Luma([0])
        }
    })
}

/// Texels covered by the triangles of `block` in a `size` image of the block.
///
/// Triangles belong to the block when all their vertices do. The block's
/// UV rectangle maps onto the whole image; the coverage is then grown by
/// `grow` texels.
pub fn block_mask(
    mesh: &Mesh,
    layout: &Layout,
    block: usize,
    size: [u32; 2],
    grow: u32,
    uv_channel: i32,
) -> Result<GrayImage> {
    if block >= layout.blocks.len() {
        return Err(MeshError::invalid_param(
            "block",
            block,
            "out of range for the layout",
        ));
    }
    let buffers = &mesh.vertex_buffers;
    let missing = |semantic| MeshError::MissingChannel { semantic };
    let (b, c) = buffers
        .find_channel(MeshBufferSemantic::LayoutBlock, uv_channel)
        .ok_or_else(|| missing(MeshBufferSemantic::LayoutBlock))?;
    let format = buffers.channel(b, c).format;
    let blocks = read_channel_u64(buffers, MeshBufferSemantic::LayoutBlock, uv_channel)
        .ok_or_else(|| missing(MeshBufferSemantic::LayoutBlock))?;
    let uvs = read_channel_vec2f(buffers, MeshBufferSemantic::TexCoords, uv_channel)
        .ok_or_else(|| missing(MeshBufferSemantic::TexCoords))?;

    let id = layout.blocks[block].id;
    let (min, max) = layout.block_uv_rect(block);
    let extent = max - min;
    let scale = Vector2::new(size[0] as f32 / extent.x, size[1] as f32 / extent.y);
    let to_texels = |uv: &Vector2<f32>| (uv - min).component_mul(&scale);

    let mut image = GrayImage::new(size[0], size[1]);
    let mut drawn = 0usize;
    for tri in mesh.triangles() {
        if !tri
            .iter()
            .all(|&v| block_matches(blocks[v as usize], id, format))
        {
            continue;
        }
        rasterize(&mut image, tri.map(|v| to_texels(&uvs[v as usize])));
        drawn += 1;
    }
    for _ in 0..grow {
        image = dilate(&image);
    }
    log::trace!("block {id} mask: {drawn} triangles, grown {grow} texels");
    Ok(image)
}
