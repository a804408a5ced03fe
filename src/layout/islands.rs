//! UV island detection.

use nalgebra::Vector2;
use rustc_hash::FxHashMap;

use crate::buffer::iter::read_channel_vec2f;
use crate::buffer::MeshBufferSemantic;
use crate::error::{MeshError, Result};
use crate::mesh::{create_collapsed_vertex_map, CollapseOptions, Mesh};

/// UV coordinates closer than this are the same texture point.
const UV_QUANTUM: f32 = 1e-5;

/// Connected UV charts of a mesh.
#[derive(Debug, Clone, Default)]
pub struct UvIslands {
    /// Island of every triangle, numbered in order of first appearance.
    pub triangle_island: Vec<u32>,
    /// Number of islands.
    pub island_count: usize,
}

impl UvIslands {
    /// Triangles of each island.
    pub fn triangles_per_island(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.island_count];
        for (t, &island) in self.triangle_island.iter().enumerate() {
            out[island as usize].push(t);
        }
        out
    }
}

struct DisjointSet {
    parent: Vec<u32>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
        }
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[a.max(b) as usize] = a.min(b);
        }
    }
}

fn quantize(uv: &Vector2<f32>) -> (i64, i64) {
    (
        (uv.x / UV_QUANTUM).round() as i64,
        (uv.y / UV_QUANTUM).round() as i64,
    )
}

/// Find the UV islands of `mesh` in texture coordinate set `uv_channel`.
///
/// Two triangles are in the same island when they share an edge in both
/// position and UV space. Vertices duplicated along normal or color seams
/// are matched through the collapsed vertex map, so only real UV seams split
/// islands.
pub fn generate_uv_islands(mesh: &Mesh, uv_channel: i32) -> Result<UvIslands> {
    let triangles = mesh.triangles();
    if triangles.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    let uvs = read_channel_vec2f(&mesh.vertex_buffers, MeshBufferSemantic::TexCoords, uv_channel)
        .ok_or(MeshError::MissingChannel {
            semantic: MeshBufferSemantic::TexCoords,
        })?;
    let collapsed = create_collapsed_vertex_map(mesh, &CollapseOptions::default());

    // Texture points: collapsed position plus quantized UV.
    let mut points: FxHashMap<(u32, (i64, i64)), u32> = FxHashMap::default();
    let point_of: Vec<u32> = (0..mesh.vertex_count())
        .map(|v| {
            let next = points.len() as u32;
            *points.entry((collapsed[v], quantize(&uvs[v]))).or_insert(next)
        })
        .collect();

    let mut sets = DisjointSet::new(triangles.len());
    let mut edges: FxHashMap<(u32, u32), u32> = FxHashMap::default();
    for (t, tri) in triangles.iter().enumerate() {
        for k in 0..3 {
            let a = point_of[tri[k] as usize];
            let b = point_of[tri[(k + 1) % 3] as usize];
            if a == b {
                continue;
            }
            let key = (a.min(b), a.max(b));
            match edges.get(&key) {
                Some(&other) => sets.union(other, t as u32),
                None => {
                    edges.insert(key, t as u32);
                }
            }
        }
    }

    let mut labels: FxHashMap<u32, u32> = FxHashMap::default();
    let triangle_island: Vec<u32> = (0..triangles.len() as u32)
        .map(|t| {
            let root = sets.find(t);
            let next = labels.len() as u32;
            *labels.entry(root).or_insert(next)
        })
        .collect();
    log::debug!(
        "{} uv islands in {} triangles",
        labels.len(),
        triangles.len()
    );
    Ok(UvIslands {
        triangle_island,
        island_count: labels.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_meshes::two_quads;
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_normal_seam_keeps_one_island() {
        let islands = generate_uv_islands(&two_quads(false), 0).unwrap();
        assert_eq!(islands.island_count, 1);
        assert!(islands.triangle_island.iter().all(|&i| i == 0));
    }

    #[test]
    fn test_uv_seam_splits_islands() {
        let islands = generate_uv_islands(&two_quads(true), 0).unwrap();
        assert_eq!(islands.island_count, 2);
        assert_eq!(islands.triangle_island, vec![0, 0, 1, 1]);
        assert_eq!(islands.triangles_per_island(), vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_missing_uvs() {
        let mesh = crate::mesh::build_from_triangles(
            &[Vector3::zeros(), Vector3::x(), Vector3::y()],
            &[[0, 1, 2]],
        )
        .unwrap();
        assert!(matches!(
            generate_uv_islands(&mesh, 0),
            Err(MeshError::MissingChannel { .. })
        ));
    }
}
