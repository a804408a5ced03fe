//! Position-based vertex collapsing.
//!
//! Runtime meshes duplicate vertices along UV and normal seams. Collapsing
//! maps every vertex to the first vertex found at (nearly) the same position,
//! which recovers the connectivity of the underlying surface.

use nalgebra::Vector3;
use rustc_hash::FxHashMap;

use super::entity::Mesh;

/// Options for [`create_collapsed_vertex_map`].
#[derive(Debug, Clone, Copy)]
pub struct CollapseOptions {
    /// Edge length of the spatial hash cells.
    pub cell_size: f32,
    /// Maximum distance between vertices that collapse together.
    pub tolerance: f32,
}

impl Default for CollapseOptions {
    fn default() -> Self {
        Self {
            cell_size: 0.01,
            tolerance: 1e-6,
        }
    }
}

impl CollapseOptions {
    /// Set the hash cell size.
    pub fn with_cell_size(mut self, cell_size: f32) -> Self {
        self.cell_size = cell_size.max(f32::EPSILON);
        self
    }

    /// Set the collapse tolerance.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }
}

type Cell = (i32, i32, i32);

#[inline]
fn cell_of(p: &Vector3<f32>, inv_cell: f32) -> Cell {
    (
        (p.x * inv_cell).floor() as i32,
        (p.y * inv_cell).floor() as i32,
        (p.z * inv_cell).floor() as i32,
    )
}

/// Representative vertex for each vertex of `mesh`.
///
/// `map[i]` is the lowest-index vertex within `tolerance` of a chain of
/// vertices starting at `i`; `map[i] <= i` always holds. Meshes without
/// positions map every vertex to itself.
pub fn create_collapsed_vertex_map(mesh: &Mesh, options: &CollapseOptions) -> Vec<u32> {
    match mesh.positions() {
        Some(positions) => collapse_positions(&positions, options),
        None => (0..mesh.vertex_count() as u32).collect(),
    }
}

/// [`create_collapsed_vertex_map`] over a plain position list.
pub fn collapse_positions(positions: &[Vector3<f32>], options: &CollapseOptions) -> Vec<u32> {
    let inv_cell = 1.0 / options.cell_size.max(f32::EPSILON);
    let mut grid: FxHashMap<Cell, Vec<u32>> = FxHashMap::default();
    for (i, p) in positions.iter().enumerate() {
        grid.entry(cell_of(p, inv_cell)).or_default().push(i as u32);
    }

    // How many cells a tolerance ball can reach in each direction.
    let reach = (options.tolerance * inv_cell).ceil().max(1.0) as i32;
    let tolerance_sq = options.tolerance * options.tolerance;

    let unvisited = u32::MAX;
    let mut map = vec![unvisited; positions.len()];
    for i in 0..positions.len() {
        if map[i] != unvisited {
            continue;
        }
        map[i] = i as u32;
        let p = positions[i];
        let (cx, cy, cz) = cell_of(&p, inv_cell);
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let Some(bucket) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &j in bucket {
                        let j = j as usize;
                        if j > i
                            && map[j] == unvisited
                            && (positions[j] - p).norm_squared() <= tolerance_sq
                        {
                            map[j] = i as u32;
                        }
                    }
                }
            }
        }
    }
    map
}

/// Whether every edge between collapsed vertices is shared by exactly two triangles.
///
/// Triangles that degenerate after collapsing are ignored. A mesh without
/// triangles is not closed.
pub fn is_mesh_closed(mesh: &Mesh) -> bool {
    let map = create_collapsed_vertex_map(mesh, &CollapseOptions::default());
    let triangles = mesh.triangles();
    let mut edges: FxHashMap<(u32, u32), u32> = FxHashMap::default();
    let mut any = false;
    for t in &triangles {
        let c = [map[t[0] as usize], map[t[1] as usize], map[t[2] as usize]];
        if c[0] == c[1] || c[1] == c[2] || c[0] == c[2] {
            continue;
        }
        any = true;
        for k in 0..3 {
            let (a, b) = (c[k], c[(k + 1) % 3]);
            *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    any && edges.values().all(|&n| n == 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;

    fn cube_with_split_vertices() -> Mesh {
        // Each face has its own four vertices, like a hard-edged runtime cube.
        let corners = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
        ];
        let faces = [
            [0, 3, 2, 1],
            [4, 5, 6, 7],
            [0, 1, 5, 4],
            [2, 3, 7, 6],
            [1, 2, 6, 5],
            [0, 4, 7, 3],
        ];
        let mut positions = Vec::new();
        let mut triangles = Vec::new();
        for face in faces {
            let base = positions.len() as u32;
            positions.extend(face.iter().map(|&c| corners[c]));
            triangles.push([base, base + 1, base + 2]);
            triangles.push([base, base + 2, base + 3]);
        }
        build_from_triangles(&positions, &triangles).unwrap()
    }

    #[test]
    fn test_collapse_duplicates() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        ];
        let map = collapse_positions(&positions, &CollapseOptions::default());
        assert_eq!(map, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_collapse_across_cell_boundary() {
        let positions = vec![Vector3::new(0.01, 0.0, 0.0), Vector3::new(0.0099999, 0.0, 0.0)];
        let options = CollapseOptions::default().with_tolerance(1e-4);
        assert_eq!(collapse_positions(&positions, &options), vec![0, 0]);
    }

    #[test]
    fn test_split_cube_is_closed() {
        let cube = cube_with_split_vertices();
        assert_eq!(cube.vertex_count(), 24);
        assert!(is_mesh_closed(&cube));
    }

    #[test]
    fn test_open_mesh_is_not_closed() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let mesh = build_from_triangles(&positions, &[[0, 1, 2]]).unwrap();
        assert!(!is_mesh_closed(&mesh));
    }
}
