//! Clipping against a closed mesh.
//!
//! A vertex is inside the clip mesh when a ray cast from it along +Z crosses
//! the clip surface an odd number of times. The clip triangles are bucketed
//! into a coarse XY grid over the clip bounds so each ray only tests the
//! triangles of one cell.
//!
//! A ray that passes exactly through a clip vertex or edge touches several
//! triangles. Such hits are counted once per ray, keyed by the collapsed
//! vertex or the collapsed edge. The bounds test and the grid bucketing use
//! an epsilon proportional to the clip mesh size, see [`ClipOptions`].
//! Barycentric weights use a fixed unitless tolerance.
//!
//! # Example
//!
//! ```
//! use mutable_mesh::algo::clip::{clip_classify_vertices, ClipOptions};
//! use mutable_mesh::mesh::build_from_triangles;
//! use nalgebra::Vector3;
//!
//! // A closed tetrahedron around the origin.
//! let clip = build_from_triangles(
//!     &[
//!         Vector3::new(-1.0, -1.0, -1.0),
//!         Vector3::new(2.0, -1.0, -1.0),
//!         Vector3::new(-1.0, 2.0, -1.0),
//!         Vector3::new(-1.0, -1.0, 2.0),
//!     ],
//!     &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
//! )
//! .unwrap();
//! let points = build_from_triangles(
//!     &[
//!         Vector3::new(0.0, 0.0, 0.0),
//!         Vector3::new(5.0, 0.0, 0.0),
//!         Vector3::new(0.0, 5.0, 0.0),
//!     ],
//!     &[[0, 1, 2]],
//! )
//! .unwrap();
//!
//! let inside = clip_classify_vertices(&points, &clip, &ClipOptions::default());
//! assert!(inside[0]);
//! assert!(!inside[1]);
//! ```

use bit_vec::BitVec;
use nalgebra::{Matrix4, Vector2, Vector3};
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use super::remove::{mask_from_ids, remove_vertices_with_cull_set};
use super::transform::transform_vertices;
use crate::error::{MeshError, Result};
use crate::geometry::{barycentric_2d, Aabb};
use crate::mesh::{
    create_collapsed_vertex_map, is_mesh_closed, vertex_ids, CollapseOptions, Mesh,
};

/// Tolerance on barycentric weights when a ray meets a clip triangle.
/// Weights are unitless, so this does not scale with the clip mesh.
const BARYCENTRIC_EPSILON: f32 = 1e-5;

/// Options for clip classification.
#[derive(Debug, Clone)]
pub struct ClipOptions {
    /// Snapping epsilon as a fraction of the clip bounds diagonal.
    pub epsilon_scale: f32,

    /// Lower bound of the snapping epsilon.
    pub min_epsilon: f32,

    /// Upper bound of the snapping epsilon.
    pub max_epsilon: f32,

    /// Cells per axis of the XY acceleration grid.
    pub grid_size: usize,

    /// Whether to classify vertices in parallel (default: true).
    pub parallel: bool,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            epsilon_scale: 1e-6,
            min_epsilon: 1e-7,
            max_epsilon: 1e-3,
            grid_size: 8,
            parallel: true,
        }
    }
}

impl ClipOptions {
    /// Set the epsilon scale.
    pub fn with_epsilon_scale(mut self, scale: f32) -> Self {
        self.epsilon_scale = scale.max(0.0);
        self
    }

    /// Set the epsilon clamp range.
    pub fn with_epsilon_range(mut self, min: f32, max: f32) -> Self {
        self.min_epsilon = min.max(0.0);
        self.max_epsilon = max.max(self.min_epsilon);
        self
    }

    /// Set the grid resolution.
    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size.max(1);
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Snapping epsilon for clip bounds with the given diagonal.
    pub fn epsilon_for(&self, diagonal: f32) -> f32 {
        (self.epsilon_scale * diagonal).clamp(self.min_epsilon, self.max_epsilon)
    }
}

/// Clip triangles bucketed over the XY extent of the clip bounds.
struct ClipGrid {
    positions: Vec<Vector3<f32>>,
    triangles: Vec<[u32; 3]>,
    collapsed: Vec<u32>,
    bounds: Aabb,
    cells: Vec<Vec<u32>>,
    size: usize,
    cell_extent: Vector2<f32>,
    epsilon: f32,
}

impl ClipGrid {
    fn new(clip: &Mesh, options: &ClipOptions) -> Option<Self> {
        let positions = clip.positions()?;
        let triangles = clip.triangles();
        if positions.is_empty() || triangles.is_empty() {
            return None;
        }
        let collapsed = create_collapsed_vertex_map(clip, &CollapseOptions::default());
        let bounds = Aabb::from_points(&positions);
        let epsilon = options.epsilon_for(bounds.diagonal());
        let size = options.grid_size.max(1);
        let extent = bounds.max - bounds.min;
        let cell_extent = Vector2::new(
            (extent.x / size as f32).max(f32::MIN_POSITIVE),
            (extent.y / size as f32).max(f32::MIN_POSITIVE),
        );

        let mut grid = Self {
            positions,
            triangles,
            collapsed,
            bounds,
            cells: vec![Vec::new(); size * size],
            size,
            cell_extent,
            epsilon,
        };
        for (t, tri) in grid.triangles.iter().enumerate() {
            let mut lo = Vector2::repeat(f32::MAX);
            let mut hi = Vector2::repeat(f32::MIN);
            for &v in tri {
                let p = grid.positions[v as usize].xy();
                lo = lo.inf(&p);
                hi = hi.sup(&p);
            }
            let eps = Vector2::repeat(epsilon);
            let (x0, y0) = grid.cell_of(&(lo - eps));
            let (x1, y1) = grid.cell_of(&(hi + eps));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    grid.cells[y * size + x].push(t as u32);
                }
            }
        }
        Some(grid)
    }

    fn cell_of(&self, p: &Vector2<f32>) -> (usize, usize) {
        let rel = p - self.bounds.min.xy();
        let max = (self.size - 1) as f32;
        let x = (rel.x / self.cell_extent.x).floor().clamp(0.0, max) as usize;
        let y = (rel.y / self.cell_extent.y).floor().clamp(0.0, max) as usize;
        (x, y)
    }

    /// Whether `p` is inside the clip mesh.
    fn is_inside(&self, p: &Vector3<f32>) -> bool {
        if !self.bounds.contains(p, self.epsilon) {
            return false;
        }

        let (x, y) = self.cell_of(&p.xy());
        let mut hits = 0u32;
        let mut vertex_hits: FxHashSet<u32> = FxHashSet::default();
        let mut edge_hits: FxHashSet<(u32, u32)> = FxHashSet::default();

        for &t in &self.cells[y * self.size + x] {
            let tri = self.triangles[t as usize];
            let [a, b, c] = tri.map(|v| self.positions[v as usize]);
            let Some(bary) = barycentric_2d(&p.xy(), &a.xy(), &b.xy(), &c.xy()) else {
                // Vertical triangles cannot be crossed by a vertical ray.
                continue;
            };
            if bary.iter().any(|&w| w < -BARYCENTRIC_EPSILON) {
                continue;
            }
            let z = a.z * bary.x + b.z * bary.y + c.z * bary.z;
            if z <= p.z {
                continue;
            }

            let near: Vec<usize> = (0..3).filter(|&k| bary[k] <= BARYCENTRIC_EPSILON).collect();
            match near.len() {
                0 => hits += 1,
                1 => {
                    // On the edge opposite the near-zero weight.
                    let k = near[0];
                    let e0 = self.collapsed[tri[(k + 1) % 3] as usize];
                    let e1 = self.collapsed[tri[(k + 2) % 3] as usize];
                    if edge_hits.insert((e0.min(e1), e0.max(e1))) {
                        hits += 1;
                    }
                }
                _ => {
                    let corner = (0..3)
                        .max_by(|&i, &j| bary[i].total_cmp(&bary[j]))
                        .unwrap_or(0);
                    if vertex_hits.insert(self.collapsed[tri[corner] as usize]) {
                        hits += 1;
                    }
                }
            }
        }
        hits % 2 == 1
    }
}

/// Mark every vertex of `mesh` that lies inside `clip`.
///
/// Returns an all-false set when either mesh has no geometry.
pub fn clip_classify_vertices(mesh: &Mesh, clip: &Mesh, options: &ClipOptions) -> BitVec {
    let vertex_count = mesh.vertex_count();
    let (Some(grid), Some(positions)) = (ClipGrid::new(clip, options), mesh.positions()) else {
        return BitVec::from_elem(vertex_count, false);
    };

    let inside: Vec<bool> = if options.parallel {
        positions
            .par_iter()
            .with_min_len(2048)
            .map(|p| grid.is_inside(p))
            .collect()
    } else {
        positions.iter().map(|p| grid.is_inside(p)).collect()
    };

    let mut bits = BitVec::from_elem(vertex_count, false);
    for (v, &is_inside) in inside.iter().enumerate() {
        if is_inside {
            bits.set(v, true);
        }
    }
    bits
}

fn check_clip_inputs(source: &Mesh, clip: &Mesh) -> Result<()> {
    if source.vertex_count() == 0 || clip.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    if !is_mesh_closed(clip) {
        log::warn!(
            "clip mesh with {} faces is not closed, clipping may be wrong",
            clip.face_count()
        );
    }
    Ok(())
}

/// Remove the vertices of `source` inside `clip` and every face using one.
///
/// Returns [`MeshError::NoChange`] when no vertex is inside.
pub fn clip_with_mesh(source: &Mesh, clip: &Mesh, options: &ClipOptions) -> Result<Mesh> {
    check_clip_inputs(source, clip)?;
    let inside = clip_classify_vertices(source, clip, options);
    if inside.none() {
        return Err(MeshError::NoChange);
    }

    let mut result = source.clone();
    remove_vertices_with_cull_set(&mut result, &inside, false);
    Ok(result)
}

/// Mask mesh listing the ids of the vertices of `source` inside `clip`.
///
/// The mask is empty when no vertex is inside.
pub fn mask_clip_mesh(source: &Mesh, clip: &Mesh, options: &ClipOptions) -> Result<Mesh> {
    check_clip_inputs(source, clip)?;
    let inside = clip_classify_vertices(source, clip, options);
    let ids: Vec<u64> = vertex_ids(source)
        .into_iter()
        .enumerate()
        .filter(|&(v, _)| inside[v])
        .map(|(_, id)| id)
        .collect();
    log::debug!("clip mask selects {} of {} vertices", ids.len(), source.vertex_count());
    Ok(mask_from_ids(&ids))
}

/// Transform only the vertices of `source` inside `clip`.
///
/// Returns [`MeshError::NoChange`] when no vertex is inside.
pub fn transform_with_mesh(
    source: &Mesh,
    clip: &Mesh,
    matrix: &Matrix4<f32>,
    options: &ClipOptions,
) -> Result<Mesh> {
    check_clip_inputs(source, clip)?;
    let inside = clip_classify_vertices(source, clip, options);
    if inside.none() {
        return Err(MeshError::NoChange);
    }

    let mut result = source.clone();
    transform_vertices(&mut result, matrix, Some(&inside));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, MeshBuilder};

    fn box_mesh(min: Vector3<f32>, max: Vector3<f32>) -> Mesh {
        let c = |x: bool, y: bool, z: bool| {
            Vector3::new(
                if x { max.x } else { min.x },
                if y { max.y } else { min.y },
                if z { max.z } else { min.z },
            )
        };
        let corners = vec![
            c(false, false, false),
            c(true, false, false),
            c(true, true, false),
            c(false, true, false),
            c(false, false, true),
            c(true, false, true),
            c(true, true, true),
            c(false, true, true),
        ];
        MeshBuilder::new()
            .positions(corners)
            .quads(&[
                [0, 3, 2, 1],
                [4, 5, 6, 7],
                [0, 1, 5, 4],
                [2, 3, 7, 6],
                [1, 2, 6, 5],
                [0, 4, 7, 3],
            ])
            .build()
            .unwrap()
    }

    fn quad(prefix: u32) -> Mesh {
        MeshBuilder::new()
            .positions(vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
            ])
            .triangles(vec![[0, 2, 1], [1, 2, 3]])
            .id_prefix(prefix)
            .build()
            .unwrap()
    }

    #[test]
    fn test_epsilon_is_clamped() {
        let options = ClipOptions::default();
        assert_eq!(options.epsilon_for(1.0), 1e-6);
        assert_eq!(options.epsilon_for(1e-6), options.min_epsilon);
        assert_eq!(options.epsilon_for(1e9), options.max_epsilon);
    }

    #[test]
    fn test_classify_box() {
        let clip = box_mesh(Vector3::repeat(-1.0), Vector3::repeat(1.0));
        let points = build_from_triangles(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.5, -0.5, 0.9),
                Vector3::new(3.0, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 1.5),
                Vector3::new(0.0, 0.0, -1.5),
            ],
            &[[0, 1, 2], [2, 3, 4]],
        )
        .unwrap();

        let sequential = clip_classify_vertices(&points, &clip, &ClipOptions::default().sequential());
        let parallel = clip_classify_vertices(&points, &clip, &ClipOptions::default());
        assert_eq!(sequential, parallel);
        assert!(sequential[0]);
        assert!(sequential[1]);
        assert!(!sequential[2]);
        assert!(!sequential[3]);
        assert!(!sequential[4]);
    }

    #[test]
    fn test_large_epsilon_does_not_widen_triangles() {
        let clip = box_mesh(Vector3::repeat(-1.0), Vector3::repeat(1.0));
        let points = build_from_triangles(
            &[
                Vector3::new(1.05, 0.2, 0.0),
                Vector3::new(0.95, 0.2, 0.0),
                Vector3::new(0.0, 0.0, 0.0),
            ],
            &[[0, 1, 2]],
        )
        .unwrap();
        let options = ClipOptions::default()
            .with_epsilon_scale(1.0)
            .with_epsilon_range(0.1, 0.1)
            .sequential();
        let inside = clip_classify_vertices(&points, &clip, &options);
        assert!(!inside[0]);
        assert!(inside[1]);
        assert!(inside[2]);
    }

    #[test]
    fn test_ray_through_shared_edge_counts_once() {
        // (0, 0) lies on the diagonal shared by the two top triangles.
        let clip = box_mesh(Vector3::repeat(-1.0), Vector3::repeat(1.0));
        let points = build_from_triangles(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.5, 0.5, 0.0),
                Vector3::new(-1.0, -1.0, 0.0),
            ],
            &[[0, 1, 2]],
        )
        .unwrap();
        let inside = clip_classify_vertices(&points, &clip, &ClipOptions::default());
        assert!(inside[0]);
        assert!(inside[1]);
    }

    #[test]
    fn test_clip_quad() {
        let clip = box_mesh(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(0.5, 2.0, 1.0));
        let result = clip_with_mesh(&quad(7), &clip, &ClipOptions::default()).unwrap();

        assert_eq!(result.vertex_count(), 2);
        assert_eq!(result.face_count(), 0);
        assert_eq!(vertex_ids(&result), vec![(7u64 << 32) | 2, (7u64 << 32) | 3]);
        let sub = result.surfaces[0].sub_meshes[0];
        assert_eq!((sub.vertex_begin, sub.vertex_end), (0, 2));
        assert_eq!((sub.index_begin, sub.index_end), (0, 0));
    }

    #[test]
    fn test_clip_outside_is_no_change() {
        let clip = box_mesh(Vector3::repeat(5.0), Vector3::repeat(6.0));
        let err = clip_with_mesh(&quad(0), &clip, &ClipOptions::default()).unwrap_err();
        assert!(matches!(err, MeshError::NoChange));

        let mask = mask_clip_mesh(&quad(0), &clip, &ClipOptions::default()).unwrap();
        assert_eq!(mask.vertex_count(), 0);
    }

    #[test]
    fn test_mask_lists_inside_ids() {
        let clip = box_mesh(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(0.5, 2.0, 1.0));
        let mask = mask_clip_mesh(&quad(7), &clip, &ClipOptions::default()).unwrap();
        assert!(mask.are_vertex_ids_explicit());
        assert_eq!(vertex_ids(&mask), vec![7u64 << 32, (7u64 << 32) | 1]);
    }

    #[test]
    fn test_transform_inside_only() {
        let clip = box_mesh(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(0.5, 2.0, 1.0));
        let lift = Matrix4::new_translation(&Vector3::new(0.0, 0.0, 2.0));
        let result = transform_with_mesh(&quad(0), &clip, &lift, &ClipOptions::default()).unwrap();
        let positions = result.positions().unwrap();
        assert_eq!(positions[0].z, 2.0);
        assert_eq!(positions[1].z, 2.0);
        assert_eq!(positions[2].z, 0.0);
        assert_eq!(positions[3].z, 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let clip = box_mesh(Vector3::repeat(-1.0), Vector3::repeat(1.0));
        let err = clip_with_mesh(&Mesh::new(), &clip, &ClipOptions::default()).unwrap_err();
        assert!(matches!(err, MeshError::EmptyMesh));
        let err = clip_with_mesh(&quad(0), &Mesh::new(), &ClipOptions::default()).unwrap_err();
        assert!(matches!(err, MeshError::EmptyMesh));
    }
}
