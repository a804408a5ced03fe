//! Laplacian smoothing of vertex positions.
//!
//! Runtime meshes split vertices along seams, so smoothing works on the
//! collapsed vertices (see [`crate::mesh::collapse`]): every copy of a seam
//! vertex moves to the same place and seams stay closed.
//!
//! # Example
//!
//! ```
//! use mutable_mesh::algo::smooth::{laplacian_smooth_positions, SmoothOptions};
//! use mutable_mesh::mesh::build_from_triangles;
//! use nalgebra::Vector3;
//!
//! // A fan around a raised centre vertex; the rim is an open edge.
//! let positions = [
//!     Vector3::new(0.0, 0.0, 1.0),
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::new(0.0, 1.0, 0.0),
//!     Vector3::new(-1.0, 0.0, 0.0),
//!     Vector3::new(0.0, -1.0, 0.0),
//! ];
//! let fan = [[0, 1, 2], [0, 2, 3], [0, 3, 4], [0, 4, 1]];
//! let mut mesh = build_from_triangles(&positions, &fan).unwrap();
//!
//! laplacian_smooth_positions(&mut mesh, &SmoothOptions::default()).unwrap();
//! let smoothed = mesh.positions().unwrap();
//! assert!((smoothed[0].z - 0.5).abs() < 1e-6);
//! assert_eq!(smoothed[1], positions[1]);
//! ```

use nalgebra::Vector3;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::buffer::iter::write_channel_vec3f;
use crate::buffer::MeshBufferSemantic;
use crate::error::{MeshError, Result};
use crate::mesh::{collapse_positions, CollapseOptions, Mesh};

/// Vertices per rayon batch.
const PARALLEL_BATCH: usize = 2048;

/// Options for [`laplacian_smooth_positions`].
#[derive(Debug, Clone)]
pub struct SmoothOptions {
    /// Smoothing passes.
    pub iterations: u32,
    /// Fraction of the way each vertex moves toward its neighbour centroid
    /// per pass, in `[0, 1]`.
    pub weight: f32,
    /// Keep vertices on open edges in place.
    pub pin_open_edges: bool,
    /// Whether to use parallel execution (default: true).
    pub parallel: bool,
}

impl Default for SmoothOptions {
    fn default() -> Self {
        Self {
            iterations: 1,
            weight: 0.5,
            pin_open_edges: true,
            parallel: true,
        }
    }
}

impl SmoothOptions {
    /// Set the number of passes.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the per-pass weight, clamped to `[0, 1]`.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Let vertices on open edges move too.
    pub fn free_open_edges(mut self) -> Self {
        self.pin_open_edges = false;
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Collapsed connectivity of a mesh.
struct Adjacency {
    /// Representative of every vertex.
    map: Vec<u32>,
    /// Distinct representatives, ascending.
    reps: Vec<u32>,
    /// Neighbour representatives, parallel to `reps`.
    neighbors: Vec<Vec<u32>>,
    /// Whether the representative lies on an open edge, parallel to `reps`.
    boundary: Vec<bool>,
}

impl Adjacency {
    fn new(positions: &[Vector3<f32>], triangles: &[[u32; 3]]) -> Self {
        let map = collapse_positions(positions, &CollapseOptions::default());
        let reps: Vec<u32> = (0..map.len() as u32)
            .filter(|&v| map[v as usize] == v)
            .collect();
        let slot: FxHashMap<u32, usize> = reps.iter().enumerate().map(|(i, &r)| (r, i)).collect();

        let mut edges: FxHashMap<(u32, u32), u32> = FxHashMap::default();
        for t in triangles {
            let c = t.map(|v| map[v as usize]);
            if c[0] == c[1] || c[1] == c[2] || c[0] == c[2] {
                continue;
            }
            for k in 0..3 {
                let (a, b) = (c[k], c[(k + 1) % 3]);
                *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }

        let mut neighbor_sets = vec![FxHashSet::default(); reps.len()];
        let mut boundary = vec![false; reps.len()];
        for (&(a, b), &count) in &edges {
            let (sa, sb) = (slot[&a], slot[&b]);
            neighbor_sets[sa].insert(b);
            neighbor_sets[sb].insert(a);
            if count == 1 {
                boundary[sa] = true;
                boundary[sb] = true;
            }
        }
        let neighbors = neighbor_sets
            .into_iter()
            .map(|s| {
                let mut n: Vec<u32> = s.into_iter().collect();
                n.sort_unstable();
                n
            })
            .collect();

        Self {
            map,
            reps,
            neighbors,
            boundary,
        }
    }
}

/// Move every vertex of `mesh` towards the centroid of its neighbours.
///
/// For each iteration, `p' = p + weight * (centroid - p)` over the collapsed
/// vertex adjacency. Vertices without neighbours stay where they are, as do
/// open-edge vertices unless `pin_open_edges` is cleared.
///
/// Returns [`MeshError::MissingChannel`] without positions and
/// [`MeshError::EmptyMesh`] without faces.
pub fn laplacian_smooth_positions(mesh: &mut Mesh, options: &SmoothOptions) -> Result<()> {
    let mut positions = mesh.positions().ok_or(MeshError::MissingChannel {
        semantic: MeshBufferSemantic::Position,
    })?;
    let triangles = mesh.triangles();
    if triangles.is_empty() {
        return Err(MeshError::EmptyMesh);
    }
    if options.iterations == 0 || options.weight == 0.0 {
        return Ok(());
    }

    let adjacency = Adjacency::new(&positions, &triangles);
    let weight = options.weight;

    for _ in 0..options.iterations {
        let step = |i: usize| -> Vector3<f32> {
            let p = positions[adjacency.reps[i] as usize];
            let neighbors = &adjacency.neighbors[i];
            if neighbors.is_empty() || (options.pin_open_edges && adjacency.boundary[i]) {
                return p;
            }
            let sum: Vector3<f32> = neighbors
                .iter()
                .map(|&n| positions[n as usize])
                .sum();
            let centroid = sum / neighbors.len() as f32;
            p + (centroid - p) * weight
        };

        let moved: Vec<Vector3<f32>> = if options.parallel {
            (0..adjacency.reps.len())
                .into_par_iter()
                .with_min_len(PARALLEL_BATCH)
                .map(step)
                .collect()
        } else {
            (0..adjacency.reps.len()).map(step).collect()
        };

        for (&r, p) in adjacency.reps.iter().zip(moved) {
            positions[r as usize] = p;
        }
        for (v, &r) in adjacency.map.iter().enumerate() {
            positions[v] = positions[r as usize];
        }
    }

    write_channel_vec3f(&mut mesh.vertex_buffers, MeshBufferSemantic::Position, 0, &positions);
    log::debug!(
        "smoothed {} collapsed vertices over {} iterations",
        adjacency.reps.len(),
        options.iterations
    );
    Ok(())
}
