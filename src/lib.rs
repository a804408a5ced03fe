//! # mutable-mesh
//!
//! Format-polymorphic mesh buffers and the runtime operators that customize
//! them: clipping, vertex removal, morph targets, reshaping to a deformed
//! shape, skinning optimization and texture layout blocks.
//!
//! ## Features
//!
//! - **Self-describing buffers**: vertex data is a set of byte buffers whose
//!   channels (semantic, format, component count, offset) are data, with a
//!   conversion engine between all numeric and packed formats
//! - **Stable vertex identity**: implicit, relative and explicit 64-bit ids
//!   survive removal and clipping
//! - **Operators**: clip, remove, morph, difference, reshape, transform,
//!   skinning optimization, normal recompute and smoothing
//! - **Layouts**: UV islands, layout blocks and block coverage masks
//! - **Archive**: a binary little-endian mesh archive
//!
//! ## Quick Start
//!
//! ```
//! use mutable_mesh::prelude::*;
//! use nalgebra::{Matrix4, Vector3};
//!
//! let mesh = MeshBuilder::new()
//!     .positions(vec![
//!         Vector3::new(0.0, 0.0, 0.0),
//!         Vector3::new(1.0, 0.0, 0.0),
//!         Vector3::new(1.0, 1.0, 0.0),
//!         Vector3::new(0.0, 1.0, 0.0),
//!     ])
//!     .quads(&[[0, 1, 2, 3]])
//!     .id_prefix(7)
//!     .build()
//!     .unwrap();
//! assert_eq!(mesh.face_count(), 2);
//! assert_eq!(vertex_ids(&mesh)[2], (7u64 << 32) | 2);
//!
//! // Operators return a new mesh, or an error that tells whether there was
//! // simply nothing to do.
//! let moved = transform(&mesh, &Matrix4::new_translation(&Vector3::z())).unwrap();
//! assert_eq!(moved.positions().unwrap()[2], Vector3::new(1.0, 1.0, 1.0));
//!
//! let morph = difference(&mesh, &mesh, &[], false).unwrap();
//! assert_eq!(morph.vertex_count(), 0);
//! ```
//!
//! ## Reading and Writing Channels
//!
//! ```
//! use mutable_mesh::prelude::*;
//! use nalgebra::Vector3;
//!
//! # let mesh = build_from_triangles(
//! #     &[Vector3::zeros(), Vector3::x(), Vector3::y()],
//! #     &[[0, 1, 2]],
//! # ).unwrap();
//! let mut it = UntypedMeshBufferIteratorConst::new(
//!     &mesh.vertex_buffers,
//!     MeshBufferSemantic::Position,
//!     0,
//! );
//! it.inc();
//! assert_eq!(it.get_as_vec3f(), Vector3::x());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod buffer;
pub mod error;
pub mod geometry;
pub mod io;
pub mod layout;
pub mod mesh;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use mutable_mesh::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::clip::{clip_with_mesh, ClipOptions};
    pub use crate::algo::difference::difference;
    pub use crate::algo::morph::{morph, morph2};
    pub use crate::algo::remove::remove_vertices_with_cull_set;
    pub use crate::algo::reshape::{apply_shape, bind_shape_reshape, BindOptions, ReshapeOptions};
    pub use crate::algo::transform::transform;
    pub use crate::buffer::{
        MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet,
        UntypedMeshBufferIterator, UntypedMeshBufferIteratorConst,
    };
    pub use crate::error::{MeshError, Result};
    pub use crate::layout::{Layout, LayoutBlock};
    pub use crate::mesh::{
        build_from_triangles, vertex_ids, Mesh, MeshBufferType, MeshBuilder, MeshFlags,
        VertexIdMode,
    };
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use bit_vec::BitVec;
    use nalgebra::Vector3;

    #[test]
    fn test_prelude_round_trip() {
        let positions = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let base = build_from_triangles(&positions, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        assert!(base.is_valid());
        assert_eq!(base.vertex_id_mode(), VertexIdMode::Implicit);

        let raised: Vec<_> = positions.iter().map(|p| p + Vector3::z()).collect();
        let target = build_from_triangles(&raised, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        let morph_target = difference(&base, &target, &[], false).unwrap();

        // Drop vertex 1 first; the morph still finds the rest by id.
        let mut mesh = base.clone();
        remove_vertices_with_cull_set(&mut mesh, &BitVec::from_fn(4, |v| v == 1), false);
        assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Relative);
        assert_eq!(vertex_ids(&mesh), vec![0, 2, 3]);

        morph(&mut mesh, &morph_target, 1.0).unwrap();
        assert!(mesh.positions().unwrap().iter().all(|p| p.z == 1.0));
        assert_eq!(mesh.face_count(), 1);
    }
}
