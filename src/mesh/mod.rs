//! Core mesh data structures.
//!
//! # Overview
//!
//! The primary type is [`Mesh`]: vertex and index [`MeshBufferSet`]s plus
//! the data that travels with them (surfaces, skeleton, physics body, bone
//! poses, layouts and vertex identity).
//!
//! - [`Surface`] / [`SurfaceSubMesh`] partition the vertex and index ranges.
//! - [`Skeleton`] and [`PhysicsBody`] are shared through `Arc` and cloned
//!   before any change.
//! - Vertex identity ([`vertex_id`]) survives vertex removal.
//! - [`collapse`] maps seam duplicates onto one representative vertex.
//! - [`MeshIndex`] lets index code be written once for 16- and 32-bit
//!   index buffers.
//!
//! [`MeshBufferSet`]: crate::buffer::MeshBufferSet
//!
//! # Construction
//!
//! ```
//! use mutable_mesh::mesh::{build_from_triangles, Mesh};
//! use nalgebra::Vector3;
//!
//! let vertices = vec![
//!     Vector3::new(0.0, 0.0, 0.0),
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::new(0.5, 1.0, 0.0),
//! ];
//! let mesh: Mesh = build_from_triangles(&vertices, &[[0, 1, 2]]).unwrap();
//! assert!(mesh.is_valid());
//! ```

mod builder;
pub mod collapse;
mod entity;
mod index;
mod physics;
mod skeleton;
mod surface;
pub mod vertex_id;

pub use builder::{build_from_triangles, MeshBuilder};
pub use collapse::{collapse_positions, create_collapsed_vertex_map, is_mesh_closed, CollapseOptions};
pub use entity::{Mesh, MeshBufferType, MeshCopyFlags, MeshFlags, VertexIdMode};
pub use index::{read_index, write_index, IndexFormat, MeshIndex};
pub use physics::{
    PhysicsBody, PhysicsBodyAggregate, PhysicsBox, PhysicsCapsule, PhysicsConvex, PhysicsSphere,
    PhysicsTaperedCapsule,
};
pub use skeleton::{BoneName, BonePose, BoneUsageFlags, Skeleton, Transform3f};
pub use surface::{surfaces_partition, Surface, SurfaceSubMesh};
pub use vertex_id::{make_ids_explicit, make_vertex_ids_relative, vertex_ids, MeshVertexIdIterator};

/// Resolves reference meshes to loaded meshes.
///
/// Implemented by whatever owns the mesh resources; operators never resolve
/// references themselves.
pub trait MeshResolver {
    /// Load the mesh behind `reference_id`, applying `morph` if not empty.
    fn resolve(&self, reference_id: u32, morph: &str) -> Option<std::sync::Arc<Mesh>>;
}

/// Resolve `mesh` if it is a reference, otherwise return it unchanged.
pub fn resolve_reference<R: MeshResolver + ?Sized>(
    mesh: &std::sync::Arc<Mesh>,
    resolver: &R,
) -> Option<std::sync::Arc<Mesh>> {
    if mesh.is_reference() {
        resolver.resolve(mesh.reference_id, &mesh.referenced_morph)
    } else {
        Some(mesh.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Store(HashMap<u32, Arc<Mesh>>);

    impl MeshResolver for Store {
        fn resolve(&self, reference_id: u32, _morph: &str) -> Option<Arc<Mesh>> {
            self.0.get(&reference_id).cloned()
        }
    }

    #[test]
    fn test_resolve_reference() {
        let loaded = Arc::new(
            build_from_triangles(
                &[nalgebra::Vector3::zeros(); 3],
                &[[0, 1, 2]],
            )
            .unwrap(),
        );
        let store = Store(HashMap::from([(9, loaded.clone())]));

        let reference = Arc::new(Mesh::new_reference(9, false));
        let resolved = resolve_reference(&reference, &store).unwrap();
        assert_eq!(resolved.vertex_count(), 3);

        let missing = Arc::new(Mesh::new_reference(10, false));
        assert!(resolve_reference(&missing, &store).is_none());

        let direct = resolve_reference(&loaded, &store).unwrap();
        assert!(Arc::ptr_eq(&direct, &loaded));
    }
}
