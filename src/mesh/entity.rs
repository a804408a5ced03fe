//! The [`Mesh`] entity.

use std::sync::Arc;

use bitflags::bitflags;
use nalgebra::Vector3;

use super::index::{read_index, write_index, IndexFormat, MeshIndex};
use super::physics::PhysicsBody;
use super::skeleton::{BoneName, BonePose, Skeleton};
use super::surface::{surfaces_partition, Surface, SurfaceSubMesh};
use crate::buffer::iter::read_channel_vec3f;
use crate::buffer::{MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet};
use crate::layout::Layout;

bitflags! {
    /// Mesh-level flags, persisted as one 32-bit word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MeshFlags: u32 {
        /// The mesh only carries a handle to an externally resolved mesh.
        const IS_REFERENCE = 1 << 0;
        /// The referenced mesh must be loaded eagerly.
        const FORCE_LOAD = 1 << 1;
    }
}

bitflags! {
    /// Which parts of a mesh [`Mesh::clone_with`] copies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MeshCopyFlags: u32 {
        /// Vertex buffers.
        const VERTEX_BUFFERS = 1 << 0;
        /// Index buffers.
        const INDEX_BUFFERS = 1 << 1;
        /// Additional buffers (reshape bindings).
        const ADDITIONAL_BUFFERS = 1 << 2;
        /// Layouts.
        const LAYOUTS = 1 << 3;
        /// Skeleton reference and skeleton ids.
        const SKELETON = 1 << 4;
        /// Main physics body.
        const PHYSICS_BODY = 1 << 5;
        /// Additional physics bodies.
        const ADDITIONAL_PHYSICS = 1 << 6;
        /// Bone poses.
        const POSES = 1 << 7;
        /// Bone map.
        const BONE_MAP = 1 << 8;
        /// Surfaces.
        const SURFACES = 1 << 9;
        /// Tags.
        const TAGS = 1 << 10;
        /// Streamed resource ids.
        const STREAMED_RESOURCES = 1 << 11;
    }
}

/// Key of an additional buffer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u32)]
pub enum MeshBufferType {
    /// Unused slot.
    #[default]
    None = 0,
    /// Per-bone binding to a shape mesh.
    SkeletonDeformBinding = 1,
    /// Per-sample-point binding of the physics body to a shape mesh.
    PhysicsBodyDeformBinding = 2,
    /// Per-primitive selection of the physics body primitives to deform.
    PhysicsBodyDeformSelection = 3,
    /// Per-sample-point offsets of the physics body binding.
    PhysicsBodyDeformOffsets = 4,
}

impl MeshBufferType {
    /// Decode a persisted value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::SkeletonDeformBinding),
            2 => Some(Self::PhysicsBodyDeformBinding),
            3 => Some(Self::PhysicsBodyDeformSelection),
            4 => Some(Self::PhysicsBodyDeformOffsets),
            _ => None,
        }
    }
}

/// How the vertices of a mesh are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexIdMode {
    /// No id channel: id is `prefix << 32 | index`.
    ///
    /// A zero prefix is allowed and makes the ids plain vertex indices, which
    /// is enough for meshes that are never matched against other meshes.
    Implicit,
    /// 32-bit id channel combined with the prefix.
    Relative,
    /// 64-bit id channel, prefix is zero.
    Explicit,
}

/// A triangle mesh with format-polymorphic vertex data.
///
/// Vertex data lives in [`vertex_buffers`](Self::vertex_buffers), one element
/// per vertex. Indices live in [`index_buffers`](Self::index_buffers) as a
/// single `VertexIndex` channel of `UInt16` or `UInt32`, one element per
/// index, three per triangle.
///
/// # Example
///
/// ```
/// use mutable_mesh::mesh::MeshBuilder;
/// use nalgebra::Vector3;
///
/// let mesh = MeshBuilder::new()
///     .positions(vec![
///         Vector3::new(0.0, 0.0, 0.0),
///         Vector3::new(1.0, 0.0, 0.0),
///         Vector3::new(0.0, 1.0, 0.0),
///     ])
///     .triangles(vec![[0, 1, 2]])
///     .build()
///     .unwrap();
///
/// assert_eq!(mesh.vertex_count(), 3);
/// assert_eq!(mesh.face_count(), 1);
/// assert!(mesh.are_vertex_ids_implicit());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Per-vertex data.
    pub vertex_buffers: MeshBufferSet,
    /// Triangle list indices.
    pub index_buffers: MeshBufferSet,
    /// Extra buffer sets keyed by their role.
    pub additional_buffers: Vec<(MeshBufferType, MeshBufferSet)>,
    /// One layout per UV channel that has one.
    pub layouts: Vec<Arc<Layout>>,
    /// Ids of the skeletons this mesh was built from.
    pub skeleton_ids: Vec<i32>,
    /// Shared skeleton.
    pub skeleton: Option<Arc<Skeleton>>,
    /// Shared physics body.
    pub physics_body: Option<Arc<PhysicsBody>>,
    /// Physics bodies that are not reshaped.
    pub additional_physics_bodies: Vec<Arc<PhysicsBody>>,
    /// Mesh-level flags.
    pub flags: MeshFlags,
    /// Surfaces partitioning the vertex and index ranges.
    pub surfaces: Vec<Surface>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Ids of streamed resources this mesh depends on.
    pub streamed_resources: Vec<u64>,
    /// Poses of the bones used by this mesh.
    pub bone_poses: Vec<BonePose>,
    /// Bones referenced by the `BoneIndices` channel.
    pub bone_map: Vec<BoneName>,
    /// High 32 bits of implicit and relative vertex ids.
    pub mesh_id_prefix: u32,
    /// Resource id of a reference mesh.
    pub reference_id: u32,
    /// Morph applied to a reference mesh when it is resolved.
    pub referenced_morph: String,
}

impl Mesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reference mesh that only carries a resource id.
    pub fn new_reference(id: u32, force_load: bool) -> Self {
        let mut flags = MeshFlags::IS_REFERENCE;
        flags.set(MeshFlags::FORCE_LOAD, force_load);
        Self {
            flags,
            reference_id: id,
            ..Default::default()
        }
    }

    /// Whether this is a reference mesh.
    #[inline]
    pub fn is_reference(&self) -> bool {
        self.flags.contains(MeshFlags::IS_REFERENCE)
    }

    /// Copy the requested parts of this mesh.
    ///
    /// Flags, id prefix and reference data are always copied.
    pub fn clone_with(&self, what: MeshCopyFlags) -> Mesh {
        let pick = |flag: MeshCopyFlags| what.contains(flag);
        Mesh {
            vertex_buffers: if pick(MeshCopyFlags::VERTEX_BUFFERS) {
                self.vertex_buffers.clone()
            } else {
                MeshBufferSet::new()
            },
            index_buffers: if pick(MeshCopyFlags::INDEX_BUFFERS) {
                self.index_buffers.clone()
            } else {
                MeshBufferSet::new()
            },
            additional_buffers: if pick(MeshCopyFlags::ADDITIONAL_BUFFERS) {
                self.additional_buffers.clone()
            } else {
                Vec::new()
            },
            layouts: if pick(MeshCopyFlags::LAYOUTS) {
                self.layouts.clone()
            } else {
                Vec::new()
            },
            skeleton_ids: if pick(MeshCopyFlags::SKELETON) {
                self.skeleton_ids.clone()
            } else {
                Vec::new()
            },
            skeleton: self.skeleton.clone().filter(|_| pick(MeshCopyFlags::SKELETON)),
            physics_body: self
                .physics_body
                .clone()
                .filter(|_| pick(MeshCopyFlags::PHYSICS_BODY)),
            additional_physics_bodies: if pick(MeshCopyFlags::ADDITIONAL_PHYSICS) {
                self.additional_physics_bodies.clone()
            } else {
                Vec::new()
            },
            flags: self.flags,
            surfaces: if pick(MeshCopyFlags::SURFACES) {
                self.surfaces.clone()
            } else {
                Vec::new()
            },
            tags: if pick(MeshCopyFlags::TAGS) {
                self.tags.clone()
            } else {
                Vec::new()
            },
            streamed_resources: if pick(MeshCopyFlags::STREAMED_RESOURCES) {
                self.streamed_resources.clone()
            } else {
                Vec::new()
            },
            bone_poses: if pick(MeshCopyFlags::POSES) {
                self.bone_poses.clone()
            } else {
                Vec::new()
            },
            bone_map: if pick(MeshCopyFlags::BONE_MAP) {
                self.bone_map.clone()
            } else {
                Vec::new()
            },
            mesh_id_prefix: self.mesh_id_prefix,
            reference_id: self.reference_id,
            referenced_morph: self.referenced_morph.clone(),
        }
    }

    /// Number of vertices. Zero for reference meshes.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_buffers.element_count()
    }

    /// Number of indices.
    #[inline]
    pub fn index_count(&self) -> usize {
        self.index_buffers.element_count()
    }

    /// Number of triangles.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.index_count() / 3
    }

    /// Whether the mesh has no vertices or no triangles.
    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0 || self.face_count() == 0
    }

    /// Width of the index buffer, `None` if there is none.
    pub fn index_format(&self) -> Option<IndexFormat> {
        let (b, c) = self
            .index_buffers
            .find_channel(MeshBufferSemantic::VertexIndex, 0)?;
        Some(IndexFormat::of(self.index_buffers.channel(b, c).format))
    }

    /// Raw index bytes, `None` if there is no index buffer.
    pub(crate) fn index_data(&self) -> Option<&[u8]> {
        let (b, _) = self
            .index_buffers
            .find_channel(MeshBufferSemantic::VertexIndex, 0)?;
        Some(self.index_buffers.buffer_data(b))
    }

    /// Read every index as `u32`.
    pub fn indices(&self) -> Vec<u32> {
        let (Some(format), Some(data)) = (self.index_format(), self.index_data()) else {
            return Vec::new();
        };
        match format {
            IndexFormat::U16 => collect_indices::<u16>(data, self.index_count()),
            IndexFormat::U32 => collect_indices::<u32>(data, self.index_count()),
        }
    }

    /// Triangles as index triples.
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        self.indices()
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect()
    }

    /// Replace the index buffer, picking the narrowest width for the vertex count.
    pub fn set_indices(&mut self, indices: &[u32]) {
        let format = IndexFormat::for_vertex_count(self.vertex_count());
        let mut set = MeshBufferSet::new();
        set.set_element_count(indices.len());
        let b = set.push_packed_buffer(&[MeshBufferChannel::new(
            MeshBufferSemantic::VertexIndex,
            0,
            format.buffer_format(),
            1,
            0,
        )]);
        let data = set.buffer_data_mut(b);
        for (i, &v) in indices.iter().enumerate() {
            match format {
                IndexFormat::U16 => write_index::<u16>(data, i, u16::from_usize(v as usize)),
                IndexFormat::U32 => write_index::<u32>(data, i, v),
            }
        }
        self.index_buffers = set;
    }

    /// Positions as float vectors, `None` without a position channel.
    pub fn positions(&self) -> Option<Vec<Vector3<f32>>> {
        read_channel_vec3f(&self.vertex_buffers, MeshBufferSemantic::Position, 0)
    }

    /// Whether the vertex buffers have the given channel.
    pub fn has_vertex_channel(&self, semantic: MeshBufferSemantic, semantic_index: i32) -> bool {
        self.vertex_buffers.has_channel(semantic, semantic_index)
    }

    /// How vertex ids are stored.
    ///
    /// A mesh without an id channel is implicit whatever its prefix,
    /// including zero.
    pub fn vertex_id_mode(&self) -> VertexIdMode {
        match self
            .vertex_buffers
            .find_channel(MeshBufferSemantic::VertexIndex, 0)
        {
            None => VertexIdMode::Implicit,
            Some((b, c)) => match self.vertex_buffers.channel(b, c).format {
                MeshBufferFormat::UInt64 | MeshBufferFormat::Int64 => VertexIdMode::Explicit,
                _ => VertexIdMode::Relative,
            },
        }
    }

    /// Whether ids are synthesized from prefix and index.
    pub fn are_vertex_ids_implicit(&self) -> bool {
        self.vertex_id_mode() == VertexIdMode::Implicit
    }

    /// Whether ids are stored as full 64-bit values.
    pub fn are_vertex_ids_explicit(&self) -> bool {
        self.vertex_id_mode() == VertexIdMode::Explicit
    }

    /// Make sure a non-empty mesh has at least one surface covering everything.
    pub fn ensure_surface_data(&mut self) {
        if self.surfaces.is_empty() && (self.vertex_count() > 0 || self.index_count() > 0) {
            self.surfaces.push(Surface::single(SurfaceSubMesh {
                vertex_begin: 0,
                vertex_end: self.vertex_count() as u32,
                index_begin: 0,
                index_end: self.index_count() as u32,
                external_id: 0,
            }));
        }
    }

    /// Reset to the canonical empty state: no data, one empty surface.
    pub fn reset_to_empty_surface(&mut self) {
        self.surfaces = vec![Surface::single(SurfaceSubMesh::default())];
    }

    /// Whether the surfaces tile the vertex and index ranges.
    pub fn surfaces_are_consistent(&self) -> bool {
        if self.surfaces.is_empty() {
            return true;
        }
        surfaces_partition(&self.surfaces, self.vertex_count(), self.index_count())
    }

    /// Structural checks used by debug assertions and tests.
    ///
    /// Every index must address a vertex, the surfaces must partition the
    /// buffers and vertex ids must not mix explicit ids with a prefix. A zero
    /// prefix is valid in every mode.
    pub fn is_valid(&self) -> bool {
        let vertex_count = self.vertex_count();
        if self.indices().iter().any(|&i| i as usize >= vertex_count) {
            return false;
        }
        if self.index_count() % 3 != 0 {
            return false;
        }
        if self.are_vertex_ids_explicit() && self.mesh_id_prefix != 0 {
            return false;
        }
        self.surfaces_are_consistent()
    }

    /// Additional buffer set of the given role.
    pub fn additional_buffer(&self, kind: MeshBufferType) -> Option<&MeshBufferSet> {
        self.additional_buffers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, set)| set)
    }

    /// Insert or replace the additional buffer set of the given role.
    pub fn set_additional_buffer(&mut self, kind: MeshBufferType, set: MeshBufferSet) {
        match self.additional_buffers.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = set,
            None => self.additional_buffers.push((kind, set)),
        }
    }

    /// Index of the pose of `bone`.
    pub fn find_bone_pose(&self, bone: BoneName) -> Option<usize> {
        self.bone_poses.iter().position(|p| p.bone_id == bone)
    }

    /// Bytes held by all buffer sets.
    pub fn data_size(&self) -> usize {
        self.vertex_buffers.data_size()
            + self.index_buffers.data_size()
            + self
                .additional_buffers
                .iter()
                .map(|(_, s)| s.data_size())
                .sum::<usize>()
    }
}

fn collect_indices<I: MeshIndex>(data: &[u8], count: usize) -> Vec<u32> {
    (0..count)
        .map(|i| read_index::<I>(data, i).to_usize() as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshBuilder;

    fn triangle() -> Mesh {
        MeshBuilder::new()
            .positions(vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ])
            .triangles(vec![[0, 1, 2]])
            .build()
            .unwrap()
    }

    #[test]
    fn test_reference_mesh_has_no_data() {
        let mesh = Mesh::new_reference(42, true);
        assert!(mesh.is_reference());
        assert!(mesh.flags.contains(MeshFlags::FORCE_LOAD));
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.index_count(), 0);
        assert!(mesh.positions().is_none());
        assert!(mesh.indices().is_empty());
    }

    #[test]
    fn test_indices_round_trip() {
        let mut mesh = triangle();
        assert_eq!(mesh.index_format(), Some(IndexFormat::U16));
        assert_eq!(mesh.triangles(), vec![[0, 1, 2]]);
        mesh.set_indices(&[2, 1, 0]);
        assert_eq!(mesh.indices(), vec![2, 1, 0]);
        assert!(mesh.is_valid());
    }

    #[test]
    fn test_out_of_range_index_is_invalid() {
        let mut mesh = triangle();
        mesh.set_indices(&[0, 1, 3]);
        assert!(!mesh.is_valid());
    }

    #[test]
    fn test_clone_with_subset() {
        let mut mesh = triangle();
        mesh.tags.push("body".into());
        mesh.mesh_id_prefix = 3;
        let copy = mesh.clone_with(MeshCopyFlags::VERTEX_BUFFERS | MeshCopyFlags::SURFACES);
        assert_eq!(copy.vertex_count(), 3);
        assert_eq!(copy.index_count(), 0);
        assert!(copy.tags.is_empty());
        assert_eq!(copy.mesh_id_prefix, 3);
    }

    #[test]
    fn test_vertex_id_modes_are_exclusive() {
        let mesh = triangle();
        assert!(mesh.are_vertex_ids_implicit());
        assert!(!mesh.are_vertex_ids_explicit());

        let explicit = MeshBuilder::new()
            .positions(vec![Vector3::zeros(); 3])
            .triangles(vec![[0, 1, 2]])
            .explicit_ids(vec![10, 11, 12])
            .build()
            .unwrap();
        assert!(explicit.are_vertex_ids_explicit());
        assert!(!explicit.are_vertex_ids_implicit());
    }

    #[test]
    fn test_zero_prefix_is_implicit() {
        let mesh = triangle();
        assert_eq!(mesh.mesh_id_prefix, 0);
        assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Implicit);
        assert!(mesh.is_valid());
        assert_eq!(crate::mesh::vertex_ids(&mesh), vec![0, 1, 2]);
    }

    #[test]
    fn test_additional_buffers_replace() {
        let mut mesh = triangle();
        let mut set = MeshBufferSet::new();
        set.set_element_count(2);
        mesh.set_additional_buffer(MeshBufferType::SkeletonDeformBinding, set.clone());
        set.set_element_count(5);
        mesh.set_additional_buffer(MeshBufferType::SkeletonDeformBinding, set);
        assert_eq!(mesh.additional_buffers.len(), 1);
        assert_eq!(
            mesh.additional_buffer(MeshBufferType::SkeletonDeformBinding)
                .map(|s| s.element_count()),
            Some(5)
        );
    }
}
