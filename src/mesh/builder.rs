//! Mesh construction utilities.
//!
//! [`MeshBuilder`] assembles a [`Mesh`] from plain per-vertex arrays, laying
//! the channels out the way runtime meshes usually are: positions, normals
//! and tangents interleaved in buffer 0, then one buffer per optional group
//! (texture coordinates, colors, skinning, vertex ids).

use std::ops::Range;

use nalgebra::{Vector2, Vector3, Vector4};

use super::entity::Mesh;
use super::skeleton::BoneName;
use super::surface::{Surface, SurfaceSubMesh};
use crate::buffer::{
    MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet,
    UntypedMeshBufferIterator,
};
use crate::error::{MeshError, Result};

/// Builder for [`Mesh`] values.
///
/// # Example
/// ```
/// use mutable_mesh::mesh::MeshBuilder;
/// use nalgebra::{Vector2, Vector3};
///
/// let mesh = MeshBuilder::new()
///     .positions(vec![
///         Vector3::new(0.0, 0.0, 0.0),
///         Vector3::new(1.0, 0.0, 0.0),
///         Vector3::new(1.0, 1.0, 0.0),
///         Vector3::new(0.0, 1.0, 0.0),
///     ])
///     .tex_coords(vec![
///         Vector2::new(0.0, 0.0),
///         Vector2::new(1.0, 0.0),
///         Vector2::new(1.0, 1.0),
///         Vector2::new(0.0, 1.0),
///     ])
///     .quads(&[[0, 1, 2, 3]])
///     .id_prefix(7)
///     .build()
///     .unwrap();
///
/// assert_eq!(mesh.face_count(), 2);
/// assert_eq!(mesh.mesh_id_prefix, 7);
/// ```
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    positions: Vec<Vector3<f32>>,
    normals: Option<Vec<Vector3<f32>>>,
    tangents: Option<Vec<Vector4<f32>>>,
    tex_coords: Vec<Vec<Vector2<f32>>>,
    colors: Option<Vec<Vector4<f32>>>,
    skin: Option<(Vec<[u16; 4]>, Vec<[f32; 4]>)>,
    triangles: Vec<[u32; 3]>,
    surfaces: Vec<(Range<u32>, Range<u32>)>,
    normal_format: MeshBufferFormat,
    bone_index_format: MeshBufferFormat,
    explicit_ids: Option<Vec<u64>>,
    relative_ids: Option<Vec<u32>>,
    id_prefix: u32,
    bone_map: Vec<BoneName>,
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            normals: None,
            tangents: None,
            tex_coords: Vec::new(),
            colors: None,
            skin: None,
            triangles: Vec::new(),
            surfaces: Vec::new(),
            normal_format: MeshBufferFormat::Float32,
            bone_index_format: MeshBufferFormat::UInt16,
            explicit_ids: None,
            relative_ids: None,
            id_prefix: 0,
            bone_map: Vec::new(),
        }
    }
}

impl MeshBuilder {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertex positions. Sets the vertex count.
    pub fn positions(mut self, positions: Vec<Vector3<f32>>) -> Self {
        self.positions = positions;
        self
    }

    /// Vertex normals.
    pub fn normals(mut self, normals: Vec<Vector3<f32>>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Vertex tangents, `w` holding the bitangent sign.
    pub fn tangents(mut self, tangents: Vec<Vector4<f32>>) -> Self {
        self.tangents = Some(tangents);
        self
    }

    /// Storage format of normals and tangents (default `Float32`).
    pub fn with_normal_format(mut self, format: MeshBufferFormat) -> Self {
        self.normal_format = format;
        self
    }

    /// Add a texture coordinate set. Call again for further sets.
    pub fn tex_coords(mut self, uvs: Vec<Vector2<f32>>) -> Self {
        self.tex_coords.push(uvs);
        self
    }

    /// Vertex colors.
    pub fn colors(mut self, colors: Vec<Vector4<f32>>) -> Self {
        self.colors = Some(colors);
        self
    }

    /// Four bone influences per vertex, indices into the bone map.
    pub fn skin(mut self, indices: Vec<[u16; 4]>, weights: Vec<[f32; 4]>) -> Self {
        self.skin = Some((indices, weights));
        self
    }

    /// Storage format of bone indices (default `UInt16`).
    pub fn with_bone_index_format(mut self, format: MeshBufferFormat) -> Self {
        self.bone_index_format = format;
        self
    }

    /// Bones referenced by the skin indices.
    pub fn bone_map(mut self, bones: Vec<BoneName>) -> Self {
        self.bone_map = bones;
        self
    }

    /// Triangle list.
    pub fn triangles(mut self, triangles: Vec<[u32; 3]>) -> Self {
        self.triangles = triangles;
        self
    }

    /// Quads, each split into two triangles `(0, 1, 2)` and `(0, 2, 3)`.
    pub fn quads(mut self, quads: &[[u32; 4]]) -> Self {
        for q in quads {
            self.triangles.push([q[0], q[1], q[2]]);
            self.triangles.push([q[0], q[2], q[3]]);
        }
        self
    }

    /// Add a surface spanning the given vertex and index ranges.
    ///
    /// Without any call the mesh gets one surface covering everything.
    pub fn surface(mut self, vertices: Range<u32>, indices: Range<u32>) -> Self {
        self.surfaces.push((vertices, indices));
        self
    }

    /// Prefix of implicit or relative vertex ids.
    pub fn id_prefix(mut self, prefix: u32) -> Self {
        self.id_prefix = prefix;
        self
    }

    /// Store explicit 64-bit vertex ids.
    pub fn explicit_ids(mut self, ids: Vec<u64>) -> Self {
        self.explicit_ids = Some(ids);
        self.relative_ids = None;
        self
    }

    /// Store relative 32-bit vertex ids.
    pub fn relative_ids(mut self, ids: Vec<u32>) -> Self {
        self.relative_ids = Some(ids);
        self.explicit_ids = None;
        self
    }

    /// Assemble the mesh.
    ///
    /// # Errors
    /// [`MeshError::EmptyMesh`] without positions,
    /// [`MeshError::InvalidVertexIndex`] for out of range triangle indices and
    /// [`MeshError::InvalidParameter`] when a per-vertex array has the wrong length.
    pub fn build(self) -> Result<Mesh> {
        let vertex_count = self.positions.len();
        if vertex_count == 0 {
            return Err(MeshError::EmptyMesh);
        }

        // Validate vertex indices
        for (fi, face) in self.triangles.iter().enumerate() {
            for &vi in face {
                if vi as usize >= vertex_count {
                    return Err(MeshError::InvalidVertexIndex {
                        face: fi,
                        vertex: vi as usize,
                    });
                }
            }
        }

        check_len("normals", self.normals.as_ref().map(Vec::len), vertex_count)?;
        check_len("tangents", self.tangents.as_ref().map(Vec::len), vertex_count)?;
        check_len("colors", self.colors.as_ref().map(Vec::len), vertex_count)?;
        for uvs in &self.tex_coords {
            check_len("tex_coords", Some(uvs.len()), vertex_count)?;
        }
        if let Some((indices, weights)) = &self.skin {
            check_len("bone indices", Some(indices.len()), vertex_count)?;
            check_len("bone weights", Some(weights.len()), vertex_count)?;
        }
        check_len("explicit ids", self.explicit_ids.as_ref().map(Vec::len), vertex_count)?;
        check_len("relative ids", self.relative_ids.as_ref().map(Vec::len), vertex_count)?;

        let mut set = MeshBufferSet::new();
        set.set_element_count(vertex_count);

        let mut geometry = vec![MeshBufferChannel::new(
            MeshBufferSemantic::Position,
            0,
            MeshBufferFormat::Float32,
            3,
            0,
        )];
        if self.normals.is_some() {
            let components = if self.normal_format.has_tangent_sign() { 4 } else { 3 };
            geometry.push(MeshBufferChannel::new(
                MeshBufferSemantic::Normal,
                0,
                self.normal_format,
                components,
                0,
            ));
        }
        if self.tangents.is_some() {
            geometry.push(MeshBufferChannel::new(
                MeshBufferSemantic::Tangent,
                0,
                self.normal_format,
                4,
                0,
            ));
        }
        set.push_packed_buffer(&geometry);

        if !self.tex_coords.is_empty() {
            let channels: Vec<MeshBufferChannel> = (0..self.tex_coords.len())
                .map(|i| {
                    MeshBufferChannel::new(
                        MeshBufferSemantic::TexCoords,
                        i as i32,
                        MeshBufferFormat::Float32,
                        2,
                        0,
                    )
                })
                .collect();
            set.push_packed_buffer(&channels);
        }
        if self.colors.is_some() {
            set.push_packed_buffer(&[MeshBufferChannel::new(
                MeshBufferSemantic::Color,
                0,
                MeshBufferFormat::NUInt8,
                4,
                0,
            )]);
        }
        if self.skin.is_some() {
            set.push_packed_buffer(&[
                MeshBufferChannel::new(
                    MeshBufferSemantic::BoneIndices,
                    0,
                    self.bone_index_format,
                    4,
                    0,
                ),
                MeshBufferChannel::new(
                    MeshBufferSemantic::BoneWeights,
                    0,
                    MeshBufferFormat::NUInt8,
                    4,
                    0,
                ),
            ]);
        }
        let id_format = if self.explicit_ids.is_some() {
            Some(MeshBufferFormat::UInt64)
        } else if self.relative_ids.is_some() {
            Some(MeshBufferFormat::UInt32)
        } else {
            None
        };
        if let Some(format) = id_format {
            set.push_packed_buffer(&[MeshBufferChannel::new(
                MeshBufferSemantic::VertexIndex,
                0,
                format,
                1,
                0,
            )]);
        }

        fill_vec3(&mut set, MeshBufferSemantic::Position, &self.positions);
        if let Some(normals) = &self.normals {
            fill_vec3(&mut set, MeshBufferSemantic::Normal, normals);
        }
        if let Some(tangents) = &self.tangents {
            let mut it = UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::Tangent, 0);
            for t in tangents {
                it.set_from_vec4f(t);
                it.inc();
            }
        }
        for (i, uvs) in self.tex_coords.iter().enumerate() {
            let mut it =
                UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::TexCoords, i as i32);
            for uv in uvs {
                it.set_from_vec2f(uv);
                it.inc();
            }
        }
        if let Some(colors) = &self.colors {
            let mut it = UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::Color, 0);
            for c in colors {
                it.set_from_vec4f(c);
                it.inc();
            }
        }
        if let Some((indices, weights)) = &self.skin {
            {
                let mut it =
                    UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::BoneIndices, 0);
                for bones in indices {
                    let v = Vector4::new(
                        bones[0] as f32,
                        bones[1] as f32,
                        bones[2] as f32,
                        bones[3] as f32,
                    );
                    it.set_from_vec4f(&v);
                    it.inc();
                }
            }
            let mut it =
                UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::BoneWeights, 0);
            for w in weights {
                it.set_from_vec4f(&Vector4::from(*w));
                it.inc();
            }
        }
        {
            let mut it = UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::VertexIndex, 0);
            if let Some(ids) = &self.explicit_ids {
                for &id in ids {
                    it.set_from_u64(id);
                    it.inc();
                }
            } else if let Some(ids) = &self.relative_ids {
                for &id in ids {
                    it.set_from_u32(id);
                    it.inc();
                }
            }
        }

        let mut mesh = Mesh {
            vertex_buffers: set,
            bone_map: self.bone_map,
            mesh_id_prefix: if self.explicit_ids.is_some() {
                0
            } else {
                self.id_prefix
            },
            ..Default::default()
        };

        let flat: Vec<u32> = self.triangles.iter().flatten().copied().collect();
        mesh.set_indices(&flat);

        if self.surfaces.is_empty() {
            mesh.ensure_surface_data();
        } else {
            mesh.surfaces = self
                .surfaces
                .into_iter()
                .enumerate()
                .map(|(i, (vertices, indices))| Surface {
                    sub_meshes: vec![SurfaceSubMesh {
                        vertex_begin: vertices.start,
                        vertex_end: vertices.end,
                        index_begin: indices.start,
                        index_end: indices.end,
                        external_id: i as u32,
                    }],
                    id: i as u32,
                    ..Default::default()
                })
                .collect();
            if !mesh.surfaces_are_consistent() {
                return Err(MeshError::invalid_param(
                    "surfaces",
                    mesh.surfaces.len(),
                    "must partition the vertex and index ranges",
                ));
            }
        }

        Ok(mesh)
    }
}

/// Build a position-only mesh from vertices and triangle faces.
///
/// # Example
/// ```
/// use mutable_mesh::mesh::build_from_triangles;
/// use nalgebra::Vector3;
///
/// let vertices = vec![
///     Vector3::new(0.0, 0.0, 0.0),
///     Vector3::new(1.0, 0.0, 0.0),
///     Vector3::new(0.5, 1.0, 0.0),
/// ];
/// let mesh = build_from_triangles(&vertices, &[[0, 1, 2]]).unwrap();
/// assert_eq!(mesh.face_count(), 1);
/// ```
pub fn build_from_triangles(vertices: &[Vector3<f32>], faces: &[[u32; 3]]) -> Result<Mesh> {
    MeshBuilder::new()
        .positions(vertices.to_vec())
        .triangles(faces.to_vec())
        .build()
}

fn check_len(name: &'static str, len: Option<usize>, expected: usize) -> Result<()> {
    match len {
        Some(n) if n != expected => Err(MeshError::invalid_param(
            name,
            n,
            "length must match the position count",
        )),
        _ => Ok(()),
    }
}

fn fill_vec3(set: &mut MeshBufferSet, semantic: MeshBufferSemantic, values: &[Vector3<f32>]) {
    let mut it = UntypedMeshBufferIterator::new(set, semantic, 0);
    for v in values {
        it.set_from_vec3f(v);
        it.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::UntypedMeshBufferIteratorConst;

    fn square() -> Vec<Vector3<f32>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_build_quad() {
        let mesh = MeshBuilder::new().positions(square()).quads(&[[0, 1, 2, 3]]).build().unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangles(), vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(mesh.surfaces.len(), 1);
        assert!(mesh.is_valid());
    }

    #[test]
    fn test_invalid_index() {
        let result = MeshBuilder::new()
            .positions(square())
            .triangles(vec![[0, 1, 9]])
            .build();
        assert!(matches!(
            result,
            Err(MeshError::InvalidVertexIndex { face: 0, vertex: 9 })
        ));
    }

    #[test]
    fn test_empty_positions() {
        assert!(matches!(MeshBuilder::new().build(), Err(MeshError::EmptyMesh)));
    }

    #[test]
    fn test_length_mismatch() {
        let result = MeshBuilder::new()
            .positions(square())
            .normals(vec![Vector3::z(); 3])
            .build();
        assert!(matches!(result, Err(MeshError::InvalidParameter { .. })));
    }

    #[test]
    fn test_packed_normals_and_skin() {
        let mesh = MeshBuilder::new()
            .positions(square())
            .normals(vec![Vector3::z(); 4])
            .with_normal_format(MeshBufferFormat::PackedDirS8WTangentSign)
            .skin(vec![[0, 1, 0, 0]; 4], vec![[0.5, 0.5, 0.0, 0.0]; 4])
            .quads(&[[0, 1, 2, 3]])
            .build()
            .unwrap();

        let n = UntypedMeshBufferIteratorConst::new(&mesh.vertex_buffers, MeshBufferSemantic::Normal, 0)
            .get_as_vec3f();
        assert!((n.z - 1.0).abs() < 0.01);

        let bones = UntypedMeshBufferIteratorConst::new(
            &mesh.vertex_buffers,
            MeshBufferSemantic::BoneIndices,
            0,
        );
        assert_eq!(bones.format(), MeshBufferFormat::UInt16);
        assert_eq!(bones.get_as_vec4f(), Vector4::new(0.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn test_explicit_surfaces_must_partition() {
        let result = MeshBuilder::new()
            .positions(square())
            .quads(&[[0, 1, 2, 3]])
            .surface(0..2, 0..3)
            .surface(3..4, 3..6)
            .build();
        assert!(result.is_err());

        let mesh = MeshBuilder::new()
            .positions(square())
            .quads(&[[0, 1, 2, 3]])
            .surface(0..2, 0..3)
            .surface(2..4, 3..6)
            .build()
            .unwrap();
        assert_eq!(mesh.surfaces.len(), 2);
        assert_eq!(mesh.surfaces[1].sub_meshes[0].external_id, 1);
    }
}
