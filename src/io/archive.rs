//! Binary mesh archive.
//!
//! All values are little-endian. Arrays and strings carry a `u32` length
//! prefix. A mesh is written in this order:
//!
//! | Part | Encoding |
//! |------|----------|
//! | index buffers | buffer set |
//! | vertex buffers | buffer set |
//! | additional buffers | array of `(u32 type, buffer set)` |
//! | layouts | array of layouts |
//! | skeleton ids | array of `i32` |
//! | skeleton | `u8` presence, then the skeleton |
//! | physics body | `u8` presence, then the body |
//! | flags | `u32` |
//! | surfaces | array of surfaces |
//! | tags | array of strings |
//! | streamed resources | array of `u64` |
//! | bone poses | array of poses |
//! | bone map | array of `u32` |
//! | additional physics bodies | array of bodies |
//! | id prefix | `u32` |
//! | reference id, morph | `u32`, string; only for reference meshes |
//!
//! A buffer set is its element count and buffer count, then per buffer the
//! element size, the channel descriptors `(semantic, semantic index,
//! format, component count, offset)` and `element count * element size`
//! raw bytes.

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::buffer::{MeshBuffer, MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet};
use crate::error::{MeshError, Result};
use crate::layout::{Layout, LayoutBlock, PackStrategy, ReductionMethod};
use crate::mesh::{
    BoneName, BonePose, BoneUsageFlags, IndexFormat, Mesh, MeshBufferType, MeshFlags,
    PhysicsBody, PhysicsBodyAggregate, PhysicsBox, PhysicsCapsule, PhysicsConvex, PhysicsSphere,
    PhysicsTaperedCapsule, Skeleton, Surface, SurfaceSubMesh, Transform3f,
};

type LE = LittleEndian;

/// Largest array preallocated from an untrusted length.
const MAX_PREALLOC: usize = 1 << 16;

/// Writes meshes to a byte stream.
pub struct ArchiveWriter<W: Write> {
    writer: W,
}

impl<W: Write> ArchiveWriter<W> {
    /// Create a writer over `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Return the inner stream.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write a complete mesh.
    pub fn write_mesh(&mut self, mesh: &Mesh) -> Result<()> {
        self.write_buffer_set(&mesh.index_buffers)?;
        self.write_buffer_set(&mesh.vertex_buffers)?;
        self.write_array(&mesh.additional_buffers, |w, (kind, set)| {
            w.writer.write_u32::<LE>(*kind as u32)?;
            w.write_buffer_set(set)
        })?;
        self.write_array(&mesh.layouts, |w, layout| w.write_layout(layout))?;
        self.write_array(&mesh.skeleton_ids, |w, id| Ok(w.writer.write_i32::<LE>(*id)?))?;
        self.write_option(mesh.skeleton.as_deref(), Self::write_skeleton)?;
        self.write_option(mesh.physics_body.as_deref(), Self::write_physics_body)?;
        self.writer.write_u32::<LE>(mesh.flags.bits())?;
        self.write_array(&mesh.surfaces, |w, s| w.write_surface(s))?;
        self.write_array(&mesh.tags, |w, tag| w.write_string(tag))?;
        self.write_array(&mesh.streamed_resources, |w, id| {
            Ok(w.writer.write_u64::<LE>(*id)?)
        })?;
        self.write_array(&mesh.bone_poses, |w, pose| {
            w.writer.write_u32::<LE>(pose.bone_id.id)?;
            w.writer.write_u32::<LE>(pose.usage.bits())?;
            w.write_transform(&pose.transform)
        })?;
        self.write_array(&mesh.bone_map, |w, bone| Ok(w.writer.write_u32::<LE>(bone.id)?))?;
        self.write_array(&mesh.additional_physics_bodies, |w, body| {
            w.write_physics_body(body)
        })?;
        self.writer.write_u32::<LE>(mesh.mesh_id_prefix)?;
        if mesh.flags.contains(MeshFlags::IS_REFERENCE) {
            self.writer.write_u32::<LE>(mesh.reference_id)?;
            self.write_string(&mesh.referenced_morph)?;
        }
        Ok(())
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| MeshError::archive(format!("array of {len} items is too long")))?;
        self.writer.write_u32::<LE>(len)?;
        Ok(())
    }

    fn write_array<T>(
        &mut self,
        items: &[T],
        mut item: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        self.write_len(items.len())?;
        for value in items {
            item(self, value)?;
        }
        Ok(())
    }

    fn write_option<T: ?Sized>(
        &mut self,
        value: Option<&T>,
        item: impl FnOnce(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        self.writer.write_u8(value.is_some() as u8)?;
        match value {
            Some(value) => item(self, value),
            None => Ok(()),
        }
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_len(s.len())?;
        self.writer.write_all(s.as_bytes())?;
        Ok(())
    }

    fn write_vec3(&mut self, v: &Vector3<f32>) -> Result<()> {
        for c in v.iter() {
            self.writer.write_f32::<LE>(*c)?;
        }
        Ok(())
    }

    fn write_rotation(&mut self, q: &UnitQuaternion<f32>) -> Result<()> {
        for c in q.coords.iter() {
            self.writer.write_f32::<LE>(*c)?;
        }
        Ok(())
    }

    fn write_transform(&mut self, t: &Transform3f) -> Result<()> {
        self.write_rotation(&t.rotation)?;
        self.write_vec3(&t.translation)?;
        self.write_vec3(&t.scale)
    }

    /// Write a buffer set.
    pub fn write_buffer_set(&mut self, set: &MeshBufferSet) -> Result<()> {
        self.write_len(set.element_count())?;
        self.write_array(set.buffers(), |w, buffer| {
            w.writer.write_u32::<LE>(buffer.element_size)?;
            w.write_array(&buffer.channels, |w, c| {
                w.writer.write_u32::<LE>(c.semantic as u32)?;
                w.writer.write_i32::<LE>(c.semantic_index)?;
                w.writer.write_u32::<LE>(c.format as u32)?;
                w.writer.write_u16::<LE>(c.component_count)?;
                w.writer.write_u16::<LE>(c.offset)?;
                Ok(())
            })?;
            w.writer.write_all(&buffer.data)?;
            Ok(())
        })
    }

    fn write_layout(&mut self, layout: &Layout) -> Result<()> {
        for v in layout.size.iter().chain(&layout.max_size) {
            self.writer.write_u16::<LE>(*v)?;
        }
        self.write_array(&layout.blocks, |w, b| {
            for v in b.min.iter().chain(&b.size) {
                w.writer.write_u16::<LE>(*v)?;
            }
            w.writer.write_u64::<LE>(b.id)?;
            w.writer.write_i32::<LE>(b.priority)?;
            w.writer.write_u8(b.reduce_both_axes as u8)?;
            w.writer.write_u8(b.reduce_by_two as u8)?;
            Ok(())
        })?;
        self.writer.write_u32::<LE>(layout.strategy as u32)?;
        self.writer.write_u32::<LE>(layout.reduction_method as u32)?;
        Ok(())
    }

    fn write_skeleton(&mut self, skeleton: &Skeleton) -> Result<()> {
        self.write_array(&skeleton.bone_ids, |w, b| Ok(w.writer.write_u32::<LE>(b.id)?))?;
        self.write_array(&skeleton.parents, |w, p| Ok(w.writer.write_i16::<LE>(*p)?))
    }

    fn write_surface(&mut self, surface: &Surface) -> Result<()> {
        self.write_array(&surface.sub_meshes, |w, s| {
            for v in [
                s.vertex_begin,
                s.vertex_end,
                s.index_begin,
                s.index_end,
                s.external_id,
            ] {
                w.writer.write_u32::<LE>(v)?;
            }
            Ok(())
        })?;
        self.writer.write_u32::<LE>(surface.bone_map_index)?;
        self.writer.write_u32::<LE>(surface.bone_map_count)?;
        self.writer.write_u32::<LE>(surface.id)?;
        Ok(())
    }

    fn write_physics_body(&mut self, body: &PhysicsBody) -> Result<()> {
        self.write_array(&body.bodies, |w, a| {
            w.write_array(&a.spheres, |w, s| {
                w.write_vec3(&s.position)?;
                Ok(w.writer.write_f32::<LE>(s.radius)?)
            })?;
            w.write_array(&a.boxes, |w, b| {
                w.write_vec3(&b.position)?;
                w.write_rotation(&b.rotation)?;
                w.write_vec3(&b.half_extents)
            })?;
            w.write_array(&a.capsules, |w, c| {
                w.write_vec3(&c.position)?;
                w.write_rotation(&c.rotation)?;
                w.writer.write_f32::<LE>(c.radius)?;
                Ok(w.writer.write_f32::<LE>(c.length)?)
            })?;
            w.write_array(&a.tapered_capsules, |w, c| {
                w.write_vec3(&c.position)?;
                w.write_rotation(&c.rotation)?;
                w.writer.write_f32::<LE>(c.radius0)?;
                w.writer.write_f32::<LE>(c.radius1)?;
                Ok(w.writer.write_f32::<LE>(c.length)?)
            })?;
            w.write_array(&a.convex, |w, c| {
                w.write_array(&c.vertices, |w, v| w.write_vec3(v))?;
                w.write_array(&c.indices, |w, i| Ok(w.writer.write_u32::<LE>(*i)?))?;
                w.write_transform(&c.transform)
            })
        })?;
        self.write_array(&body.bone_ids, |w, b| Ok(w.writer.write_u32::<LE>(b.id)?))?;
        self.write_array(&body.custom_ids, |w, id| Ok(w.writer.write_i32::<LE>(*id)?))?;
        self.writer.write_u8(body.reshaped as u8)?;
        Ok(())
    }
}

/// Reads meshes from a byte stream.
pub struct ArchiveReader<R: Read> {
    reader: R,
}

impl<R: Read> ArchiveReader<R> {
    /// Create a reader over `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read a complete mesh.
    pub fn read_mesh(&mut self) -> Result<Mesh> {
        let mut mesh = Mesh {
            index_buffers: self.read_buffer_set()?,
            vertex_buffers: self.read_buffer_set()?,
            ..Default::default()
        };
        mesh.additional_buffers = self.read_array(|r| {
            let raw = r.reader.read_u32::<LE>()?;
            let kind = MeshBufferType::from_u32(raw)
                .ok_or_else(|| MeshError::archive(format!("unknown buffer type {raw}")))?;
            Ok((kind, r.read_buffer_set()?))
        })?;
        mesh.layouts = self.read_array(|r| Ok(Arc::new(r.read_layout()?)))?;
        mesh.skeleton_ids = self.read_array(|r| Ok(r.reader.read_i32::<LE>()?))?;
        mesh.skeleton = self.read_option(Self::read_skeleton)?.map(Arc::new);
        mesh.physics_body = self.read_option(Self::read_physics_body)?.map(Arc::new);
        mesh.flags = MeshFlags::from_bits_truncate(self.reader.read_u32::<LE>()?);
        mesh.surfaces = self.read_array(Self::read_surface)?;
        mesh.tags = self.read_array(Self::read_string)?;
        mesh.streamed_resources = self.read_array(|r| Ok(r.reader.read_u64::<LE>()?))?;
        mesh.bone_poses = self.read_array(|r| {
            Ok(BonePose {
                bone_id: BoneName::new(r.reader.read_u32::<LE>()?),
                usage: BoneUsageFlags::from_bits_truncate(r.reader.read_u32::<LE>()?),
                transform: r.read_transform()?,
            })
        })?;
        mesh.bone_map = self.read_array(|r| Ok(BoneName::new(r.reader.read_u32::<LE>()?)))?;
        mesh.additional_physics_bodies =
            self.read_array(|r| Ok(Arc::new(r.read_physics_body()?)))?;
        mesh.mesh_id_prefix = self.reader.read_u32::<LE>()?;
        if mesh.flags.contains(MeshFlags::IS_REFERENCE) {
            mesh.reference_id = self.reader.read_u32::<LE>()?;
            mesh.referenced_morph = self.read_string()?;
        }
        check_mesh(&mesh)?;
        Ok(mesh)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(self.reader.read_u32::<LE>()? as usize)
    }

    fn read_array<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.read_len()?;
        let mut out = Vec::with_capacity(len.min(MAX_PREALLOC));
        for _ in 0..len {
            out.push(item(self)?);
        }
        Ok(out)
    }

    fn read_option<T>(&mut self, item: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<T>> {
        match self.reader.read_u8()? {
            0 => Ok(None),
            1 => item(self).map(Some),
            other => Err(MeshError::archive(format!("invalid presence byte {other}"))),
        }
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.reader.read_u8()? != 0)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOC));
        let read = (&mut self.reader).take(len as u64).read_to_end(&mut bytes)?;
        if read != len {
            return Err(MeshError::archive(format!(
                "expected {len} bytes, found {read}"
            )));
        }
        Ok(bytes)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        String::from_utf8(self.read_bytes(len)?)
            .map_err(|e| MeshError::archive(format!("invalid string: {e}")))
    }

    fn read_vec3(&mut self) -> Result<Vector3<f32>> {
        Ok(Vector3::new(
            self.reader.read_f32::<LE>()?,
            self.reader.read_f32::<LE>()?,
            self.reader.read_f32::<LE>()?,
        ))
    }

    fn read_rotation(&mut self) -> Result<UnitQuaternion<f32>> {
        let i = self.reader.read_f32::<LE>()?;
        let j = self.reader.read_f32::<LE>()?;
        let k = self.reader.read_f32::<LE>()?;
        let w = self.reader.read_f32::<LE>()?;
        Ok(UnitQuaternion::new_unchecked(Quaternion::new(w, i, j, k)))
    }

    fn read_transform(&mut self) -> Result<Transform3f> {
        Ok(Transform3f {
            rotation: self.read_rotation()?,
            translation: self.read_vec3()?,
            scale: self.read_vec3()?,
        })
    }

    fn read_channel(&mut self) -> Result<MeshBufferChannel> {
        let semantic = self.reader.read_u32::<LE>()?;
        let semantic_index = self.reader.read_i32::<LE>()?;
        let format = self.reader.read_u32::<LE>()?;
        let component_count = self.reader.read_u16::<LE>()?;
        let offset = self.reader.read_u16::<LE>()?;
        Ok(MeshBufferChannel::new(
            MeshBufferSemantic::from_u32(semantic)
                .ok_or_else(|| MeshError::archive(format!("unknown semantic {semantic}")))?,
            semantic_index,
            MeshBufferFormat::from_u32(format)
                .ok_or_else(|| MeshError::archive(format!("unknown format {format}")))?,
            component_count,
            offset,
        ))
    }

    /// Read a buffer set.
    pub fn read_buffer_set(&mut self) -> Result<MeshBufferSet> {
        let element_count = self.read_len()?;
        let mut set = MeshBufferSet::new();
        set.set_element_count(element_count);
        let buffers = self.read_array(|r| {
            let element_size = r.reader.read_u32::<LE>()?;
            let channels = r.read_array(Self::read_channel)?;
            check_channels(element_size, &channels)?;
            let len = element_count
                .checked_mul(element_size as usize)
                .ok_or_else(|| MeshError::archive("buffer size overflows"))?;
            Ok(MeshBuffer {
                channels,
                element_size,
                data: r.read_bytes(len)?,
            })
        })?;
        for buffer in buffers {
            set.push_buffer(buffer);
        }
        Ok(set)
    }

    fn read_layout(&mut self) -> Result<Layout> {
        let mut dims = [0u16; 4];
        for d in &mut dims {
            *d = self.reader.read_u16::<LE>()?;
        }
        let blocks = self.read_array(|r| {
            let mut cells = [0u16; 4];
            for c in &mut cells {
                *c = r.reader.read_u16::<LE>()?;
            }
            Ok(LayoutBlock {
                min: [cells[0], cells[1]],
                size: [cells[2], cells[3]],
                id: r.reader.read_u64::<LE>()?,
                priority: r.reader.read_i32::<LE>()?,
                reduce_both_axes: r.read_bool()?,
                reduce_by_two: r.read_bool()?,
            })
        })?;
        let strategy = self.reader.read_u32::<LE>()?;
        let reduction = self.reader.read_u32::<LE>()?;
        Ok(Layout {
            size: [dims[0], dims[1]],
            max_size: [dims[2], dims[3]],
            blocks,
            strategy: PackStrategy::from_u32(strategy)
                .ok_or_else(|| MeshError::archive(format!("unknown pack strategy {strategy}")))?,
            reduction_method: ReductionMethod::from_u32(reduction).ok_or_else(|| {
                MeshError::archive(format!("unknown reduction method {reduction}"))
            })?,
        })
    }

    fn read_skeleton(&mut self) -> Result<Skeleton> {
        Ok(Skeleton {
            bone_ids: self.read_array(|r| Ok(BoneName::new(r.reader.read_u32::<LE>()?)))?,
            parents: self.read_array(|r| Ok(r.reader.read_i16::<LE>()?))?,
        })
    }

    fn read_surface(&mut self) -> Result<Surface> {
        let sub_meshes = self.read_array(|r| {
            Ok(SurfaceSubMesh {
                vertex_begin: r.reader.read_u32::<LE>()?,
                vertex_end: r.reader.read_u32::<LE>()?,
                index_begin: r.reader.read_u32::<LE>()?,
                index_end: r.reader.read_u32::<LE>()?,
                external_id: r.reader.read_u32::<LE>()?,
            })
        })?;
        Ok(Surface {
            sub_meshes,
            bone_map_index: self.reader.read_u32::<LE>()?,
            bone_map_count: self.reader.read_u32::<LE>()?,
            id: self.reader.read_u32::<LE>()?,
        })
    }

    fn read_physics_body(&mut self) -> Result<PhysicsBody> {
        let bodies = self.read_array(|r| {
            Ok(PhysicsBodyAggregate {
                spheres: r.read_array(|r| {
                    Ok(PhysicsSphere {
                        position: r.read_vec3()?,
                        radius: r.reader.read_f32::<LE>()?,
                    })
                })?,
                boxes: r.read_array(|r| {
                    Ok(PhysicsBox {
                        position: r.read_vec3()?,
                        rotation: r.read_rotation()?,
                        half_extents: r.read_vec3()?,
                    })
                })?,
                capsules: r.read_array(|r| {
                    Ok(PhysicsCapsule {
                        position: r.read_vec3()?,
                        rotation: r.read_rotation()?,
                        radius: r.reader.read_f32::<LE>()?,
                        length: r.reader.read_f32::<LE>()?,
                    })
                })?,
                tapered_capsules: r.read_array(|r| {
                    Ok(PhysicsTaperedCapsule {
                        position: r.read_vec3()?,
                        rotation: r.read_rotation()?,
                        radius0: r.reader.read_f32::<LE>()?,
                        radius1: r.reader.read_f32::<LE>()?,
                        length: r.reader.read_f32::<LE>()?,
                    })
                })?,
                convex: r.read_array(|r| {
                    Ok(PhysicsConvex {
                        vertices: r.read_array(Self::read_vec3)?,
                        indices: r.read_array(|r| Ok(r.reader.read_u32::<LE>()?))?,
                        transform: r.read_transform()?,
                    })
                })?,
            })
        })?;
        Ok(PhysicsBody {
            bodies,
            bone_ids: self.read_array(|r| Ok(BoneName::new(r.reader.read_u32::<LE>()?)))?,
            custom_ids: self.read_array(|r| Ok(r.reader.read_i32::<LE>()?))?,
            reshaped: self.read_bool()?,
        })
    }
}

/// Reject channel descriptors that overlap or leave the element.
fn check_channels(element_size: u32, channels: &[MeshBufferChannel]) -> Result<()> {
    for (i, a) in channels.iter().enumerate() {
        if a.end() > element_size as usize {
            return Err(MeshError::archive(format!(
                "channel {:?} ends past element size {element_size}",
                a.semantic
            )));
        }
        let overlaps = channels[i + 1..].iter().any(|b| {
            a.size() > 0
                && b.size() > 0
                && a.end() > b.offset as usize
                && b.end() > a.offset as usize
        });
        if overlaps {
            return Err(MeshError::archive(format!(
                "channel {:?} overlaps another channel",
                a.semantic
            )));
        }
    }
    Ok(())
}

/// Reject meshes whose indices or surfaces don't fit their buffers.
fn check_mesh(mesh: &Mesh) -> Result<()> {
    if let Some((b, c)) = mesh
        .index_buffers
        .find_channel(MeshBufferSemantic::VertexIndex, 0)
    {
        let format = mesh.index_buffers.channel(b, c).format;
        if IndexFormat::try_of(format).is_none() {
            return Err(MeshError::archive(format!(
                "{format:?} is not an index buffer format"
            )));
        }
    }
    if !mesh.is_valid() {
        return Err(MeshError::archive(
            "indices, surfaces or vertex ids don't match the buffers",
        ));
    }
    Ok(())
}

/// Serialize `mesh` into a byte vector.
pub fn to_bytes(mesh: &Mesh) -> Result<Vec<u8>> {
    let mut writer = ArchiveWriter::new(Vec::new());
    writer.write_mesh(mesh)?;
    Ok(writer.into_inner())
}

/// Deserialize a mesh written by [`to_bytes`].
pub fn from_bytes(bytes: &[u8]) -> Result<Mesh> {
    ArchiveReader::new(bytes).read_mesh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshBuilder;
    use nalgebra::{Vector2, Vector4};

    fn rich_mesh() -> Mesh {
        let mut mesh = MeshBuilder::new()
            .positions(vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ])
            .normals(vec![Vector3::z(); 4])
            .tangents(vec![Vector4::new(1.0, 0.0, 0.0, 1.0); 4])
            .tex_coords(vec![Vector2::zeros(); 4])
            .skin(vec![[0, 1, 0, 0]; 4], vec![[0.5, 0.5, 0.0, 0.0]; 4])
            .bone_map(vec![BoneName::new(3), BoneName::new(9)])
            .quads(&[[0, 1, 2, 3]])
            .id_prefix(7)
            .build()
            .unwrap();

        let mut layout = Layout::new([4, 2]);
        layout.strategy = PackStrategy::Fixed;
        layout.blocks.push(LayoutBlock {
            min: [1, 0],
            size: [2, 2],
            id: 42,
            priority: -3,
            reduce_both_axes: true,
            reduce_by_two: false,
        });
        mesh.layouts.push(Arc::new(layout));
        mesh.skeleton_ids = vec![1, -1];
        mesh.skeleton = Some(Arc::new(Skeleton {
            bone_ids: vec![BoneName::new(3), BoneName::new(9)],
            parents: vec![-1, 0],
        }));

        let mut body = PhysicsBody::default();
        body.add_body(
            BoneName::new(3),
            PhysicsBodyAggregate {
                spheres: vec![PhysicsSphere {
                    position: Vector3::new(0.0, 1.0, 2.0),
                    radius: 0.5,
                }],
                capsules: vec![PhysicsCapsule {
                    position: Vector3::zeros(),
                    rotation: UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
                    radius: 0.2,
                    length: 1.5,
                }],
                convex: vec![PhysicsConvex {
                    vertices: vec![Vector3::x(), Vector3::y(), Vector3::z()],
                    indices: vec![0, 1, 2],
                    transform: Transform3f::from_translation(Vector3::new(1.0, 2.0, 3.0)),
                }],
                ..Default::default()
            },
        );
        body.custom_ids[0] = 11;
        mesh.physics_body = Some(Arc::new(body.clone()));
        mesh.additional_physics_bodies.push(Arc::new(body));

        mesh.tags = vec!["hat".into(), "ünïcode".into()];
        mesh.streamed_resources = vec![u64::MAX, 5];
        mesh.bone_poses.push(BonePose {
            bone_id: BoneName::new(9),
            usage: BoneUsageFlags::SKINNING | BoneUsageFlags::RESHAPED,
            transform: Transform3f::from_translation(Vector3::new(0.5, 0.0, 0.0)),
        });
        mesh
    }

    fn assert_same(a: &Mesh, b: &Mesh) {
        assert_eq!(a.vertex_buffers, b.vertex_buffers);
        assert_eq!(a.index_buffers, b.index_buffers);
        assert_eq!(a.additional_buffers, b.additional_buffers);
        assert_eq!(a.layouts, b.layouts);
        assert_eq!(a.skeleton_ids, b.skeleton_ids);
        assert_eq!(a.skeleton, b.skeleton);
        assert_eq!(a.physics_body, b.physics_body);
        assert_eq!(a.additional_physics_bodies, b.additional_physics_bodies);
        assert_eq!(a.flags, b.flags);
        assert_eq!(a.surfaces, b.surfaces);
        assert_eq!(a.tags, b.tags);
        assert_eq!(a.streamed_resources, b.streamed_resources);
        assert_eq!(a.bone_poses, b.bone_poses);
        assert_eq!(a.bone_map, b.bone_map);
        assert_eq!(a.mesh_id_prefix, b.mesh_id_prefix);
        assert_eq!(a.reference_id, b.reference_id);
        assert_eq!(a.referenced_morph, b.referenced_morph);
    }

    #[test]
    fn test_full_mesh_survives() {
        let mesh = rich_mesh();
        let back = from_bytes(&to_bytes(&mesh).unwrap()).unwrap();
        assert_same(&mesh, &back);
        assert!(back.is_valid());
    }

    #[test]
    fn test_reference_trailer_only_for_references() {
        let mut mesh = Mesh::new();
        mesh.reference_id = 99;
        let plain = to_bytes(&mesh).unwrap();
        assert_eq!(from_bytes(&plain).unwrap().reference_id, 0);

        let mut reference = Mesh::new_reference(99, true);
        reference.referenced_morph = "smile".into();
        let bytes = to_bytes(&reference).unwrap();
        assert_eq!(bytes.len(), plain.len() + 4 + 4 + 5);
        let back = from_bytes(&bytes).unwrap();
        assert!(back.is_reference());
        assert_eq!(back.reference_id, 99);
        assert_eq!(back.referenced_morph, "smile");
        assert!(back.flags.contains(MeshFlags::FORCE_LOAD));
    }

    #[test]
    fn test_empty_mesh_layout() {
        // Two empty buffer sets, nine empty arrays, two absent options, flags, prefix.
        let bytes = to_bytes(&Mesh::new()).unwrap();
        assert_eq!(bytes.len(), 2 * 8 + 9 * 4 + 2 + 4 + 4);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_truncated_archive() {
        let bytes = to_bytes(&rich_mesh()).unwrap();
        for cut in [0, 3, bytes.len() / 2, bytes.len() - 1] {
            assert!(from_bytes(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_out_of_range_indices_rejected() {
        let mut mesh = MeshBuilder::new()
            .positions(vec![Vector3::zeros(); 3])
            .triangles(vec![[0, 1, 2]])
            .build()
            .unwrap();
        mesh.set_indices(&[0, 1, 99]);
        let err = from_bytes(&to_bytes(&mesh).unwrap()).unwrap_err();
        assert!(matches!(err, MeshError::Archive { .. }));
    }

    #[test]
    fn test_float_index_channel_rejected() {
        let mut mesh = Mesh::new();
        mesh.index_buffers.set_element_count(3);
        mesh.index_buffers.push_packed_buffer(&[MeshBufferChannel::new(
            MeshBufferSemantic::VertexIndex,
            0,
            MeshBufferFormat::Float32,
            1,
            0,
        )]);
        let err = from_bytes(&to_bytes(&mesh).unwrap()).unwrap_err();
        assert!(err.to_string().contains("Float32"));
    }

    #[test]
    fn test_overlapping_channels_rejected() {
        let channels = [
            MeshBufferChannel::new(MeshBufferSemantic::Position, 0, MeshBufferFormat::Float32, 3, 0),
            MeshBufferChannel::new(MeshBufferSemantic::Normal, 0, MeshBufferFormat::Float32, 3, 8),
        ];
        assert!(check_channels(24, &channels).is_err());
        assert!(check_channels(12, &channels[..1]).is_ok());
        assert!(check_channels(8, &channels[..1]).is_err());
    }

    #[test]
    fn test_surfaces_and_additional_buffers() {
        let mut mesh = rich_mesh();
        let (vertices, indices) = (mesh.vertex_count() as u32, mesh.index_count() as u32);
        mesh.surfaces.push(Surface::single(SurfaceSubMesh {
            vertex_begin: vertices,
            vertex_end: vertices,
            index_begin: indices,
            index_end: indices,
            external_id: 5,
        }));
        let mut binding = MeshBufferSet::new();
        binding.set_element_count(2);
        binding.push_packed_buffer(&[MeshBufferChannel::new(
            MeshBufferSemantic::BoneId,
            0,
            MeshBufferFormat::UInt32,
            1,
            0,
        )]);
        mesh.set_additional_buffer(MeshBufferType::SkeletonDeformBinding, binding);
        let back = from_bytes(&to_bytes(&mesh).unwrap()).unwrap();
        assert_eq!(back.surfaces.len(), mesh.surfaces.len());
        assert_eq!(
            back.additional_buffer(MeshBufferType::SkeletonDeformBinding),
            mesh.additional_buffer(MeshBufferType::SkeletonDeformBinding)
        );
    }
}
