//! Reshaping a mesh to follow a deformed shape mesh.
//!
//! # Overview
//!
//! A base mesh is *bound* to a shape mesh once: every vertex, bone and
//! physics sample point records the shape triangle it sits on, barycentric
//! coordinates on that triangle and a signed offset along the interpolated
//! shape normal ([`bind_shape_reshape`]). When the shape later changes,
//! [`apply_shape`] re-evaluates the bindings against the new shape:
//!
//! ```text
//! p' = Σ bary_i · v'_i + offset · normalize(Σ bary_i · n'_i)
//! ```
//!
//! Three passes can run, selected by [`ReshapeFlags`]:
//!
//! - vertices: positions, normals, tangents and binormals, blended by the
//!   per-vertex binding weight;
//! - skeleton: bone pose translations, bones that move get
//!   [`BoneUsageFlags::RESHAPED`](crate::mesh::BoneUsageFlags::RESHAPED);
//! - physics: spheres, boxes, capsules and convex hulls are sampled at a
//!   fixed set of points, the points deformed and the primitive fitted back.
//!
//! # Binding data
//!
//! | Where | Channels |
//! |-------|----------|
//! | vertex buffers | `TriangleIndex` Int32, `BarycentricCoords` F32×3, `ShapeBindingOffset` F32, `ShapeBindingNormal` F32×3 (normal, and tangent at index 1, in the triangle frame), optional `ShapeBindingWeight` F32 |
//! | `SkeletonDeformBinding` | `BoneId` UInt32, `TriangleIndex`, `BarycentricCoords`, `ShapeBindingOffset` |
//! | `PhysicsBodyDeformBinding` | `TriangleIndex`, `BarycentricCoords`, `ShapeBindingOffset`, one element per sample point |
//! | `PhysicsBodyDeformSelection` | `Other` UInt8, one element per primitive, non-zero to deform |
//!
//! A negative triangle index means "not bound". A triangle index past the
//! current shape triangle count leaves the element unchanged and logs one
//! warning per call.
//!
//! # Example
//!
//! ```
//! use mutable_mesh::algo::reshape::{apply_shape, bind_shape_reshape, BindOptions, ReshapeOptions};
//! use mutable_mesh::mesh::MeshBuilder;
//! use nalgebra::Vector3;
//!
//! let square = |z: f32| {
//!     MeshBuilder::new()
//!         .positions(vec![
//!             Vector3::new(-1.0, -1.0, z),
//!             Vector3::new(1.0, -1.0, z),
//!             Vector3::new(1.0, 1.0, z),
//!             Vector3::new(-1.0, 1.0, z),
//!         ])
//!         .normals(vec![Vector3::z(); 4])
//!         .quads(&[[0, 1, 2, 3]])
//!         .build()
//!         .unwrap()
//! };
//!
//! let base = bind_shape_reshape(&square(0.5), &square(0.0), &BindOptions::default()).unwrap();
//! let reshaped = apply_shape(&base, &square(2.0), &ReshapeOptions::default()).unwrap();
//! let z = reshaped.positions().unwrap()[0].z;
//! assert!((z - 2.5).abs() < 1e-5);
//! ```

mod bind;
mod physics;
mod skeleton;
mod vertices;

pub use bind::{bind_shape_reshape, BindOptions};
pub use physics::{primitive_sample_points, PhysicsPrimitive};

use bitflags::bitflags;
use nalgebra::Vector3;

use super::normals::{recompute_normals, vertex_normals};
use super::smooth::{laplacian_smooth_positions, SmoothOptions};
use crate::buffer::convert::{read_component_f32, read_component_i64, write_component_f32, write_component_i64};
use crate::buffer::iter::read_channel_vec3f;
use crate::buffer::{MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet};
use crate::error::{MeshError, Result};
use crate::geometry::{interpolate, triangle_frame};
use crate::mesh::Mesh;

/// Vertices per rayon batch.
pub(crate) const PARALLEL_BATCH: usize = 2048;

bitflags! {
    /// Which parts of a mesh [`apply_shape`] updates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReshapeFlags: u32 {
        /// Vertex positions, normals and tangents.
        const VERTICES = 1 << 0;
        /// Bone pose translations.
        const SKELETON = 1 << 1;
        /// Physics body primitives.
        const PHYSICS = 1 << 2;
        /// Recompute normals from the new positions after the vertex pass.
        const RECOMPUTE_NORMALS = 1 << 3;
        /// Laplacian smoothing of the new positions after the vertex pass.
        const SMOOTH = 1 << 4;
    }
}

impl Default for ReshapeFlags {
    fn default() -> Self {
        ReshapeFlags::VERTICES | ReshapeFlags::SKELETON | ReshapeFlags::PHYSICS
    }
}

/// Options for [`apply_shape`].
#[derive(Debug, Clone)]
pub struct ReshapeOptions {
    /// Passes to run.
    pub flags: ReshapeFlags,
    /// Smoothing used with [`ReshapeFlags::SMOOTH`].
    pub smooth: SmoothOptions,
    /// Bone translations changing by less than this are left alone.
    pub bone_tolerance: f32,
    /// Whether to use parallel execution (default: true).
    pub parallel: bool,
}

impl Default for ReshapeOptions {
    fn default() -> Self {
        Self {
            flags: ReshapeFlags::default(),
            smooth: SmoothOptions::default(),
            bone_tolerance: 1e-4,
            parallel: true,
        }
    }
}

impl ReshapeOptions {
    /// Set the passes to run.
    pub fn with_flags(mut self, flags: ReshapeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the smoothing options and enable smoothing.
    pub fn with_smoothing(mut self, smooth: SmoothOptions) -> Self {
        self.smooth = smooth;
        self.flags |= ReshapeFlags::SMOOTH;
        self
    }

    /// Set the bone noise floor.
    pub fn with_bone_tolerance(mut self, tolerance: f32) -> Self {
        self.bone_tolerance = tolerance.max(0.0);
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self.smooth.parallel = false;
        self
    }
}

/// Attachment of a point to a shape triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointBinding {
    /// Shape triangle, negative when unbound.
    pub triangle: i32,
    /// Barycentric coordinates on the triangle; may leave `[0, 1]`.
    pub bary: Vector3<f32>,
    /// Signed distance along the interpolated normal.
    pub offset: f32,
}

impl PointBinding {
    /// A binding that leaves its point alone.
    pub const UNBOUND: PointBinding = PointBinding {
        triangle: -1,
        bary: Vector3::new(0.0, 0.0, 0.0),
        offset: 0.0,
    };

    /// Whether the binding references a triangle.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.triangle >= 0
    }
}

/// Result of evaluating a binding against a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Evaluated {
    /// The deformed point.
    Point(Vector3<f32>),
    /// Binding not set.
    Unbound,
    /// Binding references a triangle the shape does not have.
    OutOfRange,
}

/// Geometry of a shape mesh prepared for binding evaluation.
#[derive(Debug, Clone)]
pub(crate) struct ShapeSurface {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub triangles: Vec<[u32; 3]>,
}

impl ShapeSurface {
    /// Read positions, normals (computed when missing) and triangles of `shape`.
    pub fn new(shape: &Mesh) -> Result<Self> {
        let positions = shape.positions().ok_or(MeshError::MissingChannel {
            semantic: MeshBufferSemantic::Position,
        })?;
        let triangles = shape.triangles();
        if triangles.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        let normals = read_channel_vec3f(&shape.vertex_buffers, MeshBufferSemantic::Normal, 0)
            .map(|n| {
                n.into_iter()
                    .map(|n| n.try_normalize(1e-12).unwrap_or_else(Vector3::zeros))
                    .collect()
            })
            .unwrap_or_else(|| vertex_normals(&positions, &triangles));
        Ok(Self {
            positions,
            normals,
            triangles,
        })
    }

    fn corners(&self, triangle: usize) -> [&Vector3<f32>; 3] {
        self.triangles[triangle].map(|v| &self.positions[v as usize])
    }

    /// Point on the plane of `triangle` at `bary`.
    pub fn point(&self, triangle: usize, bary: &Vector3<f32>) -> Vector3<f32> {
        interpolate(bary, self.corners(triangle))
    }

    /// Interpolated unit normal at `bary`, falling back to the face normal.
    pub fn normal(&self, triangle: usize, bary: &Vector3<f32>) -> Vector3<f32> {
        let n = interpolate(bary, self.triangles[triangle].map(|v| &self.normals[v as usize]));
        n.try_normalize(1e-12)
            .unwrap_or_else(|| self.frame(triangle)[2])
    }

    /// Orthonormal frame of `triangle`.
    pub fn frame(&self, triangle: usize) -> [Vector3<f32>; 3] {
        let [a, b, c] = self.corners(triangle);
        triangle_frame(a, b, c)
    }

    /// Evaluate a binding.
    pub fn evaluate(&self, binding: &PointBinding) -> Evaluated {
        if !binding.is_bound() {
            return Evaluated::Unbound;
        }
        let t = binding.triangle as usize;
        if t >= self.triangles.len() {
            return Evaluated::OutOfRange;
        }
        Evaluated::Point(
            self.point(t, &binding.bary) + self.normal(t, &binding.bary) * binding.offset,
        )
    }
}

/// Channels of a point binding buffer, optionally preceded by a bone id.
pub(crate) fn point_binding_channels(with_bone_id: bool) -> Vec<MeshBufferChannel> {
    let mut channels = Vec::with_capacity(4);
    if with_bone_id {
        channels.push(MeshBufferChannel::new(
            MeshBufferSemantic::BoneId,
            0,
            MeshBufferFormat::UInt32,
            1,
            0,
        ));
    }
    channels.extend([
        MeshBufferChannel::new(MeshBufferSemantic::TriangleIndex, 0, MeshBufferFormat::Int32, 1, 0),
        MeshBufferChannel::new(
            MeshBufferSemantic::BarycentricCoords,
            0,
            MeshBufferFormat::Float32,
            3,
            0,
        ),
        MeshBufferChannel::new(
            MeshBufferSemantic::ShapeBindingOffset,
            0,
            MeshBufferFormat::Float32,
            1,
            0,
        ),
    ]);
    channels
}

/// Read the point bindings of `set`, `None` without a `TriangleIndex` channel.
///
/// Missing barycentric or offset channels read as zero.
pub(crate) fn read_point_bindings(set: &MeshBufferSet) -> Option<Vec<PointBinding>> {
    let (tb, tc) = set.find_channel(MeshBufferSemantic::TriangleIndex, 0)?;
    let triangle_format = set.channel(tb, tc).format;
    let bary = set.find_channel(MeshBufferSemantic::BarycentricCoords, 0);
    let offset = set.find_channel(MeshBufferSemantic::ShapeBindingOffset, 0);

    let bindings = (0..set.element_count())
        .map(|e| {
            let triangle = read_component_i64(set.channel_bytes(tb, tc, e), triangle_format, 0);
            let bary = bary
                .map(|(b, c)| {
                    let format = set.channel(b, c).format;
                    let bytes = set.channel_bytes(b, c, e);
                    Vector3::new(
                        read_component_f32(bytes, format, 0),
                        read_component_f32(bytes, format, 1),
                        read_component_f32(bytes, format, 2),
                    )
                })
                .unwrap_or_else(Vector3::zeros);
            let offset = offset
                .map(|(b, c)| read_component_f32(set.channel_bytes(b, c, e), set.channel(b, c).format, 0))
                .unwrap_or(0.0);
            PointBinding {
                triangle: triangle.clamp(-1, i32::MAX as i64) as i32,
                bary,
                offset,
            }
        })
        .collect();
    Some(bindings)
}

/// Write `bindings` into the point binding channels of `set`.
///
/// # Panics
/// Panics if `set` lacks the channels or has a different element count.
pub(crate) fn write_point_bindings(set: &mut MeshBufferSet, bindings: &[PointBinding]) {
    assert_eq!(set.element_count(), bindings.len());
    let find = |set: &MeshBufferSet, semantic| {
        set.find_channel(semantic, 0)
            .unwrap_or_else(|| panic!("point binding buffer has no {semantic:?} channel"))
    };
    let (tb, tc) = find(set, MeshBufferSemantic::TriangleIndex);
    let (bb, bc) = find(set, MeshBufferSemantic::BarycentricCoords);
    let (ob, oc) = find(set, MeshBufferSemantic::ShapeBindingOffset);
    let formats = [
        set.channel(tb, tc).format,
        set.channel(bb, bc).format,
        set.channel(ob, oc).format,
    ];
    for (e, binding) in bindings.iter().enumerate() {
        write_component_i64(set.channel_bytes_mut(tb, tc, e), formats[0], 0, binding.triangle as i64);
        let bary = set.channel_bytes_mut(bb, bc, e);
        for k in 0..3 {
            write_component_f32(bary, formats[1], k, binding.bary[k]);
        }
        write_component_f32(set.channel_bytes_mut(ob, oc, e), formats[2], 0, binding.offset);
    }
}

/// Counts elements whose binding points past the shape, for the warning.
#[derive(Debug, Default)]
pub(crate) struct DriftCounter {
    pub out_of_range: usize,
}

impl DriftCounter {
    pub fn warn(&self, what: &str, shape_triangles: usize) {
        if self.out_of_range > 0 {
            log::warn!(
                "{} {} bindings reference triangles past the {} of the shape; they are left unchanged",
                self.out_of_range,
                what,
                shape_triangles
            );
        }
    }
}

/// Reshape `base` to follow `shape`.
///
/// `base` must carry binding data produced by [`bind_shape_reshape`] (or
/// authored in the same layout). Returns [`MeshError::MissingBinding`] when
/// none of the selected passes finds binding data, [`MeshError::NoChange`]
/// when no pass is selected, and [`MeshError::EmptyMesh`] or
/// [`MeshError::MissingChannel`] for a shape without triangles or positions.
pub fn apply_shape(base: &Mesh, shape: &Mesh, options: &ReshapeOptions) -> Result<Mesh> {
    let passes = options.flags & (ReshapeFlags::VERTICES | ReshapeFlags::SKELETON | ReshapeFlags::PHYSICS);
    if passes.is_empty() {
        return Err(MeshError::NoChange);
    }
    let surface = ShapeSurface::new(shape)?;
    let mut result = base.clone();
    let mut bound = false;

    if options.flags.contains(ReshapeFlags::VERTICES) && base.vertex_count() > 0 {
        if vertices::reshape_vertices(&mut result, &surface, options.parallel) {
            bound = true;
            if options.flags.contains(ReshapeFlags::SMOOTH) {
                if let Err(e) = laplacian_smooth_positions(&mut result, &options.smooth) {
                    log::debug!("reshape smoothing skipped: {e}");
                }
            }
            if options.flags.contains(ReshapeFlags::RECOMPUTE_NORMALS) {
                if let Err(e) = recompute_normals(&mut result) {
                    log::debug!("reshape normal recomputation skipped: {e}");
                }
            }
        }
    }

    if options.flags.contains(ReshapeFlags::SKELETON)
        && skeleton::reshape_skeleton(&mut result, &surface, options.bone_tolerance)
    {
        bound = true;
    }

    if options.flags.contains(ReshapeFlags::PHYSICS) && physics::reshape_physics(&mut result, &surface) {
        bound = true;
    }

    if !bound {
        return Err(MeshError::MissingBinding);
    }
    Ok(result)
}

#[cfg(test)]
pub(crate) mod test_shapes {
    use super::*;
    use crate::mesh::MeshBuilder;

    /// Flat `size`×`size` grid of quads in the plane `z`, normals `+Z`.
    pub fn plane(size: u32, z: f32) -> Mesh {
        let n = size + 1;
        let mut positions = Vec::new();
        for y in 0..n {
            for x in 0..n {
                positions.push(Vector3::new(x as f32 - size as f32 / 2.0, y as f32 - size as f32 / 2.0, z));
            }
        }
        let mut quads = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let i = y * n + x;
                quads.push([i, i + 1, i + n + 1, i + n]);
            }
        }
        MeshBuilder::new()
            .normals(vec![Vector3::z(); positions.len()])
            .positions(positions)
            .quads(&quads)
            .build()
            .unwrap()
    }

    /// `mesh` with every position moved by `offset`.
    pub fn translated(mesh: &Mesh, offset: Vector3<f32>) -> Mesh {
        let mut mesh = mesh.clone();
        let positions: Vec<_> = mesh
            .positions()
            .unwrap()
            .into_iter()
            .map(|p| p + offset)
            .collect();
        crate::buffer::iter::write_channel_vec3f(
            &mut mesh.vertex_buffers,
            MeshBufferSemantic::Position,
            0,
            &positions,
        );
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::test_shapes::{plane, translated};
    use super::*;

    #[test]
    fn test_binding_round_trip() {
        let mut set = MeshBufferSet::new();
        set.set_element_count(2);
        set.push_packed_buffer(&point_binding_channels(false));
        let bindings = [
            PointBinding {
                triangle: 3,
                bary: Vector3::new(0.2, 0.3, 0.5),
                offset: -0.25,
            },
            PointBinding::UNBOUND,
        ];
        write_point_bindings(&mut set, &bindings);
        assert_eq!(read_point_bindings(&set).unwrap(), bindings);
    }

    #[test]
    fn test_evaluate() {
        let surface = ShapeSurface::new(&plane(2, 1.0)).unwrap();
        let binding = PointBinding {
            triangle: 0,
            bary: Vector3::new(1.0, 0.0, 0.0),
            offset: 0.5,
        };
        assert_eq!(surface.evaluate(&binding), Evaluated::Point(Vector3::new(-1.0, -1.0, 1.5)));
        assert_eq!(surface.evaluate(&PointBinding::UNBOUND), Evaluated::Unbound);
        let drifted = PointBinding {
            triangle: 8,
            ..binding
        };
        assert_eq!(surface.evaluate(&drifted), Evaluated::OutOfRange);
    }

    #[test]
    fn test_no_binding() {
        let base = plane(1, 0.0);
        let err = apply_shape(&base, &plane(1, 0.0), &ReshapeOptions::default()).unwrap_err();
        assert!(matches!(err, MeshError::MissingBinding));
    }

    #[test]
    fn test_no_passes() {
        let base = plane(1, 0.0);
        let options = ReshapeOptions::default().with_flags(ReshapeFlags::RECOMPUTE_NORMALS);
        assert!(matches!(
            apply_shape(&base, &plane(1, 0.0), &options),
            Err(MeshError::NoChange)
        ));
    }

    #[test]
    fn test_translated_shape_moves_vertices() {
        let shape = plane(2, 0.0);
        let base = bind_shape_reshape(&plane(4, 0.3), &shape, &BindOptions::default()).unwrap();
        let offset = Vector3::new(0.5, -1.0, 2.0);
        let result = apply_shape(&base, &translated(&shape, offset), &ReshapeOptions::default().sequential())
            .unwrap();

        let before = base.positions().unwrap();
        let after = result.positions().unwrap();
        for (p, q) in before.iter().zip(&after) {
            assert!((q - (p + offset)).norm() < 1e-4, "{p} -> {q}");
        }
        assert!(result.is_valid());
    }
}
