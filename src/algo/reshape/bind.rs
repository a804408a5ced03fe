//! Binding a base mesh to a shape mesh.

use nalgebra::Vector3;
use rayon::prelude::*;

use super::physics::physics_sample_points;
use super::{point_binding_channels, write_point_bindings, PointBinding, ShapeSurface, PARALLEL_BATCH};
use crate::buffer::convert::write_component_u64;
use crate::buffer::iter::{read_channel_vec3f, read_channel_vec4f};
use crate::buffer::{
    MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet,
    UntypedMeshBufferIterator,
};
use crate::error::{MeshError, Result};
use crate::geometry::{barycentric_3d, closest_point_on_triangle, Aabb};
use crate::mesh::{Mesh, MeshBufferType};

/// Refinement steps of the barycentric/offset solve.
const SOLVE_ITERATIONS: usize = 4;

/// Options for [`bind_shape_reshape`].
#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Points farther than this from every shape triangle stay unbound.
    pub max_distance: f32,
    /// Bind the vertices.
    pub bind_vertices: bool,
    /// Bind the bone pose translations.
    pub bind_skeleton: bool,
    /// Bind the physics body sample points.
    pub bind_physics: bool,
    /// Whether to use parallel execution (default: true).
    pub parallel: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            max_distance: f32::INFINITY,
            bind_vertices: true,
            bind_skeleton: true,
            bind_physics: true,
            parallel: true,
        }
    }
}

impl BindOptions {
    /// Set the binding distance limit.
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance.max(0.0);
        self
    }

    /// Bind only the vertices.
    pub fn vertices_only(mut self) -> Self {
        self.bind_skeleton = false;
        self.bind_physics = false;
        self
    }

    /// Create options for single-threaded execution.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Nearest-triangle queries against a shape.
struct Binder<'a> {
    surface: &'a ShapeSurface,
    bounds: Vec<Aabb>,
    max_distance_squared: f32,
}

impl<'a> Binder<'a> {
    fn new(surface: &'a ShapeSurface, max_distance: f32) -> Self {
        let bounds = (0..surface.triangles.len())
            .map(|t| Aabb::from_points(surface.corners(t)))
            .collect();
        Self {
            surface,
            bounds,
            max_distance_squared: max_distance * max_distance,
        }
    }

    /// Nearest triangle to `p` and the barycentric coordinates of the closest point.
    fn nearest(&self, p: &Vector3<f32>) -> Option<(usize, Vector3<f32>)> {
        let mut best = self.max_distance_squared;
        let mut found = None;
        for (t, bounds) in self.bounds.iter().enumerate() {
            if bounds.distance_squared(p) > best {
                continue;
            }
            let [a, b, c] = self.surface.corners(t);
            let (q, bary) = closest_point_on_triangle(p, a, b, c);
            let d = (p - q).norm_squared();
            if d < best || (found.is_none() && d <= best) {
                best = d;
                found = Some((t, bary));
            }
        }
        found
    }

    /// Binding that reproduces `p` on the current shape.
    ///
    /// Starts from the closest point and moves the barycentric coordinates
    /// (unclamped, so they may leave the triangle) until `p` lies on the
    /// interpolated normal through them.
    fn bind(&self, p: &Vector3<f32>) -> PointBinding {
        let Some((t, mut bary)) = self.nearest(p) else {
            return PointBinding::UNBOUND;
        };
        let [a, b, c] = self.surface.corners(t);
        for _ in 0..SOLVE_ITERATIONS {
            let n = self.surface.normal(t, &bary);
            let offset = (p - self.surface.point(t, &bary)).dot(&n);
            match barycentric_3d(&(p - n * offset), a, b, c) {
                Some(refined) => bary = refined,
                None => break,
            }
        }
        let n = self.surface.normal(t, &bary);
        PointBinding {
            triangle: t as i32,
            bary,
            offset: (p - self.surface.point(t, &bary)).dot(&n),
        }
    }

    fn bind_all(&self, points: &[Vector3<f32>], parallel: bool) -> Vec<PointBinding> {
        if parallel {
            points
                .par_iter()
                .with_min_len(PARALLEL_BATCH)
                .map(|p| self.bind(p))
                .collect()
        } else {
            points.iter().map(|p| self.bind(p)).collect()
        }
    }
}

/// `v` expressed in the orthonormal `frame`.
fn to_frame(frame: &[Vector3<f32>; 3], v: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(frame[0].dot(v), frame[1].dot(v), frame[2].dot(v))
}

/// Copy of `base` carrying bindings to `shape` for [`apply_shape`](super::apply_shape).
///
/// Vertices get binding channels in a new vertex buffer (replacing earlier
/// bindings), bone poses a `SkeletonDeformBinding` buffer and the physics
/// body sample points a `PhysicsBodyDeformBinding` buffer. Each part is only
/// bound when enabled in `options` and present in `base`.
///
/// Returns [`MeshError::EmptyMesh`] for a base without vertices or a shape
/// without triangles.
pub fn bind_shape_reshape(base: &Mesh, shape: &Mesh, options: &BindOptions) -> Result<Mesh> {
    if base.vertex_count() == 0 {
        return Err(MeshError::EmptyMesh);
    }
    let surface = ShapeSurface::new(shape)?;
    let binder = Binder::new(&surface, options.max_distance);
    let mut result = base.clone();

    if options.bind_vertices {
        bind_vertices(&mut result, &binder, options.parallel)?;
    }

    if options.bind_skeleton && !base.bone_poses.is_empty() {
        let points: Vec<Vector3<f32>> = base
            .bone_poses
            .iter()
            .map(|p| p.transform.translation)
            .collect();
        let bindings = binder.bind_all(&points, options.parallel);
        let mut set = MeshBufferSet::new();
        set.set_element_count(bindings.len());
        set.push_packed_buffer(&point_binding_channels(true));
        write_point_bindings(&mut set, &bindings);
        let (b, c) = set
            .find_channel(MeshBufferSemantic::BoneId, 0)
            .ok_or(MeshError::MissingChannel {
                semantic: MeshBufferSemantic::BoneId,
            })?;
        for (e, pose) in base.bone_poses.iter().enumerate() {
            write_component_u64(set.channel_bytes_mut(b, c, e), MeshBufferFormat::UInt32, 0, pose.bone_id.id as u64);
        }
        result.set_additional_buffer(MeshBufferType::SkeletonDeformBinding, set);
    }

    if options.bind_physics {
        if let Some(body) = &base.physics_body {
            let points = physics_sample_points(body);
            let bindings = binder.bind_all(&points, options.parallel);
            let mut set = MeshBufferSet::new();
            set.set_element_count(bindings.len());
            set.push_packed_buffer(&point_binding_channels(false));
            write_point_bindings(&mut set, &bindings);
            result.set_additional_buffer(MeshBufferType::PhysicsBodyDeformBinding, set);
        }
    }

    let bound = |set: &MeshBufferSet| set.element_count();
    log::debug!(
        "bound {} vertices, {} bones and {} physics points to {} shape triangles",
        if options.bind_vertices { result.vertex_count() } else { 0 },
        result
            .additional_buffer(MeshBufferType::SkeletonDeformBinding)
            .map_or(0, bound),
        result
            .additional_buffer(MeshBufferType::PhysicsBodyDeformBinding)
            .map_or(0, bound),
        surface.triangles.len()
    );
    Ok(result)
}

fn bind_vertices(mesh: &mut Mesh, binder: &Binder<'_>, parallel: bool) -> Result<()> {
    let positions = mesh.positions().ok_or(MeshError::MissingChannel {
        semantic: MeshBufferSemantic::Position,
    })?;
    let bindings = binder.bind_all(&positions, parallel);

    let normals = read_channel_vec3f(&mesh.vertex_buffers, MeshBufferSemantic::Normal, 0);
    let tangents = read_channel_vec4f(&mesh.vertex_buffers, MeshBufferSemantic::Tangent, 0);

    let vertex_buffers = &mut mesh.vertex_buffers;
    for (semantic, index) in [
        (MeshBufferSemantic::TriangleIndex, 0),
        (MeshBufferSemantic::BarycentricCoords, 0),
        (MeshBufferSemantic::ShapeBindingOffset, 0),
        (MeshBufferSemantic::ShapeBindingNormal, 0),
        (MeshBufferSemantic::ShapeBindingNormal, 1),
        (MeshBufferSemantic::ShapeBindingWeight, 0),
    ] {
        while vertex_buffers.remove_channel(semantic, index) {}
    }

    let mut channels = point_binding_channels(false);
    let frames: Vec<Option<[Vector3<f32>; 3]>> = bindings
        .iter()
        .map(|b| b.is_bound().then(|| binder.surface.frame(b.triangle as usize)))
        .collect();
    let local = |values: Vec<Vector3<f32>>| -> Vec<Vector3<f32>> {
        values
            .iter()
            .zip(&frames)
            .map(|(v, frame)| frame.as_ref().map_or_else(Vector3::zeros, |f| to_frame(f, v)))
            .collect()
    };
    let local_normals = normals.map(|n| local(n));
    let local_tangents = tangents.map(|t| local(t.iter().map(|t| t.xyz()).collect()));
    for (index, values) in [(0, &local_normals), (1, &local_tangents)] {
        if values.is_some() {
            channels.push(MeshBufferChannel::new(
                MeshBufferSemantic::ShapeBindingNormal,
                index,
                MeshBufferFormat::Float32,
                3,
                0,
            ));
        }
    }
    vertex_buffers.push_packed_buffer(&channels);
    write_point_bindings(vertex_buffers, &bindings);

    for (index, values) in [(0, local_normals), (1, local_tangents)] {
        let Some(values) = values else { continue };
        let mut it =
            UntypedMeshBufferIterator::new(vertex_buffers, MeshBufferSemantic::ShapeBindingNormal, index);
        for v in &values {
            it.set_from_vec3f(v);
            it.inc();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::read_point_bindings;
    use super::super::test_shapes::plane;
    use super::*;
    use crate::mesh::{BoneName, BonePose, Transform3f};

    #[test]
    fn test_binding_reproduces_points() {
        let shape = plane(2, 0.0);
        let surface = ShapeSurface::new(&shape).unwrap();
        let binder = Binder::new(&surface, f32::INFINITY);
        for p in [
            Vector3::new(0.25, 0.5, 0.75),
            Vector3::new(-0.9, 0.1, -0.2),
            Vector3::new(3.0, 3.0, 1.0),
        ] {
            let binding = binder.bind(&p);
            assert!(binding.is_bound());
            match surface.evaluate(&binding) {
                super::super::Evaluated::Point(q) => assert!((q - p).norm() < 1e-5),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_max_distance() {
        let shape = plane(2, 0.0);
        let surface = ShapeSurface::new(&shape).unwrap();
        let binder = Binder::new(&surface, 0.5);
        assert!(binder.bind(&Vector3::new(0.0, 0.0, 0.25)).is_bound());
        assert!(!binder.bind(&Vector3::new(0.0, 0.0, 2.0)).is_bound());
    }

    #[test]
    fn test_bind_writes_channels() {
        let base = plane(1, 0.5);
        let mut posed = base.clone();
        posed.bone_poses.push(BonePose {
            bone_id: BoneName::new(42),
            transform: Transform3f::from_translation(Vector3::new(0.0, 0.0, 1.0)),
            ..BonePose::default()
        });
        let bound = bind_shape_reshape(&posed, &plane(2, 0.0), &BindOptions::default().sequential()).unwrap();

        let bindings = read_point_bindings(&bound.vertex_buffers).unwrap();
        assert_eq!(bindings.len(), 4);
        assert!(bindings.iter().all(|b| b.is_bound() && (b.offset - 0.5).abs() < 1e-6));
        assert!(bound.has_vertex_channel(MeshBufferSemantic::ShapeBindingNormal, 0));
        assert!(!bound.has_vertex_channel(MeshBufferSemantic::ShapeBindingNormal, 1));
        assert_eq!(bound.positions(), base.positions());

        let skeleton = bound
            .additional_buffer(MeshBufferType::SkeletonDeformBinding)
            .unwrap();
        assert_eq!(skeleton.element_count(), 1);
        let ids = crate::buffer::iter::read_channel_u64(skeleton, MeshBufferSemantic::BoneId, 0).unwrap();
        assert_eq!(ids, vec![42]);

        // Binding again replaces the previous channels.
        let rebound = bind_shape_reshape(&bound, &plane(2, 0.0), &BindOptions::default().vertices_only()).unwrap();
        assert_eq!(rebound.vertex_buffers.buffer_count(), bound.vertex_buffers.buffer_count());
    }
}
