//! Physics body pass of the reshape.
//!
//! Every primitive is represented by a fixed constellation of sample points.
//! The points are bound like vertices, deformed with the shape and the
//! primitive is fitted back from the deformed points.

use std::f32::consts::PI;
use std::sync::Arc;

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::{read_point_bindings, DriftCounter, Evaluated, ShapeSurface};
use crate::buffer::iter::read_channel_u64;
use crate::buffer::MeshBufferSemantic;
use crate::mesh::{
    Mesh, MeshBufferType, PhysicsBody, PhysicsBox, PhysicsCapsule, PhysicsSphere,
    PhysicsTaperedCapsule,
};

const SPHERE_POINTS: usize = 6;
const BOX_POINTS: usize = 14;
const CAPSULE_POINTS: usize = 14;
const RING_POINTS: usize = 6;
const AXIS_ITERATIONS: usize = 8;

/// One primitive of a physics body aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicsPrimitive {
    /// Sphere index.
    Sphere(usize),
    /// Box index.
    Box(usize),
    /// Capsule index.
    Capsule(usize),
    /// Tapered capsule index.
    TaperedCapsule(usize),
    /// Convex hull index.
    Convex(usize),
}

/// Primitives of body `body` in sample order.
fn body_primitives(physics: &PhysicsBody, body: usize) -> Vec<PhysicsPrimitive> {
    let mut out = Vec::with_capacity(physics.bodies[body].primitive_count());
    out.extend((0..physics.sphere_count(body)).map(PhysicsPrimitive::Sphere));
    out.extend((0..physics.box_count(body)).map(PhysicsPrimitive::Box));
    out.extend((0..physics.capsule_count(body)).map(PhysicsPrimitive::Capsule));
    out.extend((0..physics.tapered_capsule_count(body)).map(PhysicsPrimitive::TaperedCapsule));
    out.extend((0..physics.convex_count(body)).map(PhysicsPrimitive::Convex));
    out
}

/// Every `(body, primitive)` pair in sample order.
fn all_primitives(physics: &PhysicsBody) -> Vec<(usize, PhysicsPrimitive)> {
    (0..physics.bodies.len())
        .flat_map(|b| body_primitives(physics, b).into_iter().map(move |p| (b, p)))
        .collect()
}

fn capsule_points(
    center: &Vector3<f32>,
    rotation: &UnitQuaternion<f32>,
    radius0: f32,
    radius1: f32,
    length: f32,
) -> Vec<Vector3<f32>> {
    let axis = rotation * Vector3::z();
    let u = rotation * Vector3::x();
    let v = rotation * Vector3::y();
    let half = length * 0.5;
    let mut points = Vec::with_capacity(CAPSULE_POINTS);
    for (end, radius) in [(-half, radius0), (half, radius1)] {
        let ring_center = center + axis * end;
        for k in 0..RING_POINTS {
            let angle = k as f32 * 2.0 * PI / RING_POINTS as f32;
            points.push(ring_center + (u * angle.cos() + v * angle.sin()) * radius);
        }
    }
    points.push(center - axis * (half + radius0));
    points.push(center + axis * (half + radius1));
    points
}

/// Sample points of one primitive of body `body`, in mesh space.
///
/// Spheres give 6 points, boxes 14 (face centers then corners), capsules
/// and tapered capsules 14 (two rings of 6 then the two tips) and convex
/// hulls their vertices.
pub fn primitive_sample_points(
    physics: &PhysicsBody,
    body: usize,
    primitive: PhysicsPrimitive,
) -> Vec<Vector3<f32>> {
    match primitive {
        PhysicsPrimitive::Sphere(i) => {
            let s = physics.sphere(body, i);
            let mut points = Vec::with_capacity(SPHERE_POINTS);
            for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
                points.push(s.position + axis * s.radius);
                points.push(s.position - axis * s.radius);
            }
            points
        }
        PhysicsPrimitive::Box(i) => {
            let b = physics.get_box(body, i);
            let mut points = Vec::with_capacity(BOX_POINTS);
            for k in 0..3 {
                let d = b.rotation * (Vector3::ith(k, 1.0) * b.half_extents[k]);
                points.push(b.position + d);
                points.push(b.position - d);
            }
            for corner in 0..8 {
                let sign = |bit: usize| if corner & (1 << bit) == 0 { -1.0 } else { 1.0 };
                let local = Vector3::new(
                    sign(0) * b.half_extents.x,
                    sign(1) * b.half_extents.y,
                    sign(2) * b.half_extents.z,
                );
                points.push(b.position + b.rotation * local);
            }
            points
        }
        PhysicsPrimitive::Capsule(i) => {
            let c = physics.capsule(body, i);
            capsule_points(&c.position, &c.rotation, c.radius, c.radius, c.length)
        }
        PhysicsPrimitive::TaperedCapsule(i) => {
            let c = physics.tapered_capsule(body, i);
            capsule_points(&c.position, &c.rotation, c.radius0, c.radius1, c.length)
        }
        PhysicsPrimitive::Convex(i) => {
            let hull = physics.convex(body, i);
            hull.vertices
                .iter()
                .map(|v| hull.transform.transform_point(v))
                .collect()
        }
    }
}

/// Sample points of every primitive of `physics`, in sample order.
pub(crate) fn physics_sample_points(physics: &PhysicsBody) -> Vec<Vector3<f32>> {
    all_primitives(physics)
        .into_iter()
        .flat_map(|(b, p)| primitive_sample_points(physics, b, p))
        .collect()
}

fn mean(points: &[Vector3<f32>]) -> Vector3<f32> {
    points.iter().sum::<Vector3<f32>>() / points.len().max(1) as f32
}

/// Unit direction of the best-fit line through `points`, by power iteration from `start`.
fn principal_axis(points: &[Vector3<f32>], start: Vector3<f32>) -> Vector3<f32> {
    let center = mean(points);
    let covariance = points.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p - center;
        acc + d * d.transpose()
    });
    let mut axis = start;
    for _ in 0..AXIS_ITERATIONS {
        match (covariance * axis).try_normalize(1e-12) {
            Some(next) => axis = next,
            None => break,
        }
    }
    if axis.dot(&start) < 0.0 {
        -axis
    } else {
        axis
    }
}

fn fit_sphere(points: &[Vector3<f32>]) -> PhysicsSphere {
    let position = mean(points);
    let radius = points.iter().map(|p| (p - position).norm()).sum::<f32>() / points.len() as f32;
    PhysicsSphere { position, radius }
}

fn fit_box(old: &PhysicsBox, points: &[Vector3<f32>]) -> PhysicsBox {
    let position = mean(points);
    let mut axes = [Vector3::zeros(); 3];
    let mut half_extents = Vector3::zeros();
    for k in 0..3 {
        let d = (points[2 * k] - points[2 * k + 1]) * 0.5;
        half_extents[k] = d.norm();
        axes[k] = d
            .try_normalize(1e-12)
            .unwrap_or_else(|| old.rotation * Vector3::ith(k, 1.0));
    }

    // Keep the two axes closest to orthogonal and rebuild the third.
    let (i, j) = [(0, 1), (1, 2), (0, 2)]
        .into_iter()
        .min_by(|&(a, b), &(c, d)| {
            axes[a].dot(&axes[b]).abs().total_cmp(&axes[c].dot(&axes[d]).abs())
        })
        .unwrap_or((0, 1));
    let first = axes[i];
    let second = (axes[j] - first * first.dot(&axes[j]))
        .try_normalize(1e-12)
        .unwrap_or_else(|| first.cross(&axes[3 - i - j]).normalize());
    axes[i] = first;
    axes[j] = second;
    let k = 3 - i - j;
    axes[k] = match (i, j) {
        (0, 1) => axes[0].cross(&axes[1]),
        (1, 2) => axes[1].cross(&axes[2]),
        _ => axes[2].cross(&axes[0]),
    };

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
        Matrix3::from_columns(&axes),
    ));
    PhysicsBox {
        position,
        rotation,
        half_extents,
    }
}

/// Center, axis, length and end radii of deformed capsule points.
fn fit_capsule_shape(
    old_rotation: &UnitQuaternion<f32>,
    points: &[Vector3<f32>],
) -> (Vector3<f32>, UnitQuaternion<f32>, f32, f32, f32) {
    let c0 = mean(&points[..RING_POINTS]);
    let c1 = mean(&points[RING_POINTS..2 * RING_POINTS]);
    let tips = [points[2 * RING_POINTS], points[2 * RING_POINTS + 1]];
    let old_axis = old_rotation * Vector3::z();
    let start = (c1 - c0)
        .try_normalize(1e-12)
        .or_else(|| (tips[1] - tips[0]).try_normalize(1e-12))
        .unwrap_or(old_axis);
    let axis = principal_axis(&[c0, c1, tips[0], tips[1]], start);

    let position = (c0 + c1) * 0.5;
    let length = (c1 - c0).dot(&axis).abs();
    let ring_radius = |ring: &[Vector3<f32>]| {
        ring.iter()
            .map(|p| {
                let d = p - position;
                (d - axis * d.dot(&axis)).norm()
            })
            .sum::<f32>()
            / ring.len() as f32
    };
    let radius0 = ring_radius(&points[..RING_POINTS]);
    let radius1 = ring_radius(&points[RING_POINTS..2 * RING_POINTS]);
    let rotation = UnitQuaternion::rotation_between(&old_axis, &axis)
        .unwrap_or_else(UnitQuaternion::identity)
        * old_rotation;
    (position, rotation, length, radius0, radius1)
}

/// Fit primitive `primitive` of body `body` to its deformed sample points.
fn fit_primitive(
    physics: &mut PhysicsBody,
    body: usize,
    primitive: PhysicsPrimitive,
    points: &[Vector3<f32>],
) {
    match primitive {
        PhysicsPrimitive::Sphere(i) => physics.set_sphere(body, i, fit_sphere(points)),
        PhysicsPrimitive::Box(i) => {
            let fitted = fit_box(&physics.get_box(body, i), points);
            physics.set_box(body, i, fitted);
        }
        PhysicsPrimitive::Capsule(i) => {
            let old = physics.capsule(body, i);
            let (position, rotation, length, r0, r1) = fit_capsule_shape(&old.rotation, points);
            physics.set_capsule(
                body,
                i,
                PhysicsCapsule {
                    position,
                    rotation,
                    radius: (r0 + r1) * 0.5,
                    length,
                },
            );
        }
        PhysicsPrimitive::TaperedCapsule(i) => {
            let old = physics.tapered_capsule(body, i);
            let (position, rotation, length, radius0, radius1) =
                fit_capsule_shape(&old.rotation, points);
            physics.set_tapered_capsule(
                body,
                i,
                PhysicsTaperedCapsule {
                    position,
                    rotation,
                    radius0,
                    radius1,
                    length,
                },
            );
        }
        PhysicsPrimitive::Convex(i) => {
            let transform = physics.convex(body, i).transform;
            let inverse_rotation = transform.rotation.inverse();
            let local = points
                .iter()
                .map(|p| {
                    (inverse_rotation * (p - transform.translation))
                        .component_div(&transform.scale)
                })
                .collect();
            physics.set_convex_vertices(body, i, local);
        }
    }
}

/// Reshape the physics body of `mesh`. Returns `false` without binding data.
///
/// The body is cloned before writing when it is shared. Primitives not
/// selected by the `PhysicsBodyDeformSelection` buffer, if there is one,
/// keep their values.
pub(crate) fn reshape_physics(mesh: &mut Mesh, surface: &ShapeSurface) -> bool {
    let Some(physics) = mesh.physics_body.as_deref() else {
        return false;
    };
    let Some(bindings) = mesh
        .additional_buffer(MeshBufferType::PhysicsBodyDeformBinding)
        .and_then(read_point_bindings)
    else {
        return false;
    };

    let primitives = all_primitives(physics);
    let samples: Vec<Vec<Vector3<f32>>> = primitives
        .iter()
        .map(|&(b, p)| primitive_sample_points(physics, b, p))
        .collect();
    let sample_count: usize = samples.iter().map(Vec::len).sum();
    if sample_count != bindings.len() {
        log::warn!(
            "physics binding has {} points but the body has {}; physics is not reshaped",
            bindings.len(),
            sample_count
        );
        return false;
    }

    let selection = mesh
        .additional_buffer(MeshBufferType::PhysicsBodyDeformSelection)
        .and_then(|set| read_channel_u64(set, MeshBufferSemantic::Other, 0))
        .filter(|s| s.len() == primitives.len());

    let mut drift = DriftCounter::default();
    let mut updates = Vec::new();
    let mut next = 0;
    for (k, (&primitive, points)) in primitives.iter().zip(&samples).enumerate() {
        let range = next..next + points.len();
        next = range.end;
        if selection.as_ref().is_some_and(|s| s[k] == 0) {
            continue;
        }
        let mut moved = false;
        let deformed: Vec<Vector3<f32>> = points
            .iter()
            .zip(&bindings[range])
            .map(|(p, binding)| match surface.evaluate(binding) {
                Evaluated::Point(q) => {
                    moved = true;
                    q
                }
                Evaluated::Unbound => *p,
                Evaluated::OutOfRange => {
                    drift.out_of_range += 1;
                    *p
                }
            })
            .collect();
        if moved {
            updates.push((primitive, deformed));
        }
    }
    drift.warn("physics", surface.triangles.len());

    if !updates.is_empty() {
        if let Some(body) = mesh.physics_body.as_mut() {
            let body = Arc::make_mut(body);
            for ((b, primitive), points) in updates {
                fit_primitive(body, b, primitive, &points);
            }
            body.reshaped = true;
        }
    }
    true
}
