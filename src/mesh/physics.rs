//! Physics body primitives.
//!
//! A [`PhysicsBody`] is a list of aggregates, one per bone, each holding
//! simple collision primitives. Primitive positions are in mesh space.
//! Capsules are aligned with the local Z axis of their rotation.

use nalgebra::{UnitQuaternion, Vector3};

use super::skeleton::{BoneName, Transform3f};

/// A sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsSphere {
    /// Center.
    pub position: Vector3<f32>,
    /// Radius.
    pub radius: f32,
}

/// An oriented box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsBox {
    /// Center.
    pub position: Vector3<f32>,
    /// Orientation.
    pub rotation: UnitQuaternion<f32>,
    /// Half extents along the local axes.
    pub half_extents: Vector3<f32>,
}

/// A capsule: a segment along local Z swept by a sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsCapsule {
    /// Center of the segment.
    pub position: Vector3<f32>,
    /// Orientation; the segment runs along local Z.
    pub rotation: UnitQuaternion<f32>,
    /// Radius.
    pub radius: f32,
    /// Distance between the two sphere centers.
    pub length: f32,
}

impl PhysicsCapsule {
    /// Unit direction of the segment.
    pub fn axis(&self) -> Vector3<f32> {
        self.rotation * Vector3::z()
    }
}

/// A capsule with a different radius at each end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsTaperedCapsule {
    /// Center of the segment.
    pub position: Vector3<f32>,
    /// Orientation; the segment runs along local Z.
    pub rotation: UnitQuaternion<f32>,
    /// Radius at the `-Z` end.
    pub radius0: f32,
    /// Radius at the `+Z` end.
    pub radius1: f32,
    /// Distance between the two sphere centers.
    pub length: f32,
}

impl PhysicsTaperedCapsule {
    /// Unit direction of the segment.
    pub fn axis(&self) -> Vector3<f32> {
        self.rotation * Vector3::z()
    }
}

/// A convex hull given by its vertices in local space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhysicsConvex {
    /// Hull vertices, local space.
    pub vertices: Vec<Vector3<f32>>,
    /// Hull triangles.
    pub indices: Vec<u32>,
    /// Local to mesh space.
    pub transform: Transform3f,
}

/// Primitives attached to one bone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhysicsBodyAggregate {
    /// Spheres.
    pub spheres: Vec<PhysicsSphere>,
    /// Boxes.
    pub boxes: Vec<PhysicsBox>,
    /// Capsules.
    pub capsules: Vec<PhysicsCapsule>,
    /// Tapered capsules.
    pub tapered_capsules: Vec<PhysicsTaperedCapsule>,
    /// Convex hulls.
    pub convex: Vec<PhysicsConvex>,
}

impl PhysicsBodyAggregate {
    /// Total number of primitives.
    pub fn primitive_count(&self) -> usize {
        self.spheres.len()
            + self.boxes.len()
            + self.capsules.len()
            + self.tapered_capsules.len()
            + self.convex.len()
    }
}

/// Collision primitives of a mesh, grouped by bone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhysicsBody {
    /// One aggregate per body.
    pub bodies: Vec<PhysicsBodyAggregate>,
    /// Bone each body is attached to.
    pub bone_ids: Vec<BoneName>,
    /// Free-form ids assigned by the content.
    pub custom_ids: Vec<i32>,
    /// Set when a reshape changed any primitive.
    pub reshaped: bool,
}

impl PhysicsBody {
    /// Append a body attached to `bone` and return its index.
    pub fn add_body(&mut self, bone: BoneName, aggregate: PhysicsBodyAggregate) -> usize {
        self.bodies.push(aggregate);
        self.bone_ids.push(bone);
        self.custom_ids.push(-1);
        self.bodies.len() - 1
    }

    /// Number of bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of spheres of body `body`.
    pub fn sphere_count(&self, body: usize) -> usize {
        self.bodies[body].spheres.len()
    }

    /// Sphere `index` of body `body`.
    pub fn sphere(&self, body: usize, index: usize) -> PhysicsSphere {
        self.bodies[body].spheres[index]
    }

    /// Replace sphere `index` of body `body`.
    pub fn set_sphere(&mut self, body: usize, index: usize, sphere: PhysicsSphere) {
        self.bodies[body].spheres[index] = sphere;
    }

    /// Number of boxes of body `body`.
    pub fn box_count(&self, body: usize) -> usize {
        self.bodies[body].boxes.len()
    }

    /// Box `index` of body `body`.
    pub fn get_box(&self, body: usize, index: usize) -> PhysicsBox {
        self.bodies[body].boxes[index]
    }

    /// Replace box `index` of body `body`.
    pub fn set_box(&mut self, body: usize, index: usize, value: PhysicsBox) {
        self.bodies[body].boxes[index] = value;
    }

    /// Number of capsules of body `body`.
    pub fn capsule_count(&self, body: usize) -> usize {
        self.bodies[body].capsules.len()
    }

    /// Capsule `index` of body `body`.
    pub fn capsule(&self, body: usize, index: usize) -> PhysicsCapsule {
        self.bodies[body].capsules[index]
    }

    /// Replace capsule `index` of body `body`.
    pub fn set_capsule(&mut self, body: usize, index: usize, capsule: PhysicsCapsule) {
        self.bodies[body].capsules[index] = capsule;
    }

    /// Number of tapered capsules of body `body`.
    pub fn tapered_capsule_count(&self, body: usize) -> usize {
        self.bodies[body].tapered_capsules.len()
    }

    /// Tapered capsule `index` of body `body`.
    pub fn tapered_capsule(&self, body: usize, index: usize) -> PhysicsTaperedCapsule {
        self.bodies[body].tapered_capsules[index]
    }

    /// Replace tapered capsule `index` of body `body`.
    pub fn set_tapered_capsule(
        &mut self,
        body: usize,
        index: usize,
        capsule: PhysicsTaperedCapsule,
    ) {
        self.bodies[body].tapered_capsules[index] = capsule;
    }

    /// Number of convex hulls of body `body`.
    pub fn convex_count(&self, body: usize) -> usize {
        self.bodies[body].convex.len()
    }

    /// Convex hull `index` of body `body`.
    pub fn convex(&self, body: usize, index: usize) -> &PhysicsConvex {
        &self.bodies[body].convex[index]
    }

    /// Replace the vertices of convex hull `index` of body `body`.
    pub fn set_convex_vertices(&mut self, body: usize, index: usize, vertices: Vec<Vector3<f32>>) {
        self.bodies[body].convex[index].vertices = vertices;
    }

    /// Total number of primitives over all bodies.
    pub fn primitive_count(&self) -> usize {
        self.bodies.iter().map(|b| b.primitive_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let mut body = PhysicsBody::default();
        let b = body.add_body(
            BoneName::new(3),
            PhysicsBodyAggregate {
                spheres: vec![PhysicsSphere {
                    position: Vector3::zeros(),
                    radius: 1.0,
                }],
                capsules: vec![PhysicsCapsule {
                    position: Vector3::zeros(),
                    rotation: UnitQuaternion::identity(),
                    radius: 0.5,
                    length: 2.0,
                }],
                ..Default::default()
            },
        );
        assert_eq!(body.sphere_count(b), 1);
        assert_eq!(body.box_count(b), 0);
        assert_eq!(body.primitive_count(), 2);

        let mut s = body.sphere(b, 0);
        s.radius = 2.0;
        body.set_sphere(b, 0, s);
        assert_eq!(body.sphere(b, 0).radius, 2.0);
        assert_eq!(body.capsule(b, 0).axis(), Vector3::z());
    }
}
