//! Skeletons and bone poses.
//!
//! A [`Skeleton`] is shared, read-mostly data owned outside the mesh. Meshes
//! reference it through an `Arc` and keep their own [`BonePose`] list, which
//! is what operators modify.

use bitflags::bitflags;
use nalgebra::{Matrix4, UnitQuaternion, Vector3};

/// Identifier of a bone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BoneName {
    /// Numeric bone id.
    pub id: u32,
}

impl BoneName {
    /// Create a bone name from its id.
    pub const fn new(id: u32) -> Self {
        Self { id }
    }
}

bitflags! {
    /// How a bone pose is used by the mesh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BoneUsageFlags: u32 {
        /// Referenced by skinning weights.
        const SKINNING = 1 << 0;
        /// Parent of a skinning bone.
        const SKINNING_PARENT = 1 << 1;
        /// Drives a physics body.
        const PHYSICS = 1 << 2;
        /// Parent of a physics bone.
        const PHYSICS_PARENT = 1 << 3;
        /// Moved by a deformation.
        const DEFORM = 1 << 4;
        /// Parent of a deformed bone.
        const DEFORM_PARENT = 1 << 5;
        /// Transform was changed by a reshape.
        const RESHAPED = 1 << 6;
        /// Root bone.
        const ROOT = 1 << 7;
    }
}

/// Scale, rotation and translation, applied in that order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3f {
    /// Rotation.
    pub rotation: UnitQuaternion<f32>,
    /// Translation.
    pub translation: Vector3<f32>,
    /// Per-axis scale.
    pub scale: Vector3<f32>,
}

impl Default for Transform3f {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform3f {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// A pure translation.
    pub fn from_translation(translation: Vector3<f32>) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// Transform a point.
    pub fn transform_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * p.component_mul(&self.scale) + self.translation
    }

    /// Homogeneous matrix of the transform.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&self.translation)
            * self.rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }

    /// Whether both transforms match within `tolerance` per component.
    pub fn equals(&self, other: &Transform3f, tolerance: f32) -> bool {
        (self.translation - other.translation).amax() <= tolerance
            && (self.scale - other.scale).amax() <= tolerance
            && self.rotation.angle_to(&other.rotation) <= tolerance
    }
}

/// Pose of one bone used by a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BonePose {
    /// Bone this pose belongs to.
    pub bone_id: BoneName,
    /// What the bone is used for.
    pub usage: BoneUsageFlags,
    /// Transform of the bone in mesh space.
    pub transform: Transform3f,
}

/// Bone hierarchy shared between meshes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Skeleton {
    /// Bone ids, in hierarchy order.
    pub bone_ids: Vec<BoneName>,
    /// Parent of each bone, `-1` for roots.
    pub parents: Vec<i16>,
}

impl Skeleton {
    /// Number of bones.
    #[inline]
    pub fn bone_count(&self) -> usize {
        self.bone_ids.len()
    }

    /// Add a bone and return its index.
    pub fn add_bone(&mut self, id: BoneName, parent: Option<usize>) -> usize {
        self.bone_ids.push(id);
        self.parents.push(parent.map(|p| p as i16).unwrap_or(-1));
        self.bone_ids.len() - 1
    }

    /// Index of a bone by id.
    pub fn find_bone(&self, id: BoneName) -> Option<usize> {
        self.bone_ids.iter().position(|&b| b == id)
    }

    /// Parent index of bone `index`.
    pub fn parent(&self, index: usize) -> Option<usize> {
        match self.parents.get(index) {
            Some(&p) if p >= 0 => Some(p as usize),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skeleton_hierarchy() {
        let mut skeleton = Skeleton::default();
        let root = skeleton.add_bone(BoneName::new(10), None);
        let child = skeleton.add_bone(BoneName::new(11), Some(root));
        assert_eq!(skeleton.find_bone(BoneName::new(11)), Some(child));
        assert_eq!(skeleton.parent(child), Some(root));
        assert_eq!(skeleton.parent(root), None);
        assert_eq!(skeleton.find_bone(BoneName::new(99)), None);
    }

    #[test]
    fn test_transform_point() {
        let t = Transform3f {
            rotation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::FRAC_PI_2),
            translation: Vector3::new(1.0, 0.0, 0.0),
            scale: Vector3::new(2.0, 2.0, 2.0),
        };
        let p = t.transform_point(&Vector3::new(1.0, 0.0, 0.0));
        assert!((p - Vector3::new(1.0, 2.0, 0.0)).norm() < 1e-5);

        let m = t.to_matrix();
        let q = m.transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        assert!((q.coords - p).norm() < 1e-5);
    }

    #[test]
    fn test_transform_equals() {
        let a = Transform3f::from_translation(Vector3::new(1.0, 2.0, 3.0));
        let mut b = a;
        b.translation.x += 1e-6;
        assert!(a.equals(&b, 1e-4));
        b.translation.x += 1.0;
        assert!(!a.equals(&b, 1e-4));
    }
}
