//! Skeleton pass of the reshape.

use super::{read_point_bindings, DriftCounter, Evaluated, ShapeSurface};
use crate::buffer::iter::read_channel_u64;
use crate::buffer::MeshBufferSemantic;
use crate::mesh::{BoneName, BoneUsageFlags, Mesh, MeshBufferType};

/// Move the bone poses of `mesh` with the shape. Returns `false` without binding data.
///
/// Only translations change. A bone is updated, and flagged
/// [`BoneUsageFlags::RESHAPED`], when it moves by more than `tolerance`.
pub(crate) fn reshape_skeleton(mesh: &mut Mesh, surface: &ShapeSurface, tolerance: f32) -> bool {
    let Some(set) = mesh.additional_buffer(MeshBufferType::SkeletonDeformBinding) else {
        return false;
    };
    let (Some(bindings), Some(bones)) = (
        read_point_bindings(set),
        read_channel_u64(set, MeshBufferSemantic::BoneId, 0),
    ) else {
        return false;
    };

    let mut drift = DriftCounter::default();
    let mut reshaped = 0;
    for (binding, bone) in bindings.iter().zip(bones) {
        let Some(pose) = mesh.find_bone_pose(BoneName::new(bone as u32)) else {
            continue;
        };
        let target = match surface.evaluate(binding) {
            Evaluated::Point(p) => p,
            Evaluated::Unbound => continue,
            Evaluated::OutOfRange => {
                drift.out_of_range += 1;
                continue;
            }
        };
        let pose = &mut mesh.bone_poses[pose];
        if (target - pose.transform.translation).norm() > tolerance {
            pose.transform.translation = target;
            pose.usage |= BoneUsageFlags::RESHAPED;
            reshaped += 1;
        }
    }
    drift.warn("bone", surface.triangles.len());
    log::debug!("reshaped {reshaped} bones");
    true
}

#[cfg(test)]
mod tests {
    use super::super::test_shapes::{plane, translated};
    use super::super::{apply_shape, bind_shape_reshape, BindOptions, ReshapeFlags, ReshapeOptions};
    use super::*;
    use crate::mesh::{BonePose, Transform3f};
    use nalgebra::Vector3;

    fn posed() -> Mesh {
        let mut mesh = plane(2, 0.0);
        for (id, z) in [(1, 0.5), (2, 1.0)] {
            mesh.bone_poses.push(BonePose {
                bone_id: BoneName::new(id),
                usage: BoneUsageFlags::SKINNING,
                transform: Transform3f::from_translation(Vector3::new(0.0, 0.0, z)),
            });
        }
        mesh
    }

    #[test]
    fn test_bones_follow_shape() {
        let shape = plane(2, 0.0);
        let bound = bind_shape_reshape(&posed(), &shape, &BindOptions::default()).unwrap();
        let options = ReshapeOptions::default().with_flags(ReshapeFlags::SKELETON);
        let result = apply_shape(&bound, &translated(&shape, Vector3::new(0.0, 0.0, 2.0)), &options)
            .unwrap();

        for (pose, z) in result.bone_poses.iter().zip([2.5, 3.0]) {
            assert!((pose.transform.translation.z - z).abs() < 1e-5);
            assert!(pose.usage.contains(BoneUsageFlags::RESHAPED | BoneUsageFlags::SKINNING));
        }
        // Vertices were not asked for.
        assert_eq!(result.positions(), bound.positions());
    }

    #[test]
    fn test_noise_floor() {
        let shape = plane(2, 0.0);
        let bound = bind_shape_reshape(&posed(), &shape, &BindOptions::default()).unwrap();
        let options = ReshapeOptions::default()
            .with_flags(ReshapeFlags::SKELETON)
            .with_bone_tolerance(0.1);
        let result = apply_shape(&bound, &translated(&shape, Vector3::new(0.0, 0.0, 0.01)), &options)
            .unwrap();
        assert_eq!(result.bone_poses, bound.bone_poses);
    }
}
