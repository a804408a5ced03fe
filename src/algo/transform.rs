//! Affine transformation of mesh vertices.

use bit_vec::BitVec;
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use crate::buffer::{MeshBufferSemantic, UntypedMeshBufferIterator};
use crate::error::{MeshError, Result};
use crate::mesh::Mesh;

/// Copy of `source` with every vertex transformed by `matrix`.
///
/// Positions are transformed as points. Normals use the inverse transpose
/// and are renormalized. Tangents and binormals use the linear part and are
/// renormalized; a tangent sign stored in `w` is kept.
///
/// # Example
///
/// ```
/// use mutable_mesh::algo::transform::transform;
/// use mutable_mesh::mesh::build_from_triangles;
/// use nalgebra::{Matrix4, Vector3};
///
/// let mesh = build_from_triangles(
///     &[Vector3::zeros(), Vector3::x(), Vector3::y()],
///     &[[0, 1, 2]],
/// )
/// .unwrap();
/// let moved = transform(&mesh, &Matrix4::new_translation(&Vector3::z())).unwrap();
/// assert_eq!(moved.positions().unwrap()[1], Vector3::new(1.0, 0.0, 1.0));
/// ```
pub fn transform(source: &Mesh, matrix: &Matrix4<f32>) -> Result<Mesh> {
    if source.vertex_count() == 0 {
        return Err(MeshError::EmptyMesh);
    }
    let mut result = source.clone();
    transform_vertices(&mut result, matrix, None);
    Ok(result)
}

/// Transform the vertices of `mesh` in place.
///
/// With a `selection`, only the vertices whose bit is set are touched.
pub fn transform_vertices(mesh: &mut Mesh, matrix: &Matrix4<f32>, selection: Option<&BitVec>) {
    let count = mesh.vertex_count();
    let linear: Matrix3<f32> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
    let normal_matrix = linear
        .try_inverse()
        .map(|m| m.transpose())
        .unwrap_or(linear);
    let selected = |v: usize| selection.map_or(true, |s| s.get(v).unwrap_or(false));

    let mut positions =
        UntypedMeshBufferIterator::new(&mut mesh.vertex_buffers, MeshBufferSemantic::Position, 0);
    if positions.ptr().is_some() {
        for v in 0..count {
            if selected(v) {
                let p = positions.get_as_vec3f();
                let p = matrix.transform_point(&Point3::from(p));
                positions.set_from_vec3f(&p.coords);
            }
            positions.inc();
        }
    }

    for (semantic, m) in [
        (MeshBufferSemantic::Normal, normal_matrix),
        (MeshBufferSemantic::Tangent, linear),
        (MeshBufferSemantic::Binormal, linear),
    ] {
        let mut it = UntypedMeshBufferIterator::new(&mut mesh.vertex_buffers, semantic, 0);
        if it.ptr().is_none() {
            continue;
        }
        for v in 0..count {
            if selected(v) {
                let d = m * it.get_as_vec3f();
                let d = d.try_normalize(1e-12).unwrap_or_else(Vector3::zeros);
                // Three components only, a tangent sign in w stays as is.
                for c in 0..3 {
                    it.set_component_f32(c, d[c]);
                }
            }
            it.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MeshBufferFormat;
    use crate::mesh::MeshBuilder;
    use nalgebra::{Vector4, UnitQuaternion};

    fn triangle() -> Mesh {
        MeshBuilder::new()
            .positions(vec![Vector3::zeros(), Vector3::x(), Vector3::y()])
            .normals(vec![Vector3::z(); 3])
            .tangents(vec![Vector4::new(1.0, 0.0, 0.0, -1.0); 3])
            .with_normal_format(MeshBufferFormat::PackedDirS8WTangentSign)
            .triangles(vec![[0, 1, 2]])
            .build()
            .unwrap()
    }

    #[test]
    fn test_rotation_moves_directions() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::FRAC_PI_2);
        let result = transform(&triangle(), &rotation.to_homogeneous()).unwrap();

        let positions = result.positions().unwrap();
        assert!((positions[1] - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-5);

        let it = crate::buffer::UntypedMeshBufferIteratorConst::new(
            &result.vertex_buffers,
            MeshBufferSemantic::Normal,
            0,
        );
        let n = it.get_as_vec4f();
        assert!((n.xyz() - Vector3::x()).norm() < 0.02);
        let t = crate::buffer::UntypedMeshBufferIteratorConst::new(
            &result.vertex_buffers,
            MeshBufferSemantic::Tangent,
            0,
        )
        .get_as_vec4f();
        assert!((t.xyz() - Vector3::new(0.0, 0.0, -1.0)).norm() < 0.02);
    }

    #[test]
    fn test_nonuniform_scale_keeps_normals_perpendicular() {
        let scale = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 4.0, 1.0));
        let mesh = MeshBuilder::new()
            .positions(vec![Vector3::zeros(), Vector3::new(1.0, 1.0, 0.0), Vector3::z()])
            .normals(vec![Vector3::new(1.0, -1.0, 0.0).normalize(); 3])
            .triangles(vec![[0, 1, 2]])
            .build()
            .unwrap();
        let result = transform(&mesh, &scale).unwrap();
        let positions = result.positions().unwrap();
        let n = crate::buffer::UntypedMeshBufferIteratorConst::new(
            &result.vertex_buffers,
            MeshBufferSemantic::Normal,
            0,
        )
        .get_as_vec3f();
        let edge = positions[1] - positions[0];
        assert!(n.dot(&edge).abs() < 1e-5);
    }

    #[test]
    fn test_empty_mesh() {
        assert!(transform(&Mesh::new(), &Matrix4::identity())
            .unwrap_err()
            .is_no_op());
    }
}
