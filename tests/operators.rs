//! End-to-end properties of the mesh operators.

use bit_vec::BitVec;
use mutable_mesh::algo::clip::clip_classify_vertices;
use mutable_mesh::buffer::convert::{read_component_f32, try_convert_component};
use mutable_mesh::mesh::{make_ids_explicit, make_vertex_ids_relative, surfaces_partition};
use mutable_mesh::prelude::*;
use nalgebra::Vector3;

/// `n`×`n` quad grid in the XY plane, displaced along Z by `height(x, y)`.
fn grid(n: u32, prefix: u32, height: impl Fn(f32, f32) -> f32) -> MeshBuilder {
    let mut positions = Vec::new();
    for j in 0..=n {
        for i in 0..=n {
            let (x, y) = (i as f32, j as f32);
            positions.push(Vector3::new(x, y, height(x, y)));
        }
    }
    let mut quads = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let v = j * (n + 1) + i;
            quads.push([v, v + 1, v + n + 2, v + n + 1]);
        }
    }
    MeshBuilder::new()
        .normals(vec![Vector3::z(); positions.len()])
        .positions(positions)
        .quads(&quads)
        .id_prefix(prefix)
}

fn flat_grid(n: u32) -> Mesh {
    grid(n, 0, |_, _| 0.0).build().unwrap()
}

fn box_mesh(min: Vector3<f32>, max: Vector3<f32>) -> Mesh {
    let corner = |x: bool, y: bool, z: bool| {
        Vector3::new(
            if x { max.x } else { min.x },
            if y { max.y } else { min.y },
            if z { max.z } else { min.z },
        )
    };
    MeshBuilder::new()
        .positions(vec![
            corner(false, false, false),
            corner(true, false, false),
            corner(true, true, false),
            corner(false, true, false),
            corner(false, false, true),
            corner(true, false, true),
            corner(true, true, true),
            corner(false, true, true),
        ])
        .quads(&[
            [0, 3, 2, 1],
            [4, 5, 6, 7],
            [0, 1, 5, 4],
            [2, 3, 7, 6],
            [1, 2, 6, 5],
            [0, 4, 7, 3],
        ])
        .build()
        .unwrap()
}

#[test]
fn test_conversion_round_trips() {
    let mut f32_bytes = [0u8; 4];
    let mut stored = [0u8; 8];
    let mut back = [0u8; 4];

    let cases = [
        (MeshBufferFormat::Float16, 1e-3),
        (MeshBufferFormat::NUInt8, 1.0 / 255.0),
        (MeshBufferFormat::NUInt16, 1.0 / 65535.0),
        (MeshBufferFormat::NInt16, 2.0 / 32768.0),
        (MeshBufferFormat::PackedDir8, 1.0 / 127.5),
        (MeshBufferFormat::PackedDirS8, 1.0 / 127.5),
    ];
    for (format, tolerance) in cases {
        for value in [0.0f32, 0.25, 0.5, 0.75, 1.0] {
            f32_bytes.copy_from_slice(&value.to_le_bytes());
            try_convert_component(&mut stored, format, 0, &f32_bytes, MeshBufferFormat::Float32, 0)
                .unwrap();
            try_convert_component(&mut back, MeshBufferFormat::Float32, 0, &stored, format, 0)
                .unwrap();
            let restored = read_component_f32(&back, MeshBufferFormat::Float32, 0);
            assert!(
                (restored - value).abs() <= tolerance,
                "{format:?}: {value} came back as {restored}"
            );
        }
    }

    // Integers survive a trip through a wider integer format exactly.
    for value in [0u8, 1, 127, 200, 255] {
        try_convert_component(&mut stored, MeshBufferFormat::UInt32, 0, &[value], MeshBufferFormat::UInt8, 0)
            .unwrap();
        let mut narrow = [0u8; 1];
        try_convert_component(&mut narrow, MeshBufferFormat::UInt8, 0, &stored, MeshBufferFormat::UInt32, 0)
            .unwrap();
        assert_eq!(narrow[0], value);
    }

    let err = try_convert_component(
        &mut stored,
        MeshBufferFormat::UInt8,
        0,
        &[200u8],
        MeshBufferFormat::PackedDir8,
        0,
    )
    .unwrap_err();
    assert!(matches!(err, MeshError::UnsupportedConversion { .. }));
}

#[test]
fn test_vertex_id_modes_preserve_ids() {
    let mut mesh = grid(2, 3, |_, _| 0.0).build().unwrap();
    let expected: Vec<u64> = (0..9).map(|i| (3u64 << 32) | i).collect();

    assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Implicit);
    assert_eq!(vertex_ids(&mesh), expected);

    make_vertex_ids_relative(&mut mesh);
    assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Relative);
    assert_eq!(vertex_ids(&mesh), expected);

    make_ids_explicit(&mut mesh);
    assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Explicit);
    assert!(mesh.are_vertex_ids_explicit());
    assert!(!mesh.are_vertex_ids_implicit());
    assert_eq!(mesh.mesh_id_prefix, 0);
    assert_eq!(vertex_ids(&mesh), expected);
}

#[test]
fn test_removal_keeps_surviving_ids() {
    let mut mesh = grid(2, 3, |_, _| 0.0).build().unwrap();
    let cull = BitVec::from_fn(mesh.vertex_count(), |v| v == 0 || v == 4);
    remove_vertices_with_cull_set(&mut mesh, &cull, false);

    let ids = vertex_ids(&mesh);
    assert!(mesh.is_valid());
    assert!(!ids.contains(&(3u64 << 32)));
    assert!(!ids.contains(&((3u64 << 32) | 4)));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(ids.iter().all(|id| id >> 32 == 3));
}

#[test]
fn test_remove_with_empty_cull_set_is_identity() {
    let mut mesh = flat_grid(3);
    let before = mesh.clone();
    remove_vertices_with_cull_set(&mut mesh, &BitVec::from_elem(16, false), true);

    assert_eq!(mesh.vertex_buffers, before.vertex_buffers);
    assert_eq!(mesh.index_buffers, before.index_buffers);
    assert_eq!(mesh.surfaces, before.surfaces);
    assert_eq!(mesh.vertex_id_mode(), VertexIdMode::Implicit);
}

#[test]
fn test_surface_ranges_are_conserved() {
    // 25 vertices and 32 triangles split over two surfaces.
    let mut mesh = grid(4, 0, |_, _| 0.0)
        .surface(0..10, 0..48)
        .surface(10..25, 48..96)
        .build()
        .unwrap();
    assert!(surfaces_partition(&mesh.surfaces, 25, 96));

    let cull = BitVec::from_fn(25, |v| v % 3 == 0);
    remove_vertices_with_cull_set(&mut mesh, &cull, false);

    assert!(mesh.is_valid());
    assert!(surfaces_partition(
        &mesh.surfaces,
        mesh.vertex_count(),
        mesh.index_count()
    ));
    let vertices: u32 = mesh
        .surfaces
        .iter()
        .flat_map(|s| &s.sub_meshes)
        .map(|sub| sub.vertex_end - sub.vertex_begin)
        .sum();
    assert_eq!(vertices as usize, mesh.vertex_count());
}

#[test]
fn test_clip_classification_is_deterministic() {
    // Large enough for the parallel path to split the work.
    let mesh = flat_grid(60);
    let clip = box_mesh(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(30.0, 30.0, 1.0));

    let parallel = clip_classify_vertices(&mesh, &clip, &ClipOptions::default());
    let again = clip_classify_vertices(&mesh, &clip, &ClipOptions::default());
    let sequential = clip_classify_vertices(&mesh, &clip, &ClipOptions::default().sequential());
    assert_eq!(parallel, again);
    assert_eq!(parallel, sequential);

    assert!(parallel[61 + 1]);
    assert!(!parallel[60 * 61 + 60]);

    let clipped = clip_with_mesh(&mesh, &clip, &ClipOptions::default()).unwrap();
    let removed = parallel.iter().filter(|&inside| inside).count();
    assert!(clipped.vertex_count() <= mesh.vertex_count() - removed);
    assert!(clipped.is_valid());
}

#[test]
fn test_clip_quad_keeps_outside_vertices() {
    let quad = MeshBuilder::new()
        .positions(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
        ])
        .triangles(vec![[0, 2, 1], [1, 2, 3]])
        .id_prefix(7)
        .build()
        .unwrap();
    let clip = box_mesh(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(0.5, 2.0, 1.0));

    let result = clip_with_mesh(&quad, &clip, &ClipOptions::default()).unwrap();
    assert_eq!(vertex_ids(&result), vec![(7u64 << 32) | 2, (7u64 << 32) | 3]);
    assert_eq!(result.face_count(), 0);
    assert_eq!(result.surfaces.len(), 1);
    let sub = result.surfaces[0].sub_meshes[0];
    assert_eq!((sub.vertex_begin, sub.vertex_end), (0, 2));
}

#[test]
fn test_morph_is_linear_in_the_factor() {
    let base = grid(4, 2, |_, _| 0.0).build().unwrap();
    let target = grid(4, 2, |x, y| 0.5 * x + 0.25 * y).build().unwrap();
    let morph_target = difference(&base, &target, &[], false).unwrap();
    // Vertex 0 does not move and is left out of the target.
    assert_eq!(morph_target.vertex_count(), 24);

    let mut stepped = base.clone();
    morph(&mut stepped, &morph_target, 0.25).unwrap();
    morph(&mut stepped, &morph_target, 0.5).unwrap();

    let mut direct = base.clone();
    morph(&mut direct, &morph_target, 0.75).unwrap();

    let mut full = base.clone();
    morph(&mut full, &morph_target, 1.0).unwrap();

    let stepped = stepped.positions().unwrap();
    let direct = direct.positions().unwrap();
    let full = full.positions().unwrap();
    let expected = target.positions().unwrap();
    for v in 0..expected.len() {
        assert!((stepped[v] - direct[v]).norm() < 1e-5);
        assert!((direct[v].z - 0.75 * expected[v].z).abs() < 1e-5);
        assert!((full[v] - expected[v]).norm() < 1e-5);
    }
}

#[test]
fn test_morph_follows_ids_after_removal() {
    let base = grid(2, 0, |_, _| 0.0).build().unwrap();
    let target = grid(2, 0, |_, _| 1.0).build().unwrap();
    let morph_target = difference(&base, &target, &[], false).unwrap();

    let mut culled = base.clone();
    remove_vertices_with_cull_set(&mut culled, &BitVec::from_fn(9, |v| v == 0), false);
    morph(&mut culled, &morph_target, 1.0).unwrap();

    let positions = culled.positions().unwrap();
    assert_eq!(positions.len(), culled.vertex_count());
    assert!(positions.iter().all(|p| (p.z - 1.0).abs() < 1e-6));
}

#[test]
fn test_difference_of_identical_meshes_is_empty() {
    let mesh = flat_grid(3);
    let result = difference(&mesh, &mesh, &[], false).unwrap();

    assert_eq!(result.vertex_count(), 0);
    assert_eq!(result.surfaces.len(), 1);
    assert_eq!(result.surfaces[0].sub_meshes.len(), 1);
    let sub = result.surfaces[0].sub_meshes[0];
    assert_eq!((sub.vertex_begin, sub.vertex_end), (0, 0));
    assert_eq!((sub.index_begin, sub.index_end), (0, 0));
}

#[test]
fn test_no_op_errors_keep_the_source() {
    let mesh = flat_grid(2);
    let far = box_mesh(Vector3::repeat(10.0), Vector3::repeat(11.0));

    let err = clip_with_mesh(&mesh, &far, &ClipOptions::default()).unwrap_err();
    assert!(err.is_no_op());
    let err = apply_shape(&mesh, &mesh, &ReshapeOptions::default()).unwrap_err();
    assert!(err.is_no_op());
    let err = difference(&mesh, &flat_grid(3), &[], false).unwrap_err();
    assert!(err.is_no_op());
}

#[test]
fn test_bind_then_reshape_follows_the_shape() {
    let base = grid(4, 0, |_, _| 0.5).build().unwrap();
    let shape = flat_grid(4);
    let lifted = grid(4, 0, |_, _| 2.0).build().unwrap();

    let bound = bind_shape_reshape(&base, &shape, &BindOptions::default()).unwrap();
    let reshaped = apply_shape(&bound, &lifted, &ReshapeOptions::default()).unwrap();

    for p in reshaped.positions().unwrap() {
        assert!((p.z - 2.5).abs() < 1e-4, "{p:?}");
    }
}
