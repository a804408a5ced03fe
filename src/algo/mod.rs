//! Mesh operators.
//!
//! Every operator takes its source meshes by reference and either returns a
//! new [`Mesh`](crate::mesh::Mesh) or mutates one passed as `&mut`:
//!
//! - **Clip**: [`clip::clip_with_mesh`], [`clip::mask_clip_mesh`], [`clip::transform_with_mesh`]
//! - **Removal**: [`remove::remove_vertices_with_cull_set`], [`remove::remove_mask_inline`]
//! - **Morph targets**: [`morph::morph`], [`morph::morph2`], [`difference::difference`]
//! - **Reshape**: [`reshape::bind_shape_reshape`], [`reshape::apply_shape`]
//! - **Transform**: [`transform::transform`]
//! - **Skinning**: [`skinning::optimize_skinning`]
//! - **Normals and smoothing**: [`normals::recompute_normals`], [`smooth::laplacian_smooth_positions`]
//! - **Layout conversion**: [`format::format_mesh`]
//!
//! An `Err` for which [`MeshError::is_no_op`](crate::error::MeshError::is_no_op)
//! holds means there was nothing to do; the caller keeps using the source.

pub mod clip;
pub mod difference;
pub mod format;
pub mod morph;
pub mod normals;
pub mod remove;
pub mod reshape;
pub mod skinning;
pub mod smooth;
pub mod transform;
