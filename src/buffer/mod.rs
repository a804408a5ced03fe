//! Self-describing vertex and index buffers.
//!
//! # Overview
//!
//! Mesh data is stored as [`MeshBufferSet`]s: ordered lists of byte buffers
//! whose elements are described at runtime by [`MeshBufferChannel`]s. A
//! channel names a [`MeshBufferSemantic`] (position, normal, bone
//! indices...), a semantic index, a [`MeshBufferFormat`] and a component
//! count. Because the layout is data, the same algorithm has to work over
//! any combination of formats:
//!
//! - [`convert`] converts single components between any two formats.
//! - [`iter`] provides cursors over one channel. The untyped cursors read and
//!   write common vector types through the conversion engine; the typed
//!   cursors are a fast path for a known format.
//!
//! ```
//! use mutable_mesh::buffer::{
//!     MeshBufferChannel, MeshBufferFormat, MeshBufferSemantic, MeshBufferSet,
//!     UntypedMeshBufferIterator, UntypedMeshBufferIteratorConst,
//! };
//! use nalgebra::Vector3;
//!
//! let mut set = MeshBufferSet::new();
//! set.set_element_count(2);
//! set.push_packed_buffer(&[MeshBufferChannel::new(
//!     MeshBufferSemantic::Normal, 0, MeshBufferFormat::PackedDirS8, 3, 0,
//! )]);
//!
//! let mut it = UntypedMeshBufferIterator::new(&mut set, MeshBufferSemantic::Normal, 0);
//! it.set_from_vec3f(&Vector3::new(0.0, 0.0, 1.0));
//!
//! let it = UntypedMeshBufferIteratorConst::new(&set, MeshBufferSemantic::Normal, 0);
//! assert!((it.get_as_vec3f().z - 1.0).abs() < 0.01);
//! ```

pub mod convert;
mod format;
pub mod iter;
mod set;

pub use format::{FormatKind, MeshBufferFormat, MeshBufferSemantic};
pub use iter::{
    MeshBufferIterator, MeshBufferIteratorConst, UntypedMeshBufferIterator,
    UntypedMeshBufferIteratorConst,
};
pub use set::{MeshBuffer, MeshBufferChannel, MeshBufferSet};

pub(crate) use set::kept_runs;
