//! Error types for mutable-mesh.
//!
//! Operators never use errors for control flow inside their loops. An error
//! returned from an operator is either an *expected no-op* (the caller keeps
//! using the source mesh, see [`MeshError::is_no_op`]) or an archive/CLI
//! failure. Broken buffer contracts (overlapping channels, out of range
//! indices, unknown formats) are programming errors and panic instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::buffer::{MeshBufferFormat, MeshBufferSemantic};

/// Result type alias using [`MeshError`].
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur during mesh operations.
#[derive(Error, Debug)]
pub enum MeshError {
    /// The mesh has no vertices or no faces to operate on.
    #[error("mesh has no vertices or faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A channel the operation needs is not present in the mesh.
    #[error("mesh has no {semantic:?} channel")]
    MissingChannel {
        /// The missing semantic.
        semantic: MeshBufferSemantic,
    },

    /// The operation would not change the source mesh.
    #[error("operation would not change the mesh")]
    NoChange,

    /// The mesh carries no binding data for a reshape.
    #[error("mesh has no shape binding data")]
    MissingBinding,

    /// Two meshes cannot be combined by the requested operation.
    #[error("incompatible meshes: {reason}")]
    IncompatibleMeshes {
        /// Why the meshes are incompatible.
        reason: &'static str,
    },

    /// There is no conversion between the two formats.
    #[error("unsupported conversion from {from:?} to {to:?}")]
    UnsupportedConversion {
        /// Source format.
        from: MeshBufferFormat,
        /// Destination format.
        to: MeshBufferFormat,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed mesh archive.
    #[error("invalid mesh archive: {message}")]
    Archive {
        /// What was wrong with the archive.
        message: String,
    },

    /// Error loading a mesh archive from a file.
    #[error("failed to load mesh from {path}: {message}")]
    LoadError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Unsupported file format.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat {
        /// The file extension.
        extension: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl MeshError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        MeshError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Create an archive error.
    pub fn archive<S: Into<String>>(message: S) -> Self {
        MeshError::Archive {
            message: message.into(),
        }
    }

    /// Whether this error means "nothing to do, keep the source mesh".
    ///
    /// Operators report degenerate inputs, missing optional data and
    /// unchanged results this way. The returned mesh is simply discarded.
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            MeshError::EmptyMesh
                | MeshError::MissingChannel { .. }
                | MeshError::NoChange
                | MeshError::MissingBinding
                | MeshError::IncompatibleMeshes { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_op_classification() {
        assert!(MeshError::EmptyMesh.is_no_op());
        assert!(MeshError::NoChange.is_no_op());
        assert!(MeshError::MissingChannel {
            semantic: MeshBufferSemantic::Position
        }
        .is_no_op());
        assert!(!MeshError::archive("truncated").is_no_op());
        assert!(!MeshError::UnsupportedConversion {
            from: MeshBufferFormat::None,
            to: MeshBufferFormat::Float32,
        }
        .is_no_op());
    }

    #[test]
    fn test_display() {
        let e = MeshError::invalid_param("tolerance", -1.0, "must be positive");
        assert_eq!(
            e.to_string(),
            "invalid parameter: tolerance = -1 (must be positive)"
        );
    }
}
