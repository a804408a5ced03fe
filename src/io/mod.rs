//! Mesh file I/O.
//!
//! Meshes are stored in the binary archive format described in [`archive`].
//! Files use the `.mumesh` extension and start with a small header holding a
//! magic tag and the format version.
//!
//! ```no_run
//! use mutable_mesh::io::{load, save};
//!
//! let mesh = load("body.mumesh").unwrap();
//! save(&mesh, "copy.mumesh").unwrap();
//! ```

pub mod archive;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{MeshError, Result};
use crate::mesh::Mesh;

pub use archive::{from_bytes, to_bytes, ArchiveReader, ArchiveWriter};

/// File extension of mesh archives.
pub const EXTENSION: &str = "mumesh";

const MAGIC: [u8; 4] = *b"MUMS";
const VERSION: u32 = 1;

fn check_extension(path: &Path) -> Result<()> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if extension.eq_ignore_ascii_case(EXTENSION) {
        Ok(())
    } else {
        Err(MeshError::UnsupportedFormat {
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension.to_string()
            },
        })
    }
}

/// Write `mesh` with the file header to `writer`.
pub fn write_to<W: Write>(mesh: &Mesh, mut writer: W) -> Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_u32::<LittleEndian>(VERSION)?;
    let mut archive = ArchiveWriter::new(writer);
    archive.write_mesh(mesh)?;
    archive.into_inner().flush()?;
    Ok(())
}

/// Read a mesh with the file header from `reader`.
pub fn read_from<R: Read>(mut reader: R) -> Result<Mesh> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(MeshError::archive("not a mesh archive"));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(MeshError::archive(format!(
            "unsupported archive version {version}"
        )));
    }
    ArchiveReader::new(reader).read_mesh()
}

/// Load a mesh from a `.mumesh` file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    let path = path.as_ref();
    check_extension(path)?;
    let file = File::open(path)?;
    let mesh = read_from(BufReader::new(file)).map_err(|e| match e {
        MeshError::Io(_) | MeshError::Archive { .. } => MeshError::LoadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
        other => other,
    })?;
    log::debug!(
        "loaded {}: {} vertices, {} triangles",
        path.display(),
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(mesh)
}

/// Save a mesh to a `.mumesh` file.
pub fn save<P: AsRef<Path>>(mesh: &Mesh, path: P) -> Result<()> {
    let path = path.as_ref();
    check_extension(path)?;
    let file = File::create(path)?;
    write_to(mesh, BufWriter::new(file))
}
