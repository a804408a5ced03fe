//! Index types for triangle index buffers.
//!
//! Index buffers store either 16-bit or 32-bit indices. Operators that touch
//! indices are written once, generic over [`MeshIndex`], and dispatched on the
//! buffer format with [`IndexFormat::of`].

use std::fmt::Debug;
use std::hash::Hash;

use crate::buffer::MeshBufferFormat;

/// Trait for integer types stored in index buffers.
///
/// This trait is implemented for `u16` and `u32`, matching the two index
/// buffer formats.
pub trait MeshIndex:
    Copy + Clone + Eq + PartialEq + Ord + PartialOrd + Hash + Debug + Send + Sync + 'static
{
    /// Buffer format of this index type.
    const FORMAT: MeshBufferFormat;

    /// The maximum valid index value.
    const MAX: Self;

    /// Size in bytes.
    const SIZE: usize;

    /// Convert from usize to this index type.
    ///
    /// # Panics
    /// Panics (in debug builds) if the value is too large for this index type.
    fn from_usize(v: usize) -> Self;

    /// Convert to usize.
    fn to_usize(self) -> usize;

    /// Read a little-endian value from the start of `bytes`.
    fn read(bytes: &[u8]) -> Self;

    /// Write as little-endian into the start of `bytes`.
    fn write(self, bytes: &mut [u8]);
}

impl MeshIndex for u16 {
    const FORMAT: MeshBufferFormat = MeshBufferFormat::UInt16;
    const MAX: Self = u16::MAX;
    const SIZE: usize = 2;

    #[inline]
    fn from_usize(v: usize) -> Self {
        debug_assert!(v <= Self::MAX as usize, "index {} too large for u16", v);
        v as u16
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }

    #[inline]
    fn read(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    #[inline]
    fn write(self, bytes: &mut [u8]) {
        bytes[..2].copy_from_slice(&self.to_le_bytes());
    }
}

impl MeshIndex for u32 {
    const FORMAT: MeshBufferFormat = MeshBufferFormat::UInt32;
    const MAX: Self = u32::MAX;
    const SIZE: usize = 4;

    #[inline]
    fn from_usize(v: usize) -> Self {
        debug_assert!(v <= Self::MAX as usize, "index {} too large for u32", v);
        v as u32
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }

    #[inline]
    fn read(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_le_bytes());
    }
}

/// The two supported index buffer widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexFormat {
    /// Width of an index buffer channel format.
    ///
    /// # Panics
    /// Panics for formats that cannot back an index buffer.
    pub fn of(format: MeshBufferFormat) -> IndexFormat {
        match Self::try_of(format) {
            Some(width) => width,
            None => panic!("{format:?} is not an index buffer format"),
        }
    }

    /// Width of an index buffer channel format, `None` for formats that
    /// cannot back an index buffer.
    pub fn try_of(format: MeshBufferFormat) -> Option<IndexFormat> {
        match format {
            MeshBufferFormat::UInt16 | MeshBufferFormat::Int16 => Some(IndexFormat::U16),
            MeshBufferFormat::UInt32 | MeshBufferFormat::Int32 => Some(IndexFormat::U32),
            _ => None,
        }
    }

    /// Smallest width able to address `vertex_count` vertices.
    pub fn for_vertex_count(vertex_count: usize) -> IndexFormat {
        if vertex_count <= u16::MAX as usize + 1 {
            IndexFormat::U16
        } else {
            IndexFormat::U32
        }
    }

    /// Buffer format of this width.
    pub fn buffer_format(self) -> MeshBufferFormat {
        match self {
            IndexFormat::U16 => MeshBufferFormat::UInt16,
            IndexFormat::U32 => MeshBufferFormat::UInt32,
        }
    }

    /// Size of one index in bytes.
    pub fn size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Read index `i` from a packed index buffer.
#[inline]
pub fn read_index<I: MeshIndex>(data: &[u8], i: usize) -> I {
    I::read(&data[i * I::SIZE..(i + 1) * I::SIZE])
}

/// Write index `i` of a packed index buffer.
#[inline]
pub fn write_index<I: MeshIndex>(data: &mut [u8], i: usize, value: I) {
    value.write(&mut data[i * I::SIZE..(i + 1) * I::SIZE]);
}
