//! Buffer format registry.
//!
//! Every channel of a mesh buffer is described by a [`MeshBufferSemantic`]
//! (what the values mean) and a [`MeshBufferFormat`] (how each component is
//! stored). This module is the table of facts about formats that the
//! conversion engine and the buffer set rely on.

/// Logical meaning of a buffer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u32)]
pub enum MeshBufferSemantic {
    /// Unused channel.
    #[default]
    None = 0,
    /// Vertex index or vertex id (32-bit relative or 64-bit explicit).
    VertexIndex = 1,
    /// Vertex position.
    Position = 2,
    /// Vertex normal.
    Normal = 3,
    /// Tangent, optionally with the basis sign in `w`.
    Tangent = 4,
    /// Binormal (bitangent).
    Binormal = 5,
    /// Texture coordinates; the semantic index selects the UV set.
    TexCoords = 6,
    /// Vertex colour.
    Color = 7,
    /// Skinning bone indices into the mesh bone map.
    BoneIndices = 8,
    /// Skinning weights.
    BoneWeights = 9,
    /// Layout block id of the vertex.
    LayoutBlock = 10,
    /// Barycentric coordinates of a shape binding.
    BarycentricCoords = 11,
    /// Triangle index of a shape binding.
    TriangleIndex = 12,
    /// Signed offset of a shape binding along the interpolated normal.
    ShapeBindingOffset = 13,
    /// Vertex normal expressed in the frame of the bound triangle.
    ShapeBindingNormal = 14,
    /// Blend weight of a shape binding.
    ShapeBindingWeight = 15,
    /// Bone id of a skeleton binding element.
    BoneId = 16,
    /// Anything else.
    Other = 17,
}

impl MeshBufferSemantic {
    /// All semantics, in discriminant order.
    pub const ALL: [MeshBufferSemantic; 18] = [
        MeshBufferSemantic::None,
        MeshBufferSemantic::VertexIndex,
        MeshBufferSemantic::Position,
        MeshBufferSemantic::Normal,
        MeshBufferSemantic::Tangent,
        MeshBufferSemantic::Binormal,
        MeshBufferSemantic::TexCoords,
        MeshBufferSemantic::Color,
        MeshBufferSemantic::BoneIndices,
        MeshBufferSemantic::BoneWeights,
        MeshBufferSemantic::LayoutBlock,
        MeshBufferSemantic::BarycentricCoords,
        MeshBufferSemantic::TriangleIndex,
        MeshBufferSemantic::ShapeBindingOffset,
        MeshBufferSemantic::ShapeBindingNormal,
        MeshBufferSemantic::ShapeBindingWeight,
        MeshBufferSemantic::BoneId,
        MeshBufferSemantic::Other,
    ];

    /// Decode from the persisted discriminant.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Semantics that describe geometry and may be blended or diffed.
    pub fn is_geometric(self) -> bool {
        matches!(
            self,
            MeshBufferSemantic::Position
                | MeshBufferSemantic::Normal
                | MeshBufferSemantic::Tangent
                | MeshBufferSemantic::Binormal
                | MeshBufferSemantic::TexCoords
                | MeshBufferSemantic::Color
        )
    }

    /// Direction semantics that should stay unit length.
    pub fn is_direction(self) -> bool {
        matches!(
            self,
            MeshBufferSemantic::Normal | MeshBufferSemantic::Tangent | MeshBufferSemantic::Binormal
        )
    }
}

/// Storage encoding of one channel component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u32)]
pub enum MeshBufferFormat {
    /// No data.
    #[default]
    None = 0,
    /// IEEE half float.
    Float16 = 1,
    /// IEEE single float.
    Float32 = 2,
    /// Unsigned 8-bit integer.
    UInt8 = 3,
    /// Unsigned 16-bit integer.
    UInt16 = 4,
    /// Unsigned 32-bit integer.
    UInt32 = 5,
    /// Signed 8-bit integer.
    Int8 = 6,
    /// Signed 16-bit integer.
    Int16 = 7,
    /// Signed 32-bit integer.
    Int32 = 8,
    /// Unsigned 8-bit integer read as `[0, 1]`.
    NUInt8 = 9,
    /// Unsigned 16-bit integer read as `[0, 1]`.
    NUInt16 = 10,
    /// Unsigned 32-bit integer read as `[0, 1]`.
    NUInt32 = 11,
    /// Signed 8-bit integer read as `[-1, 1]`.
    NInt8 = 12,
    /// Signed 16-bit integer read as `[-1, 1]`.
    NInt16 = 13,
    /// Signed 32-bit integer read as `[-1, 1]`.
    NInt32 = 14,
    /// Unsigned direction octets, `byte / 127.5 - 1`.
    PackedDir8 = 15,
    /// [`PackedDir8`](Self::PackedDir8) with the tangent basis sign in the 4th byte.
    PackedDir8WTangentSign = 16,
    /// Signed direction octets, `i8 / 127.5`.
    PackedDirS8 = 17,
    /// [`PackedDirS8`](Self::PackedDirS8) with the tangent basis sign in the 4th byte.
    PackedDirS8WTangentSign = 18,
    /// IEEE double float.
    Float64 = 19,
    /// Unsigned 64-bit integer.
    UInt64 = 20,
    /// Signed 64-bit integer.
    Int64 = 21,
}

/// Broad family of a format, used to pick a conversion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// No storage.
    None,
    /// IEEE float of any width.
    Float,
    /// Plain unsigned integer.
    Unsigned,
    /// Plain signed integer.
    Signed,
    /// Unsigned integer interpreted in `[0, 1]`.
    NormalizedUnsigned,
    /// Signed integer interpreted in `[-1, 1]`.
    NormalizedSigned,
    /// Unsigned direction octet.
    PackedDir,
    /// Signed direction octet.
    PackedDirSigned,
}

impl MeshBufferFormat {
    /// All formats, in discriminant order.
    pub const ALL: [MeshBufferFormat; 22] = [
        MeshBufferFormat::None,
        MeshBufferFormat::Float16,
        MeshBufferFormat::Float32,
        MeshBufferFormat::UInt8,
        MeshBufferFormat::UInt16,
        MeshBufferFormat::UInt32,
        MeshBufferFormat::Int8,
        MeshBufferFormat::Int16,
        MeshBufferFormat::Int32,
        MeshBufferFormat::NUInt8,
        MeshBufferFormat::NUInt16,
        MeshBufferFormat::NUInt32,
        MeshBufferFormat::NInt8,
        MeshBufferFormat::NInt16,
        MeshBufferFormat::NInt32,
        MeshBufferFormat::PackedDir8,
        MeshBufferFormat::PackedDir8WTangentSign,
        MeshBufferFormat::PackedDirS8,
        MeshBufferFormat::PackedDirS8WTangentSign,
        MeshBufferFormat::Float64,
        MeshBufferFormat::UInt64,
        MeshBufferFormat::Int64,
    ];

    /// Decode from the persisted discriminant.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Size in bytes of one component.
    pub const fn size(self) -> usize {
        use MeshBufferFormat::*;
        match self {
            None => 0,
            UInt8 | Int8 | NUInt8 | NInt8 => 1,
            PackedDir8 | PackedDir8WTangentSign | PackedDirS8 | PackedDirS8WTangentSign => 1,
            Float16 | UInt16 | Int16 | NUInt16 | NInt16 => 2,
            Float32 | UInt32 | Int32 | NUInt32 | NInt32 => 4,
            Float64 | UInt64 | Int64 => 8,
        }
    }

    /// Conversion family of this format.
    pub const fn kind(self) -> FormatKind {
        use MeshBufferFormat::*;
        match self {
            None => FormatKind::None,
            Float16 | Float32 | Float64 => FormatKind::Float,
            UInt8 | UInt16 | UInt32 | UInt64 => FormatKind::Unsigned,
            Int8 | Int16 | Int32 | Int64 => FormatKind::Signed,
            NUInt8 | NUInt16 | NUInt32 => FormatKind::NormalizedUnsigned,
            NInt8 | NInt16 | NInt32 => FormatKind::NormalizedSigned,
            PackedDir8 | PackedDir8WTangentSign => FormatKind::PackedDir,
            PackedDirS8 | PackedDirS8WTangentSign => FormatKind::PackedDirSigned,
        }
    }

    /// Number of value bits of one component.
    pub const fn bits(self) -> u32 {
        (self.size() * 8) as u32
    }

    /// Whether the format is an IEEE float.
    pub const fn is_float(self) -> bool {
        matches!(self.kind(), FormatKind::Float)
    }

    /// Whether the format is a plain (non-normalised) integer.
    pub const fn is_integer(self) -> bool {
        matches!(self.kind(), FormatKind::Unsigned | FormatKind::Signed)
    }

    /// Whether the format is a normalised integer.
    pub const fn is_normalized(self) -> bool {
        matches!(
            self.kind(),
            FormatKind::NormalizedUnsigned | FormatKind::NormalizedSigned
        )
    }

    /// Whether the format is one of the packed direction octets.
    pub const fn is_packed_dir(self) -> bool {
        matches!(self.kind(), FormatKind::PackedDir | FormatKind::PackedDirSigned)
    }

    /// Whether the 4th component carries the tangent basis sign.
    pub const fn has_tangent_sign(self) -> bool {
        matches!(
            self,
            MeshBufferFormat::PackedDir8WTangentSign | MeshBufferFormat::PackedDirS8WTangentSign
        )
    }

    /// Inclusive integer range of the storage type, for integer-backed formats.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        match self.kind() {
            FormatKind::Unsigned | FormatKind::NormalizedUnsigned | FormatKind::PackedDir => {
                Some((0, (1i128 << self.bits()) - 1))
            }
            FormatKind::Signed | FormatKind::NormalizedSigned | FormatKind::PackedDirSigned => {
                let half = 1i128 << (self.bits() - 1);
                Some((-half, half - 1))
            }
            FormatKind::Float | FormatKind::None => None,
        }
    }

    /// Smallest plain unsigned integer format that can hold `max_value`.
    pub fn smallest_unsigned_for(max_value: u64) -> MeshBufferFormat {
        if max_value <= u8::MAX as u64 {
            MeshBufferFormat::UInt8
        } else if max_value <= u16::MAX as u64 {
            MeshBufferFormat::UInt16
        } else if max_value <= u32::MAX as u64 {
            MeshBufferFormat::UInt32
        } else {
            MeshBufferFormat::UInt64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(MeshBufferFormat::None.size(), 0);
        assert_eq!(MeshBufferFormat::Float16.size(), 2);
        assert_eq!(MeshBufferFormat::Float32.size(), 4);
        assert_eq!(MeshBufferFormat::Float64.size(), 8);
        assert_eq!(MeshBufferFormat::NInt16.size(), 2);
        assert_eq!(MeshBufferFormat::PackedDirS8WTangentSign.size(), 1);
        assert_eq!(MeshBufferFormat::UInt64.size(), 8);
    }

    #[test]
    fn test_discriminants_round_trip() {
        for f in MeshBufferFormat::ALL {
            assert_eq!(MeshBufferFormat::from_u32(f as u32), Some(f));
        }
        for s in MeshBufferSemantic::ALL {
            assert_eq!(MeshBufferSemantic::from_u32(s as u32), Some(s));
        }
        assert_eq!(MeshBufferFormat::from_u32(999), None);
    }

    #[test]
    fn test_integer_range() {
        assert_eq!(MeshBufferFormat::UInt8.integer_range(), Some((0, 255)));
        assert_eq!(MeshBufferFormat::NInt16.integer_range(), Some((-32768, 32767)));
        assert_eq!(MeshBufferFormat::Float32.integer_range(), None);
    }

    #[test]
    fn test_smallest_unsigned() {
        assert_eq!(MeshBufferFormat::smallest_unsigned_for(255), MeshBufferFormat::UInt8);
        assert_eq!(MeshBufferFormat::smallest_unsigned_for(256), MeshBufferFormat::UInt16);
        assert_eq!(
            MeshBufferFormat::smallest_unsigned_for(1 << 40),
            MeshBufferFormat::UInt64
        );
    }
}
