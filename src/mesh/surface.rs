//! Surfaces and their submesh ranges.

/// A contiguous vertex/index range of a mesh belonging to one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceSubMesh {
    /// First vertex of the range.
    pub vertex_begin: u32,
    /// One past the last vertex of the range.
    pub vertex_end: u32,
    /// First index of the range.
    pub index_begin: u32,
    /// One past the last index of the range.
    pub index_end: u32,
    /// Identifier of the source this range came from.
    pub external_id: u32,
}

impl SurfaceSubMesh {
    /// Number of vertices in the range.
    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_end - self.vertex_begin
    }

    /// Number of indices in the range.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_end - self.index_begin
    }

    /// Whether the range holds neither vertices nor indices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0 && self.index_count() == 0
    }
}

/// One logical rendering surface of a mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Surface {
    /// Ranges of the surface, in buffer order.
    pub sub_meshes: Vec<SurfaceSubMesh>,
    /// First bone map entry used by the surface.
    pub bone_map_index: u32,
    /// Number of bone map entries used by the surface.
    pub bone_map_count: u32,
    /// Surface identifier.
    pub id: u32,
}

impl Surface {
    /// A surface made of a single range.
    pub fn single(sub_mesh: SurfaceSubMesh) -> Self {
        Self {
            sub_meshes: vec![sub_mesh],
            ..Default::default()
        }
    }

    /// Total vertices over all ranges.
    pub fn vertex_count(&self) -> u32 {
        self.sub_meshes.iter().map(|s| s.vertex_count()).sum()
    }

    /// Total indices over all ranges.
    pub fn index_count(&self) -> u32 {
        self.sub_meshes.iter().map(|s| s.index_count()).sum()
    }
}

/// Whether the surfaces tile `[0, vertex_count)` and `[0, index_count)` in order.
pub fn surfaces_partition(surfaces: &[Surface], vertex_count: usize, index_count: usize) -> bool {
    let mut next_vertex = 0u32;
    let mut next_index = 0u32;
    for surface in surfaces {
        if surface.sub_meshes.is_empty() {
            return false;
        }
        for sub in &surface.sub_meshes {
            if sub.vertex_begin != next_vertex || sub.index_begin != next_index {
                return false;
            }
            if sub.vertex_end < sub.vertex_begin || sub.index_end < sub.index_begin {
                return false;
            }
            next_vertex = sub.vertex_end;
            next_index = sub.index_end;
        }
    }
    next_vertex as usize == vertex_count && next_index as usize == index_count
}
