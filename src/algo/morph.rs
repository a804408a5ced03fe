//! Morph target application.
//!
//! A morph target is a sparse mesh: it lists the ids of the vertices it
//! moves and one delta per channel for each of them. Targets are matched to
//! the base mesh by vertex id, never by index, so a target keeps working
//! after vertices were removed from the base.
//!
//! Deltas of position-like channels are added. Deltas of direction channels
//! (normal, tangent, binormal) are added and the result renormalized, only
//! touching the three direction components so a packed tangent sign survives.

use nalgebra::{Vector3, Vector4};
use rustc_hash::FxHashMap;

use crate::buffer::convert::{read_component_f32, write_component_f32};
use crate::buffer::{
    MeshBufferFormat, MeshBufferIterator, MeshBufferIteratorConst, MeshBufferSemantic, MeshBufferSet,
    UntypedMeshBufferIterator, UntypedMeshBufferIteratorConst,
};
use crate::error::{MeshError, Result};
use crate::mesh::{vertex_ids, Mesh};

/// Dense vertex-index tables keyed by the 32-bit id prefix.
///
/// For each prefix the table covers the range of local ids between the
/// smallest and the largest id seen, so lookups are one hash probe and one
/// array access.
#[derive(Debug, Clone, Default)]
pub struct SparseIndexMapSet {
    maps: FxHashMap<u32, SparseIndexMap>,
}

#[derive(Debug, Clone)]
struct SparseIndexMap {
    min: u32,
    indices: Vec<u32>,
}

impl SparseIndexMapSet {
    /// Value stored for ids that are not in the set.
    pub const NOT_FOUND: u32 = u32::MAX;

    /// Map every id of `ids` to its position in the slice.
    pub fn new(ids: &[u64]) -> Self {
        let mut ranges: FxHashMap<u32, (u32, u32)> = FxHashMap::default();
        for &id in ids {
            let (prefix, local) = split_id(id);
            let range = ranges.entry(prefix).or_insert((local, local));
            range.0 = range.0.min(local);
            range.1 = range.1.max(local);
        }

        let mut maps: FxHashMap<u32, SparseIndexMap> = ranges
            .into_iter()
            .map(|(prefix, (min, max))| {
                let len = (max - min) as usize + 1;
                (
                    prefix,
                    SparseIndexMap {
                        min,
                        indices: vec![Self::NOT_FOUND; len],
                    },
                )
            })
            .collect();

        for (i, &id) in ids.iter().enumerate() {
            let (prefix, local) = split_id(id);
            if let Some(map) = maps.get_mut(&prefix) {
                let slot = &mut map.indices[(local - map.min) as usize];
                // First occurrence wins for duplicated ids.
                if *slot == Self::NOT_FOUND {
                    *slot = i as u32;
                }
            }
        }
        Self { maps }
    }

    /// Index of `id`, or `None` if it is not in the set.
    #[inline]
    pub fn find(&self, id: u64) -> Option<u32> {
        let (prefix, local) = split_id(id);
        let map = self.maps.get(&prefix)?;
        let offset = local.checked_sub(map.min)? as usize;
        match map.indices.get(offset) {
            Some(&i) if i != Self::NOT_FOUND => Some(i),
            _ => None,
        }
    }

    /// Number of distinct prefixes.
    pub fn prefix_count(&self) -> usize {
        self.maps.len()
    }
}

#[inline]
fn split_id(id: u64) -> (u32, u32) {
    ((id >> 32) as u32, id as u32)
}

/// Channels a morph target can move.
fn morph_channels(target: &MeshBufferSet) -> Vec<(MeshBufferSemantic, i32)> {
    target
        .buffers()
        .iter()
        .flat_map(|b| b.channels.iter())
        .filter(|c| c.semantic.is_geometric())
        .map(|c| (c.semantic, c.semantic_index))
        .collect()
}

/// Blend up to two morph targets into `base`, in place.
///
/// `min` is applied with weight `1 - factor` and `max` with weight
/// `factor`. Target vertices whose id is not in `base` are skipped, as are
/// target channels `base` does not have.
///
/// Returns [`MeshError::EmptyMesh`] for a base without vertices and
/// [`MeshError::NoChange`] when no target is given.
pub fn morph2(base: &mut Mesh, min: Option<&Mesh>, max: Option<&Mesh>, factor: f32) -> Result<()> {
    if base.vertex_count() == 0 {
        return Err(MeshError::EmptyMesh);
    }
    if min.is_none() && max.is_none() {
        return Err(MeshError::NoChange);
    }

    let index_map = SparseIndexMapSet::new(&vertex_ids(base));
    for (target, weight) in [(min, 1.0 - factor), (max, factor)] {
        let Some(target) = target else { continue };
        if weight == 0.0 || target.vertex_count() == 0 {
            continue;
        }
        apply_target(base, target, weight, &index_map);
    }
    Ok(())
}

/// Blend one morph target into `base` with weight `factor`.
pub fn morph(base: &mut Mesh, target: &Mesh, factor: f32) -> Result<()> {
    morph2(base, None, Some(target), factor)
}

/// Runs `(target_start, base_start, len)` of consecutive matched vertices.
fn matched_runs(target: &Mesh, index_map: &SparseIndexMapSet) -> Vec<(usize, usize, usize)> {
    let mut runs: Vec<(usize, usize, usize)> = Vec::new();
    for (t, id) in vertex_ids(target).into_iter().enumerate() {
        let Some(b) = index_map.find(id) else { continue };
        let b = b as usize;
        match runs.last_mut() {
            Some(run) if run.0 + run.2 == t && run.1 + run.2 == b => run.2 += 1,
            _ => runs.push((t, b, 1)),
        }
    }
    runs
}

fn apply_target(base: &mut Mesh, target: &Mesh, weight: f32, index_map: &SparseIndexMapSet) {
    let runs = matched_runs(target, index_map);
    if runs.is_empty() {
        log::debug!("morph target shares no vertex with the base mesh");
        return;
    }

    for (semantic, index) in morph_channels(&target.vertex_buffers) {
        let Some((b, c)) = base.vertex_buffers.find_channel(semantic, index) else {
            continue;
        };
        let base_format = base.vertex_buffers.channel(b, c).format;
        let delta_format = {
            let it = UntypedMeshBufferIteratorConst::new(&target.vertex_buffers, semantic, index);
            it.format()
        };

        if semantic.is_direction() {
            if base_format.is_packed_dir()
                && base_format.has_tangent_sign()
                && delta_format == MeshBufferFormat::Float32
            {
                blend_signed_directions(base, target, semantic, index, base_format, weight, &runs);
            } else {
                blend_directions(base, target, semantic, index, weight, &runs);
            }
        } else {
            blend_values(base, target, semantic, index, weight, &runs);
        }
    }
}

/// Packed 8-bit direction with tangent sign: decode the three direction
/// bytes, blend in float and write them back, leaving the sign byte as it
/// was. Other packed directions go through [`blend_directions`].
fn blend_signed_directions(
    base: &mut Mesh,
    target: &Mesh,
    semantic: MeshBufferSemantic,
    index: i32,
    format: MeshBufferFormat,
    weight: f32,
    runs: &[(usize, usize, usize)],
) {
    let typed =
        MeshBufferIteratorConst::<u8, 4>::new(&base.vertex_buffers, format, semantic, index);
    if typed.ptr().is_none() {
        blend_directions(base, target, semantic, index, weight, runs);
        return;
    }
    let src = UntypedMeshBufferIteratorConst::new(&target.vertex_buffers, semantic, index);

    for &(t, b, len) in runs {
        let mut dst =
            MeshBufferIterator::<u8, 4>::new(&mut base.vertex_buffers, format, semantic, index);
        dst += b;
        let mut delta = src + t;
        for _ in 0..len {
            if let Some(mut bytes) = dst.get() {
                let current = Vector3::new(
                    read_component_f32(&bytes, format, 0),
                    read_component_f32(&bytes, format, 1),
                    read_component_f32(&bytes, format, 2),
                );
                let blended = (current + delta.get_as_vec3f() * weight)
                    .try_normalize(1e-12)
                    .unwrap_or(current);
                for k in 0..3 {
                    write_component_f32(&mut bytes, format, k, blended[k]);
                }
                dst.set(bytes);
            }
            dst.inc();
            delta.inc();
        }
    }
}

fn blend_directions(
    base: &mut Mesh,
    target: &Mesh,
    semantic: MeshBufferSemantic,
    index: i32,
    weight: f32,
    runs: &[(usize, usize, usize)],
) {
    let mut dst = UntypedMeshBufferIterator::new(&mut base.vertex_buffers, semantic, index);
    let src = UntypedMeshBufferIteratorConst::new(&target.vertex_buffers, semantic, index);
    for &(t, b, len) in runs {
        dst.seek(b);
        let mut delta = src + t;
        for _ in 0..len {
            let current = dst.get_as_vec3f();
            let blended = (current + delta.get_as_vec3f() * weight)
                .try_normalize(1e-12)
                .unwrap_or(current);
            for k in 0..3 {
                dst.set_component_f32(k, blended[k]);
            }
            dst.inc();
            delta.inc();
        }
    }
}

fn blend_values(
    base: &mut Mesh,
    target: &Mesh,
    semantic: MeshBufferSemantic,
    index: i32,
    weight: f32,
    runs: &[(usize, usize, usize)],
) {
    let mut dst = UntypedMeshBufferIterator::new(&mut base.vertex_buffers, semantic, index);
    let src = UntypedMeshBufferIteratorConst::new(&target.vertex_buffers, semantic, index);
    let components = dst.components().min(src.components());
    for &(t, b, len) in runs {
        dst.seek(b);
        let mut delta = src + t;
        for _ in 0..len {
            let current = dst.get_as_vec4f();
            let d = delta.get_as_vec4f();
            let mut blended = current;
            for k in 0..components.min(4) {
                blended[k] += d[k] * weight;
            }
            set_vec4_components(&mut dst, &blended, components);
            dst.inc();
            delta.inc();
        }
    }
}

fn set_vec4_components(it: &mut UntypedMeshBufferIterator<'_>, v: &Vector4<f32>, components: usize) {
    for k in 0..components.min(4) {
        it.set_component_f32(k, v[k]);
    }
}
