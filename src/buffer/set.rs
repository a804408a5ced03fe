//! Mesh buffer sets.
//!
//! A [`MeshBufferSet`] is an ordered list of [`MeshBuffer`]s that all hold the
//! same number of elements. Each buffer is a contiguous byte blob of
//! fixed-stride elements, described by its [`MeshBufferChannel`]s.

use bit_vec::BitVec;
use rustc_hash::FxHashMap;

use super::format::{MeshBufferFormat, MeshBufferSemantic};

/// Description of one semantic field inside a buffer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshBufferChannel {
    /// What the values mean.
    pub semantic: MeshBufferSemantic,
    /// Disambiguates channels with the same semantic (UV sets, etc.).
    pub semantic_index: i32,
    /// Storage format of each component.
    pub format: MeshBufferFormat,
    /// Number of components.
    pub component_count: u16,
    /// Byte offset of the channel inside the element.
    pub offset: u16,
}

impl MeshBufferChannel {
    /// Create a channel description.
    pub fn new(
        semantic: MeshBufferSemantic,
        semantic_index: i32,
        format: MeshBufferFormat,
        component_count: u16,
        offset: u16,
    ) -> Self {
        Self {
            semantic,
            semantic_index,
            format,
            component_count,
            offset,
        }
    }

    /// Size of the channel in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.format.size() * self.component_count as usize
    }

    /// One past the last byte of the channel inside the element.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset as usize + self.size()
    }
}

/// A contiguous array of fixed-stride elements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshBuffer {
    /// Channels of each element, in declaration order.
    pub channels: Vec<MeshBufferChannel>,
    /// Stride of one element in bytes.
    pub element_size: u32,
    /// Raw element data, `element_count * element_size` bytes.
    pub data: Vec<u8>,
}

impl MeshBuffer {
    /// Whether both buffers describe the same element layout.
    pub fn has_same_format(&self, other: &MeshBuffer) -> bool {
        self.element_size == other.element_size && self.channels == other.channels
    }

    /// Whether some bytes of the element belong to no channel.
    pub fn has_padding(&self) -> bool {
        let used: usize = self.channels.iter().map(|c| c.size()).sum();
        used < self.element_size as usize
    }
}

/// Panic if channel descriptors overlap or exceed the element stride.
fn validate_channels(element_size: u32, channels: &[MeshBufferChannel]) {
    for (i, a) in channels.iter().enumerate() {
        assert!(
            a.end() <= element_size as usize,
            "channel {:?}[{}] ends at byte {} past element size {}",
            a.semantic,
            a.semantic_index,
            a.end(),
            element_size
        );
        for b in &channels[i + 1..] {
            let disjoint = a.end() <= b.offset as usize || b.end() <= a.offset as usize;
            assert!(
                disjoint || a.size() == 0 || b.size() == 0,
                "channels {:?} and {:?} overlap",
                a.semantic,
                b.semantic
            );
        }
    }
}

/// An ordered set of buffers sharing one element count.
#[derive(Debug, Clone, Default)]
pub struct MeshBufferSet {
    element_count: u32,
    buffers: Vec<MeshBuffer>,
    /// First-match lookup of `(semantic, index)` to `(buffer, channel)`.
    channel_lookup: FxHashMap<(MeshBufferSemantic, i32), (usize, usize)>,
}

impl PartialEq for MeshBufferSet {
    fn eq(&self, other: &Self) -> bool {
        self.element_count == other.element_count && self.buffers == other.buffers
    }
}

impl MeshBufferSet {
    /// Create an empty buffer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements in every buffer.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.element_count as usize
    }

    /// Resize every buffer to hold `count` elements. New bytes are zeroed.
    pub fn set_element_count(&mut self, count: usize) {
        assert!(count <= u32::MAX as usize, "element count {count} exceeds u32");
        self.element_count = count as u32;
        for buffer in &mut self.buffers {
            buffer.data.resize(count * buffer.element_size as usize, 0);
        }
    }

    /// Number of buffers.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Grow or shrink the buffer list. New buffers are empty.
    pub fn set_buffer_count(&mut self, count: usize) {
        self.buffers.resize_with(count, MeshBuffer::default);
        self.reset_buffer_indices();
    }

    /// Describe buffer `index` from parallel channel arrays.
    ///
    /// # Panics
    /// Panics if the arrays disagree in length or the channels overlap.
    #[allow(clippy::too_many_arguments)]
    pub fn set_buffer(
        &mut self,
        index: usize,
        element_size: u32,
        semantics: &[MeshBufferSemantic],
        semantic_indices: &[i32],
        formats: &[MeshBufferFormat],
        component_counts: &[u16],
        offsets: &[u16],
    ) {
        let n = semantics.len();
        assert!(
            semantic_indices.len() == n
                && formats.len() == n
                && component_counts.len() == n
                && offsets.len() == n,
            "set_buffer channel arrays have mismatched lengths"
        );

        let channels = (0..n)
            .map(|i| {
                MeshBufferChannel::new(
                    semantics[i],
                    semantic_indices[i],
                    formats[i],
                    component_counts[i],
                    offsets[i],
                )
            })
            .collect();
        self.set_buffer_channels(index, element_size, channels);
    }

    /// Describe buffer `index` from channel descriptors.
    pub fn set_buffer_channels(
        &mut self,
        index: usize,
        element_size: u32,
        channels: Vec<MeshBufferChannel>,
    ) {
        validate_channels(element_size, &channels);
        let buffer = &mut self.buffers[index];
        buffer.channels = channels;
        buffer.element_size = element_size;
        buffer.data.clear();
        buffer
            .data
            .resize(self.element_count as usize * element_size as usize, 0);
        self.reset_buffer_indices();
    }

    /// Append a buffer laid out back to back from the given channels.
    ///
    /// Offsets in `channels` are ignored and recomputed. Returns the index
    /// of the new buffer.
    pub fn push_packed_buffer(&mut self, channels: &[MeshBufferChannel]) -> usize {
        let mut offset = 0u16;
        let packed: Vec<MeshBufferChannel> = channels
            .iter()
            .map(|c| {
                let mut c = *c;
                c.offset = offset;
                offset += c.size() as u16;
                c
            })
            .collect();
        let index = self.buffers.len();
        self.buffers.push(MeshBuffer::default());
        self.set_buffer_channels(index, offset as u32, packed);
        index
    }

    /// Append a copy of buffer `buffer` of `other`.
    ///
    /// # Panics
    /// Panics if the element counts differ.
    pub fn add_buffer(&mut self, other: &MeshBufferSet, buffer: usize) {
        assert_eq!(
            self.element_count, other.element_count,
            "add_buffer between sets with different element counts"
        );
        self.buffers.push(other.buffers[buffer].clone());
        self.reset_buffer_indices();
    }

    /// Append an already-filled buffer.
    pub fn push_buffer(&mut self, buffer: MeshBuffer) {
        assert_eq!(
            buffer.data.len(),
            self.element_count as usize * buffer.element_size as usize,
            "buffer data does not match the set element count"
        );
        validate_channels(buffer.element_size, &buffer.channels);
        self.buffers.push(buffer);
        self.reset_buffer_indices();
    }

    /// Remove buffer `index`.
    pub fn remove_buffer(&mut self, index: usize) -> MeshBuffer {
        let removed = self.buffers.remove(index);
        self.reset_buffer_indices();
        removed
    }

    /// Drop one channel, repacking the remaining channels of its buffer.
    ///
    /// A buffer left without channels is removed. Returns `false` if the
    /// channel does not exist.
    pub fn remove_channel(&mut self, semantic: MeshBufferSemantic, semantic_index: i32) -> bool {
        let Some((b, c)) = self.find_channel(semantic, semantic_index) else {
            return false;
        };
        if self.buffers[b].channels.len() == 1 {
            self.remove_buffer(b);
            return true;
        }

        let old = &self.buffers[b];
        let old_size = old.element_size as usize;
        let mut kept: Vec<MeshBufferChannel> = old.channels.clone();
        kept.remove(c);
        let mut offset = 0u16;
        let packed: Vec<MeshBufferChannel> = kept
            .iter()
            .map(|ch| {
                let mut ch = *ch;
                ch.offset = offset;
                offset += ch.size() as u16;
                ch
            })
            .collect();

        let new_size = offset as usize;
        let mut data = vec![0u8; self.element_count() * new_size];
        for e in 0..self.element_count() {
            for (from, to) in kept.iter().zip(&packed) {
                let src = e * old_size + from.offset as usize;
                let dst = e * new_size + to.offset as usize;
                data[dst..dst + to.size()].copy_from_slice(&old.data[src..src + from.size()]);
            }
        }

        self.buffers[b] = MeshBuffer {
            channels: packed,
            element_size: new_size as u32,
            data,
        };
        self.reset_buffer_indices();
        true
    }

    /// Rebuild the cached channel lookup.
    ///
    /// Only affects lookup speed; results of [`find_channel`](Self::find_channel)
    /// are identical with or without the cache.
    pub fn reset_buffer_indices(&mut self) {
        self.channel_lookup.clear();
        for (b, buffer) in self.buffers.iter().enumerate() {
            for (c, channel) in buffer.channels.iter().enumerate() {
                self.channel_lookup
                    .entry((channel.semantic, channel.semantic_index))
                    .or_insert((b, c));
            }
        }
    }

    /// All buffers.
    #[inline]
    pub fn buffers(&self) -> &[MeshBuffer] {
        &self.buffers
    }

    /// Number of channels of buffer `buffer`.
    #[inline]
    pub fn channel_count(&self, buffer: usize) -> usize {
        self.buffers[buffer].channels.len()
    }

    /// Channel `channel` of buffer `buffer`.
    #[inline]
    pub fn channel(&self, buffer: usize, channel: usize) -> &MeshBufferChannel {
        &self.buffers[buffer].channels[channel]
    }

    /// Element stride of buffer `buffer`.
    #[inline]
    pub fn element_size(&self, buffer: usize) -> usize {
        self.buffers[buffer].element_size as usize
    }

    /// Raw bytes of buffer `buffer`.
    #[inline]
    pub fn buffer_data(&self, buffer: usize) -> &[u8] {
        &self.buffers[buffer].data
    }

    /// Mutable raw bytes of buffer `buffer`.
    #[inline]
    pub fn buffer_data_mut(&mut self, buffer: usize) -> &mut [u8] {
        &mut self.buffers[buffer].data
    }

    /// First `(buffer, channel)` with the given semantic and index.
    pub fn find_channel(
        &self,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
    ) -> Option<(usize, usize)> {
        if let Some(&found) = self.channel_lookup.get(&(semantic, semantic_index)) {
            return Some(found);
        }
        // The lookup is rebuilt on every structural change, so a miss here
        // only happens for sets built without it (e.g. through `Default`).
        self.buffers.iter().enumerate().find_map(|(b, buffer)| {
            buffer
                .channels
                .iter()
                .position(|c| c.semantic == semantic && c.semantic_index == semantic_index)
                .map(|c| (b, c))
        })
    }

    /// [`find_channel`](Self::find_channel) with the `(-1, -1)` not-found sentinel.
    pub fn find_channel_raw(&self, semantic: MeshBufferSemantic, semantic_index: i32) -> (i32, i32) {
        self.find_channel(semantic, semantic_index)
            .map(|(b, c)| (b as i32, c as i32))
            .unwrap_or((-1, -1))
    }

    /// Whether the set has a channel with this semantic and index.
    #[inline]
    pub fn has_channel(&self, semantic: MeshBufferSemantic, semantic_index: i32) -> bool {
        self.find_channel(semantic, semantic_index).is_some()
    }

    /// Bytes of one channel of one element.
    pub fn channel_bytes(&self, buffer: usize, channel: usize, element: usize) -> &[u8] {
        let b = &self.buffers[buffer];
        let c = &b.channels[channel];
        let start = element * b.element_size as usize + c.offset as usize;
        &b.data[start..start + c.size()]
    }

    /// Mutable bytes of one channel of one element.
    pub fn channel_bytes_mut(&mut self, buffer: usize, channel: usize, element: usize) -> &mut [u8] {
        let b = &mut self.buffers[buffer];
        let c = b.channels[channel];
        let start = element * b.element_size as usize + c.offset as usize;
        &mut b.data[start..start + c.size()]
    }

    /// Total allocated bytes of all buffers.
    pub fn data_size(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len()).sum()
    }

    /// Whether both sets have the same buffers with the same layouts.
    pub fn has_same_format(&self, other: &MeshBufferSet) -> bool {
        self.buffers.len() == other.buffers.len()
            && self
                .buffers
                .iter()
                .zip(&other.buffers)
                .all(|(a, b)| a.has_same_format(b))
    }

    /// Content equality tolerant of buffer order, channel order and padding.
    pub fn is_similar_robust(&self, other: &MeshBufferSet) -> bool {
        if self.element_count != other.element_count {
            return false;
        }

        let count_channels =
            |set: &MeshBufferSet| set.buffers.iter().map(|b| b.channels.len()).sum::<usize>();
        if count_channels(self) != count_channels(other) {
            return false;
        }

        for (b, buffer) in self.buffers.iter().enumerate() {
            for (c, channel) in buffer.channels.iter().enumerate() {
                let Some((ob, oc)) = other.find_channel(channel.semantic, channel.semantic_index)
                else {
                    return false;
                };
                let other_channel = other.channel(ob, oc);
                if other_channel.format != channel.format
                    || other_channel.component_count != channel.component_count
                {
                    return false;
                }
                for e in 0..self.element_count() {
                    if self.channel_bytes(b, c, e) != other.channel_bytes(ob, oc, e) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Copy element `src` of this set into element `dst` of `target`.
    ///
    /// # Panics
    /// Panics unless both sets share the same format.
    pub fn copy_element_to(&self, src: usize, target: &mut MeshBufferSet, dst: usize) {
        debug_assert!(self.has_same_format(target));
        for (from, to) in self.buffers.iter().zip(target.buffers.iter_mut()) {
            let size = from.element_size as usize;
            to.data[dst * size..(dst + 1) * size]
                .copy_from_slice(&from.data[src * size..(src + 1) * size]);
        }
    }

    /// Keep only the elements whose bit is set, preserving order.
    ///
    /// Runs of kept elements are moved in bulk. Returns the new element count.
    pub fn compact_elements(&mut self, keep: &BitVec) -> usize {
        let count = self.element_count();
        debug_assert_eq!(keep.len(), count);

        let runs = kept_runs(keep);
        let kept: usize = runs.iter().map(|r| r.1 - r.0).sum();

        for buffer in &mut self.buffers {
            let size = buffer.element_size as usize;
            let mut write = 0usize;
            for &(start, end) in &runs {
                if start != write {
                    buffer.data.copy_within(start * size..end * size, write * size);
                }
                write += end - start;
            }
            buffer.data.truncate(kept * size);
        }
        self.element_count = kept as u32;
        kept
    }
}

/// Half-open `[start, end)` runs of set bits.
pub(crate) fn kept_runs(keep: &BitVec) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, bit) in keep.iter().enumerate() {
        match (bit, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, keep.len()));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use MeshBufferFormat as F;
    use MeshBufferSemantic as S;

    fn position_uv_set(count: usize) -> MeshBufferSet {
        let mut set = MeshBufferSet::new();
        set.set_element_count(count);
        set.set_buffer_count(2);
        set.set_buffer(0, 12, &[S::Position], &[0], &[F::Float32], &[3], &[0]);
        set.set_buffer(1, 8, &[S::TexCoords], &[0], &[F::Float32], &[2], &[0]);
        set
    }

    #[test]
    fn test_find_channel() {
        let set = position_uv_set(4);
        assert_eq!(set.find_channel(S::Position, 0), Some((0, 0)));
        assert_eq!(set.find_channel(S::TexCoords, 0), Some((1, 0)));
        assert_eq!(set.find_channel(S::TexCoords, 1), None);
        assert_eq!(set.find_channel_raw(S::Normal, 0), (-1, -1));
        assert_eq!(set.data_size(), 4 * 12 + 4 * 8);
    }

    #[test]
    fn test_find_channel_first_match() {
        let mut set = MeshBufferSet::new();
        set.set_element_count(1);
        set.set_buffer_count(2);
        set.set_buffer(0, 4, &[S::Other], &[0], &[F::UInt32], &[1], &[0]);
        set.set_buffer(1, 4, &[S::Other], &[0], &[F::Float32], &[1], &[0]);
        assert_eq!(set.find_channel(S::Other, 0), Some((0, 0)));
    }

    #[test]
    #[should_panic(expected = "mismatched lengths")]
    fn test_set_buffer_mismatched_arrays() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_buffer(0, 12, &[S::Position], &[0, 1], &[F::Float32], &[3], &[0]);
    }

    #[test]
    #[should_panic(expected = "overlap")]
    fn test_set_buffer_overlapping_channels() {
        let mut set = MeshBufferSet::new();
        set.set_buffer_count(1);
        set.set_buffer(
            0,
            16,
            &[S::Position, S::Normal],
            &[0, 0],
            &[F::Float32, F::Float32],
            &[3, 1],
            &[0, 8],
        );
    }

    #[test]
    fn test_compact_elements() {
        let mut set = MeshBufferSet::new();
        set.set_element_count(5);
        set.set_buffer_count(1);
        set.set_buffer(0, 1, &[S::Other], &[0], &[F::UInt8], &[1], &[0]);
        set.buffer_data_mut(0).copy_from_slice(&[10, 11, 12, 13, 14]);

        let keep = BitVec::from_fn(5, |i| i != 1 && i != 2);
        assert_eq!(set.compact_elements(&keep), 3);
        assert_eq!(set.buffer_data(0), &[10, 13, 14]);
        assert_eq!(set.element_count(), 3);
    }

    #[test]
    fn test_is_similar_robust_ignores_buffer_order() {
        let mut a = position_uv_set(2);
        a.buffer_data_mut(0)[0] = 7;
        a.buffer_data_mut(1)[4] = 9;

        let mut b = MeshBufferSet::new();
        b.set_element_count(2);
        b.set_buffer_count(2);
        b.set_buffer(0, 8, &[S::TexCoords], &[0], &[F::Float32], &[2], &[0]);
        b.set_buffer(1, 16, &[S::Position], &[0], &[F::Float32], &[3], &[4]);
        b.buffer_data_mut(0)[4] = 9;
        b.buffer_data_mut(1)[4] = 7;

        assert!(a.is_similar_robust(&b));
        assert!(!a.has_same_format(&b));

        b.buffer_data_mut(0)[4] = 8;
        assert!(!a.is_similar_robust(&b));
    }

    #[test]
    fn test_kept_runs() {
        let keep = BitVec::from_fn(7, |i| matches!(i, 0 | 1 | 3 | 5 | 6));
        assert_eq!(kept_runs(&keep), vec![(0, 2), (3, 4), (5, 7)]);
    }

    #[test]
    fn test_remove_channel_repacks() {
        let mut set = MeshBufferSet::new();
        set.set_element_count(2);
        set.push_packed_buffer(&[
            MeshBufferChannel::new(S::Position, 0, F::UInt8, 1, 0),
            MeshBufferChannel::new(S::VertexIndex, 0, F::UInt8, 1, 0),
            MeshBufferChannel::new(S::Color, 0, F::UInt8, 1, 0),
        ]);
        set.buffer_data_mut(0).copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        assert!(set.remove_channel(S::VertexIndex, 0));
        assert_eq!(set.element_size(0), 2);
        assert_eq!(set.buffer_data(0), &[1, 3, 4, 6]);
        assert_eq!(set.find_channel(S::Color, 0), Some((0, 1)));
        assert!(!set.remove_channel(S::VertexIndex, 0));

        assert!(set.remove_channel(S::Position, 0));
        assert!(set.remove_channel(S::Color, 0));
        assert_eq!(set.buffer_count(), 0);
    }
}
