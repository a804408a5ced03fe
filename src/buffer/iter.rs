//! Cursors over one channel of a buffer set.
//!
//! An iterator here is a cursor: it points at one element of one
//! `(semantic, semantic_index)` channel and is advanced by whole elements.
//! The untyped iterators read and write through the conversion engine, so
//! the same algorithm runs over any storage format. The typed iterators
//! check the format once at construction and then hand out plain values.
//!
//! Constructing an iterator over a missing channel gives a *null* iterator:
//! [`ptr`](UntypedMeshBufferIteratorConst::ptr) returns `None` and
//! [`format`](UntypedMeshBufferIteratorConst::format) returns
//! [`MeshBufferFormat::None`]. Reading through a null iterator panics.

use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Sub};

use bytemuck::Pod;
use nalgebra::{Vector2, Vector3, Vector4};

use super::convert::{
    read_component_f32, read_component_f64, read_component_u64, write_component_f32,
    write_component_f64, write_component_u64,
};
use super::format::{MeshBufferFormat, MeshBufferSemantic};
use super::set::MeshBufferSet;

/// Position and layout shared by all iterator flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelCursor {
    element_size: usize,
    /// Byte offset of the current element's channel in the buffer.
    offset: usize,
    format: MeshBufferFormat,
    components: usize,
    semantic_index: i32,
}

impl ChannelCursor {
    const NULL: ChannelCursor = ChannelCursor {
        element_size: 0,
        offset: 0,
        format: MeshBufferFormat::None,
        components: 0,
        semantic_index: 0,
    };

    fn locate(
        set: &MeshBufferSet,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
    ) -> Option<(usize, ChannelCursor)> {
        let (buffer, channel) = set.find_channel(semantic, semantic_index)?;
        let c = set.channel(buffer, channel);
        Some((
            buffer,
            ChannelCursor {
                element_size: set.element_size(buffer),
                offset: c.offset as usize,
                format: c.format,
                components: c.component_count as usize,
                semantic_index,
            },
        ))
    }

    #[inline]
    fn channel_size(&self) -> usize {
        self.format.size() * self.components
    }

    #[inline]
    fn is_null(&self) -> bool {
        self.format == MeshBufferFormat::None || self.element_size == 0
    }

    #[inline]
    fn advance(&mut self, elements: usize) {
        self.offset += elements * self.element_size;
    }

    #[inline]
    fn element(&self) -> usize {
        if self.element_size == 0 {
            0
        } else {
            self.offset / self.element_size
        }
    }

    fn slice<'d>(&self, data: &'d [u8]) -> Option<&'d [u8]> {
        if self.is_null() {
            return None;
        }
        data.get(self.offset..self.offset + self.channel_size())
    }

    fn slice_mut<'d>(&self, data: &'d mut [u8]) -> Option<&'d mut [u8]> {
        if self.is_null() {
            return None;
        }
        let size = self.channel_size();
        data.get_mut(self.offset..self.offset + size)
    }

    /// Element delta between two cursors, 0 when not a whole number of elements.
    fn delta(&self, other: &ChannelCursor) -> isize {
        if self.element_size != other.element_size || self.element_size == 0 {
            return 0;
        }
        let bytes = self.offset as isize - other.offset as isize;
        if bytes % self.element_size as isize != 0 {
            return 0;
        }
        bytes / self.element_size as isize
    }

    fn read_f32s<const N: usize>(&self, data: &[u8]) -> [f32; N] {
        let bytes = self
            .slice(data)
            .unwrap_or_else(|| panic!("read through a null or exhausted buffer iterator"));
        let mut out = [0.0f32; N];
        for (c, v) in out.iter_mut().enumerate().take(self.components) {
            *v = read_component_f32(bytes, self.format, c);
        }
        out
    }

    fn read_f64s<const N: usize>(&self, data: &[u8]) -> [f64; N] {
        let bytes = self
            .slice(data)
            .unwrap_or_else(|| panic!("read through a null or exhausted buffer iterator"));
        let mut out = [0.0f64; N];
        for (c, v) in out.iter_mut().enumerate().take(self.components) {
            *v = read_component_f64(bytes, self.format, c);
        }
        out
    }

    fn read_u64(&self, data: &[u8]) -> u64 {
        let bytes = self
            .slice(data)
            .unwrap_or_else(|| panic!("read through a null or exhausted buffer iterator"));
        read_component_u64(bytes, self.format, 0)
    }

    fn write_f32s(&self, data: &mut [u8], values: &[f32]) {
        let format = self.format;
        let components = self.components;
        let bytes = self
            .slice_mut(data)
            .unwrap_or_else(|| panic!("write through a null or exhausted buffer iterator"));
        for (c, &v) in values.iter().enumerate().take(components) {
            write_component_f32(bytes, format, c, v);
        }
    }

    fn write_f64s(&self, data: &mut [u8], values: &[f64]) {
        let format = self.format;
        let components = self.components;
        let bytes = self
            .slice_mut(data)
            .unwrap_or_else(|| panic!("write through a null or exhausted buffer iterator"));
        for (c, &v) in values.iter().enumerate().take(components) {
            write_component_f64(bytes, format, c, v);
        }
    }

    fn write_u64(&self, data: &mut [u8], value: u64) {
        let format = self.format;
        let bytes = self
            .slice_mut(data)
            .unwrap_or_else(|| panic!("write through a null or exhausted buffer iterator"));
        write_component_u64(bytes, format, 0, value);
    }
}

/// Read-only, format-erased cursor over one channel.
#[derive(Debug, Clone, Copy)]
pub struct UntypedMeshBufferIteratorConst<'a> {
    data: &'a [u8],
    cursor: ChannelCursor,
}

impl<'a> UntypedMeshBufferIteratorConst<'a> {
    /// Cursor at element 0 of the channel, or a null cursor if it is missing.
    pub fn new(set: &'a MeshBufferSet, semantic: MeshBufferSemantic, semantic_index: i32) -> Self {
        match ChannelCursor::locate(set, semantic, semantic_index) {
            Some((buffer, cursor)) => Self {
                data: set.buffer_data(buffer),
                cursor,
            },
            None => Self::null(),
        }
    }

    /// Cursor at element `element` of the channel.
    pub fn at(
        set: &'a MeshBufferSet,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
        element: usize,
    ) -> Self {
        let mut it = Self::new(set, semantic, semantic_index);
        it.cursor.advance(element);
        it
    }

    /// A cursor that points at nothing.
    pub fn null() -> Self {
        Self {
            data: &[],
            cursor: ChannelCursor::NULL,
        }
    }

    /// Bytes of the current element's channel, `None` for a null cursor.
    #[inline]
    pub fn ptr(&self) -> Option<&'a [u8]> {
        self.cursor.slice(self.data)
    }

    /// Storage format, [`MeshBufferFormat::None`] for a null cursor.
    #[inline]
    pub fn format(&self) -> MeshBufferFormat {
        self.cursor.format
    }

    /// Number of components of the channel.
    #[inline]
    pub fn components(&self) -> usize {
        self.cursor.components
    }

    /// Semantic index the cursor was created for.
    #[inline]
    pub fn semantic_index(&self) -> i32 {
        self.cursor.semantic_index
    }

    /// Stride of the underlying buffer.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.cursor.element_size
    }

    /// Current element index.
    #[inline]
    pub fn element(&self) -> usize {
        self.cursor.element()
    }

    /// Advance by one element.
    #[inline]
    pub fn inc(&mut self) {
        self.cursor.advance(1);
    }

    /// Read as a 2-component float vector. Missing components read as zero.
    pub fn get_as_vec2f(&self) -> Vector2<f32> {
        Vector2::from(self.cursor.read_f32s::<2>(self.data))
    }

    /// Read as a 3-component float vector.
    pub fn get_as_vec3f(&self) -> Vector3<f32> {
        Vector3::from(self.cursor.read_f32s::<3>(self.data))
    }

    /// Read as a 3-component double vector.
    pub fn get_as_vec3d(&self) -> Vector3<f64> {
        Vector3::from(self.cursor.read_f64s::<3>(self.data))
    }

    /// Read as a 4-component float vector.
    pub fn get_as_vec4f(&self) -> Vector4<f32> {
        Vector4::from(self.cursor.read_f32s::<4>(self.data))
    }

    /// Read component 0 as an unsigned integer.
    pub fn get_as_u32(&self) -> u32 {
        self.cursor.read_u64(self.data).min(u32::MAX as u64) as u32
    }

    /// Read component 0 as a 64-bit unsigned integer.
    pub fn get_as_u64(&self) -> u64 {
        self.cursor.read_u64(self.data)
    }

    /// Read one component as a float.
    pub fn get_component_f32(&self, component: usize) -> f32 {
        let bytes = self
            .ptr()
            .unwrap_or_else(|| panic!("read through a null or exhausted buffer iterator"));
        read_component_f32(bytes, self.cursor.format, component)
    }
}

impl AddAssign<usize> for UntypedMeshBufferIteratorConst<'_> {
    fn add_assign(&mut self, elements: usize) {
        self.cursor.advance(elements);
    }
}

impl Add<usize> for UntypedMeshBufferIteratorConst<'_> {
    type Output = Self;

    fn add(mut self, elements: usize) -> Self {
        self.cursor.advance(elements);
        self
    }
}

impl Sub for UntypedMeshBufferIteratorConst<'_> {
    type Output = isize;

    /// Element delta; 0 if strides differ or the byte delta is not a stride multiple.
    fn sub(self, other: Self) -> isize {
        self.cursor.delta(&other.cursor)
    }
}

/// Mutable, format-erased cursor over one channel.
#[derive(Debug)]
pub struct UntypedMeshBufferIterator<'a> {
    data: &'a mut [u8],
    cursor: ChannelCursor,
}

impl<'a> UntypedMeshBufferIterator<'a> {
    /// Cursor at element 0 of the channel, or a null cursor if it is missing.
    pub fn new(
        set: &'a mut MeshBufferSet,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
    ) -> Self {
        match ChannelCursor::locate(set, semantic, semantic_index) {
            Some((buffer, cursor)) => Self {
                data: set.buffer_data_mut(buffer),
                cursor,
            },
            None => Self {
                data: &mut [],
                cursor: ChannelCursor::NULL,
            },
        }
    }

    /// Cursor at element `element` of the channel.
    pub fn at(
        set: &'a mut MeshBufferSet,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
        element: usize,
    ) -> Self {
        let mut it = Self::new(set, semantic, semantic_index);
        it.cursor.advance(element);
        it
    }

    /// Bytes of the current element's channel.
    #[inline]
    pub fn ptr(&self) -> Option<&[u8]> {
        self.cursor.slice(&*self.data)
    }

    /// Mutable bytes of the current element's channel.
    #[inline]
    pub fn ptr_mut(&mut self) -> Option<&mut [u8]> {
        self.cursor.slice_mut(&mut *self.data)
    }

    /// Storage format, [`MeshBufferFormat::None`] for a null cursor.
    #[inline]
    pub fn format(&self) -> MeshBufferFormat {
        self.cursor.format
    }

    /// Number of components of the channel.
    #[inline]
    pub fn components(&self) -> usize {
        self.cursor.components
    }

    /// Current element index.
    #[inline]
    pub fn element(&self) -> usize {
        self.cursor.element()
    }

    /// Move to an absolute element.
    #[inline]
    pub fn seek(&mut self, element: usize) {
        let base = self.cursor.offset % self.cursor.element_size.max(1);
        self.cursor.offset = base;
        self.cursor.advance(element);
    }

    /// Advance by one element.
    #[inline]
    pub fn inc(&mut self) {
        self.cursor.advance(1);
    }

    /// Read-only view at the same position.
    pub fn as_const(&self) -> UntypedMeshBufferIteratorConst<'_> {
        UntypedMeshBufferIteratorConst {
            data: &*self.data,
            cursor: self.cursor,
        }
    }

    /// Read as a 3-component float vector.
    pub fn get_as_vec3f(&self) -> Vector3<f32> {
        Vector3::from(self.cursor.read_f32s::<3>(&*self.data))
    }

    /// Read as a 4-component float vector.
    pub fn get_as_vec4f(&self) -> Vector4<f32> {
        Vector4::from(self.cursor.read_f32s::<4>(&*self.data))
    }

    /// Read component 0 as a 64-bit unsigned integer.
    pub fn get_as_u64(&self) -> u64 {
        self.cursor.read_u64(&*self.data)
    }

    /// Write up to 3 components; extra channel components are left untouched.
    pub fn set_from_vec3f(&mut self, v: &Vector3<f32>) {
        self.cursor.write_f32s(&mut *self.data, v.as_slice());
    }

    /// Write up to 3 components from doubles.
    pub fn set_from_vec3d(&mut self, v: &Vector3<f64>) {
        self.cursor.write_f64s(&mut *self.data, v.as_slice());
    }

    /// Write up to 4 components.
    pub fn set_from_vec4f(&mut self, v: &Vector4<f32>) {
        self.cursor.write_f32s(&mut *self.data, v.as_slice());
    }

    /// Write up to 2 components.
    pub fn set_from_vec2f(&mut self, v: &Vector2<f32>) {
        self.cursor.write_f32s(&mut *self.data, v.as_slice());
    }

    /// Write component 0 as an integer.
    pub fn set_from_u32(&mut self, v: u32) {
        self.cursor.write_u64(&mut *self.data, v as u64);
    }

    /// Write component 0 as a 64-bit integer.
    pub fn set_from_u64(&mut self, v: u64) {
        self.cursor.write_u64(&mut *self.data, v);
    }

    /// Write one float component.
    pub fn set_component_f32(&mut self, component: usize, v: f32) {
        let format = self.cursor.format;
        let bytes = self
            .ptr_mut()
            .unwrap_or_else(|| panic!("write through a null or exhausted buffer iterator"));
        write_component_f32(bytes, format, component, v);
    }
}

impl AddAssign<usize> for UntypedMeshBufferIterator<'_> {
    fn add_assign(&mut self, elements: usize) {
        self.cursor.advance(elements);
    }
}

/// Whether a channel stores exactly `N` components of `T` in `format`.
fn typed_cursor<T: Pod, const N: usize>(
    set: &MeshBufferSet,
    format: MeshBufferFormat,
    semantic: MeshBufferSemantic,
    semantic_index: i32,
) -> Option<(usize, ChannelCursor)> {
    let (buffer, cursor) = ChannelCursor::locate(set, semantic, semantic_index)?;
    let matches = cursor.format == format
        && cursor.components == N
        && format.size() == std::mem::size_of::<T>();
    matches.then_some((buffer, cursor))
}

/// Read-only cursor over a channel of known format and component count.
#[derive(Debug, Clone, Copy)]
pub struct MeshBufferIteratorConst<'a, T: Pod, const N: usize> {
    data: &'a [u8],
    cursor: ChannelCursor,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod, const N: usize> MeshBufferIteratorConst<'a, T, N> {
    /// Cursor over the channel, null if it is missing or not `N` × `T` in `format`.
    pub fn new(
        set: &'a MeshBufferSet,
        format: MeshBufferFormat,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
    ) -> Self {
        match typed_cursor::<T, N>(set, format, semantic, semantic_index) {
            Some((buffer, cursor)) => Self {
                data: set.buffer_data(buffer),
                cursor,
                _marker: PhantomData,
            },
            None => Self {
                data: &[],
                cursor: ChannelCursor::NULL,
                _marker: PhantomData,
            },
        }
    }

    /// Bytes of the current element, `None` for a null cursor.
    #[inline]
    pub fn ptr(&self) -> Option<&'a [u8]> {
        self.cursor.slice(self.data)
    }

    /// Storage format.
    #[inline]
    pub fn format(&self) -> MeshBufferFormat {
        self.cursor.format
    }

    /// Current value, `None` for a null or exhausted cursor.
    pub fn get(&self) -> Option<[T; N]> {
        let bytes = self.ptr()?;
        let size = std::mem::size_of::<T>();
        Some(std::array::from_fn(|c| {
            bytemuck::pod_read_unaligned(&bytes[c * size..(c + 1) * size])
        }))
    }

    /// Advance by one element.
    #[inline]
    pub fn inc(&mut self) {
        self.cursor.advance(1);
    }
}

impl<T: Pod, const N: usize> AddAssign<usize> for MeshBufferIteratorConst<'_, T, N> {
    fn add_assign(&mut self, elements: usize) {
        self.cursor.advance(elements);
    }
}

impl<T: Pod, const N: usize> Add<usize> for MeshBufferIteratorConst<'_, T, N> {
    type Output = Self;

    fn add(mut self, elements: usize) -> Self {
        self.cursor.advance(elements);
        self
    }
}

impl<T: Pod, const N: usize> Sub for MeshBufferIteratorConst<'_, T, N> {
    type Output = isize;

    fn sub(self, other: Self) -> isize {
        self.cursor.delta(&other.cursor)
    }
}

/// Mutable cursor over a channel of known format and component count.
#[derive(Debug)]
pub struct MeshBufferIterator<'a, T: Pod, const N: usize> {
    data: &'a mut [u8],
    cursor: ChannelCursor,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod, const N: usize> MeshBufferIterator<'a, T, N> {
    /// Cursor over the channel, null if it is missing or not `N` × `T` in `format`.
    pub fn new(
        set: &'a mut MeshBufferSet,
        format: MeshBufferFormat,
        semantic: MeshBufferSemantic,
        semantic_index: i32,
    ) -> Self {
        match typed_cursor::<T, N>(set, format, semantic, semantic_index) {
            Some((buffer, cursor)) => Self {
                data: set.buffer_data_mut(buffer),
                cursor,
                _marker: PhantomData,
            },
            None => Self {
                data: &mut [],
                cursor: ChannelCursor::NULL,
                _marker: PhantomData,
            },
        }
    }

    /// Bytes of the current element, `None` for a null cursor.
    #[inline]
    pub fn ptr(&self) -> Option<&[u8]> {
        self.cursor.slice(&*self.data)
    }

    /// Current value, `None` for a null or exhausted cursor.
    pub fn get(&self) -> Option<[T; N]> {
        let bytes = self.ptr()?;
        let size = std::mem::size_of::<T>();
        Some(std::array::from_fn(|c| {
            bytemuck::pod_read_unaligned(&bytes[c * size..(c + 1) * size])
        }))
    }

    /// Overwrite the current value.
    ///
    /// # Panics
    /// Panics on a null or exhausted cursor.
    pub fn set(&mut self, value: [T; N]) {
        let size = std::mem::size_of::<T>();
        let bytes = self
            .cursor
            .slice_mut(&mut *self.data)
            .unwrap_or_else(|| panic!("write through a null or exhausted buffer iterator"));
        for (c, v) in value.iter().enumerate() {
            bytes[c * size..(c + 1) * size].copy_from_slice(bytemuck::bytes_of(v));
        }
    }

    /// Advance by one element.
    #[inline]
    pub fn inc(&mut self) {
        self.cursor.advance(1);
    }
}

impl<T: Pod, const N: usize> AddAssign<usize> for MeshBufferIterator<'_, T, N> {
    fn add_assign(&mut self, elements: usize) {
        self.cursor.advance(elements);
    }
}

/// Read a whole channel as float 3-vectors, `None` if it is missing.
pub fn read_channel_vec3f(
    set: &MeshBufferSet,
    semantic: MeshBufferSemantic,
    semantic_index: i32,
) -> Option<Vec<Vector3<f32>>> {
    let mut it = UntypedMeshBufferIteratorConst::new(set, semantic, semantic_index);
    it.ptr()?;
    let mut out = Vec::with_capacity(set.element_count());
    for _ in 0..set.element_count() {
        out.push(it.get_as_vec3f());
        it.inc();
    }
    Some(out)
}

/// Read a whole channel as float 4-vectors, `None` if it is missing.
pub fn read_channel_vec4f(
    set: &MeshBufferSet,
    semantic: MeshBufferSemantic,
    semantic_index: i32,
) -> Option<Vec<Vector4<f32>>> {
    let mut it = UntypedMeshBufferIteratorConst::new(set, semantic, semantic_index);
    it.ptr()?;
    let mut out = Vec::with_capacity(set.element_count());
    for _ in 0..set.element_count() {
        out.push(it.get_as_vec4f());
        it.inc();
    }
    Some(out)
}

/// Read a whole channel as float 2-vectors, `None` if it is missing.
pub fn read_channel_vec2f(
    set: &MeshBufferSet,
    semantic: MeshBufferSemantic,
    semantic_index: i32,
) -> Option<Vec<Vector2<f32>>> {
    let mut it = UntypedMeshBufferIteratorConst::new(set, semantic, semantic_index);
    it.ptr()?;
    let mut out = Vec::with_capacity(set.element_count());
    for _ in 0..set.element_count() {
        out.push(it.get_as_vec2f());
        it.inc();
    }
    Some(out)
}

/// Read component 0 of a whole channel as integers, `None` if it is missing.
pub fn read_channel_u64(
    set: &MeshBufferSet,
    semantic: MeshBufferSemantic,
    semantic_index: i32,
) -> Option<Vec<u64>> {
    let mut it = UntypedMeshBufferIteratorConst::new(set, semantic, semantic_index);
    it.ptr()?;
    let mut out = Vec::with_capacity(set.element_count());
    for _ in 0..set.element_count() {
        out.push(it.get_as_u64());
        it.inc();
    }
    Some(out)
}

/// Overwrite a whole channel from float 3-vectors. Returns `false` if it is missing.
pub fn write_channel_vec3f(
    set: &mut MeshBufferSet,
    semantic: MeshBufferSemantic,
    semantic_index: i32,
    values: &[Vector3<f32>],
) -> bool {
    let count = set.element_count();
    let mut it = UntypedMeshBufferIterator::new(set, semantic, semantic_index);
    if it.ptr().is_none() {
        return false;
    }
    debug_assert_eq!(values.len(), count);
    for v in values.iter().take(count) {
        it.set_from_vec3f(v);
        it.inc();
    }
    true
}
