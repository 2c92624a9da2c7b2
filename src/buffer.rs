// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reference-counted Buffer/Memory, the unit of dataflow between filters.
//!
//! A [`Buffer`] owns one [`Memory`] region plus per-sample metadata. It is
//! cheap to clone (an `Arc` bump) and is never mutated after
//! being handed to a downstream port — a producer that wants to keep
//! writing allocates a fresh one.

use std::sync::Arc;

use crate::meta::TypedMeta;

/// "Unknown" sentinel for `pts`/`dts`, spelled out as a function so call
/// sites read `Buffer::pts_unknown()` rather than a bare magic number.
pub const TIMESTAMP_UNKNOWN: i64 = i64::MIN;

/// End-of-stream flag for [`Buffer::flags`].
pub const FLAG_EOS: u32 = 1 << 0;

/// A contiguous byte range with a capacity and a current written size.
///
/// `size <= capacity` is an invariant maintained by every mutating method;
/// out-of-range reads/writes saturate rather than fail.
#[derive(Debug, Clone)]
pub struct Memory {
    data: Vec<u8>,
    capacity: usize,
    size: usize,
    /// True for `wrap()`-constructed memory: present only to document intent,
    /// since a `Vec<u8>`-backed `Memory` always owns its storage in Rust.
    wrapped: bool,
}

fn align_up(n: usize, align: usize) -> usize {
    if align == 0 {
        n
    } else {
        (n + align - 1) & !(align - 1)
    }
}

impl Memory {
    /// Allocate `capacity` bytes, rounded up so `align` (a power of two, or
    /// zero for "no alignment requirement") evenly divides the region size.
    /// The logical capacity reported by [`Memory::capacity`] remains the
    /// caller's requested `capacity`, not the padded region size.
    pub fn alloc(capacity: usize, align: usize) -> Self {
        debug_assert!(align == 0 || align.is_power_of_two(), "align must be 0 or a power of two");
        let padded = align_up(capacity, align.max(1));
        Self {
            data: vec![0u8; padded],
            capacity,
            size: 0,
            wrapped: false,
        }
    }

    /// Wrap caller-owned bytes without taking ownership semantics beyond
    /// what `Vec` requires; `size` is the amount already considered valid.
    pub fn wrap(bytes: Vec<u8>, size: usize) -> Self {
        let capacity = bytes.len();
        Self {
            data: bytes,
            capacity,
            size: size.min(capacity),
            wrapped: true,
        }
    }

    /// Logical capacity of the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently considered valid.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this memory was constructed via [`Memory::wrap`].
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Copy at most `min(n, capacity - start)` bytes from `src` starting at
    /// `start = position.unwrap_or(self.size)`. Returns the number of bytes
    /// actually copied and updates `size` to `start + copied`. A `position`
    /// beyond `capacity` copies zero bytes.
    pub fn write(&mut self, src: &[u8], position: Option<usize>) -> usize {
        let start = position.unwrap_or(self.size);
        if start > self.capacity {
            return 0;
        }
        let room = self.capacity - start;
        let copied = src.len().min(room);
        self.data[start..start + copied].copy_from_slice(&src[..copied]);
        self.size = start + copied;
        copied
    }

    /// Copy at most `min(n, size - start)` bytes into `dst` starting at
    /// `start = position.unwrap_or(0)`. Returns the number of bytes copied.
    pub fn read(&self, dst: &mut [u8], position: Option<usize>) -> usize {
        let start = position.unwrap_or(0);
        if start > self.size {
            return 0;
        }
        let available = self.size - start;
        let copied = dst.len().min(available);
        dst[..copied].copy_from_slice(&self.data[start..start + copied]);
        copied
    }

    /// Reset `size` to zero without reallocating.
    pub fn reset(&mut self) {
        self.size = 0;
    }

    /// Raw access to the valid portion of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }
}

/// Reference-counted carrier of a [`Memory`] region plus per-buffer
/// metadata: stream id, timestamps, flags, and exactly one typed meta
/// describing the payload layout.
#[derive(Debug, Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

#[derive(Debug)]
struct BufferInner {
    memory: Memory,
    stream_id: u32,
    pts: i64,
    dts: i64,
    duration: i64,
    flags: u32,
    meta: TypedMeta,
}

impl Buffer {
    /// Allocate a fresh buffer with one `Memory` region.
    pub fn alloc(capacity: usize, align: usize, stream_id: u32, meta: TypedMeta) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                memory: Memory::alloc(capacity, align),
                stream_id,
                pts: TIMESTAMP_UNKNOWN,
                dts: TIMESTAMP_UNKNOWN,
                duration: 0,
                flags: 0,
                meta,
            }),
        }
    }

    /// Wrap caller-owned bytes; the returned buffer does not free on drop
    /// beyond ordinary Rust ownership (there is no external allocator to
    /// hand memory back to).
    pub fn wrap(bytes: Vec<u8>, size: usize, stream_id: u32, meta: TypedMeta) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                memory: Memory::wrap(bytes, size),
                stream_id,
                pts: TIMESTAMP_UNKNOWN,
                dts: TIMESTAMP_UNKNOWN,
                duration: 0,
                flags: 0,
                meta,
            }),
        }
    }

    /// A zero-size buffer carrying the end-of-stream flag.
    pub fn eos(stream_id: u32, meta: TypedMeta) -> Self {
        let mut buf = Self::alloc(0, 0, stream_id, meta);
        buf.set_flags(FLAG_EOS);
        buf
    }

    fn inner_mut(&mut self) -> &mut BufferInner {
        Arc::get_mut(&mut self.inner)
            .expect("Buffer mutated after being shared downstream")
    }

    /// See [`Memory::write`].
    pub fn write(&mut self, src: &[u8], position: Option<usize>) -> usize {
        self.inner_mut().memory.write(src, position)
    }

    /// See [`Memory::read`].
    pub fn read(&self, dst: &mut [u8], position: Option<usize>) -> usize {
        self.inner.memory.read(dst, position)
    }

    /// Reset size to zero and replace the typed meta with a fresh instance
    /// of the same media-type tag; the meta object is type-stable.
    pub fn reset(&mut self) {
        let fresh_meta = self.inner.meta.fresh_of_same_kind();
        let inner = self.inner_mut();
        inner.memory.reset();
        inner.pts = TIMESTAMP_UNKNOWN;
        inner.dts = TIMESTAMP_UNKNOWN;
        inner.duration = 0;
        inner.flags = 0;
        inner.meta = fresh_meta;
    }

    /// Number of valid bytes.
    pub fn size(&self) -> usize {
        self.inner.memory.size()
    }

    /// Region capacity.
    pub fn capacity(&self) -> usize {
        self.inner.memory.capacity()
    }

    /// Raw access to the valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.inner.memory.as_slice()
    }

    /// The elementary stream this buffer belongs to.
    pub fn stream_id(&self) -> u32 {
        self.inner.stream_id
    }

    /// Presentation timestamp, or `None` if unknown.
    pub fn pts(&self) -> Option<i64> {
        (self.inner.pts != TIMESTAMP_UNKNOWN).then_some(self.inner.pts)
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        self.inner_mut().pts = pts;
    }

    /// Decode timestamp, or `None` if unknown.
    pub fn dts(&self) -> Option<i64> {
        (self.inner.dts != TIMESTAMP_UNKNOWN).then_some(self.inner.dts)
    }

    /// Set the decode timestamp.
    pub fn set_dts(&mut self, dts: i64) {
        self.inner_mut().dts = dts;
    }

    /// Presentation duration in the same time base as `pts`.
    pub fn duration(&self) -> i64 {
        self.inner.duration
    }

    /// Set the presentation duration.
    pub fn set_duration(&mut self, duration: i64) {
        self.inner_mut().duration = duration;
    }

    /// Raw flag bits.
    pub fn flags(&self) -> u32 {
        self.inner.flags
    }

    /// OR additional flag bits in.
    pub fn set_flags(&mut self, flags: u32) {
        self.inner_mut().flags |= flags;
    }

    /// Whether the end-of-stream flag is set. A Buffer with this flag may
    /// have `size == 0`.
    pub fn is_eos(&self) -> bool {
        self.inner.flags & FLAG_EOS != 0
    }

    /// The typed meta describing this buffer's payload layout.
    pub fn meta(&self) -> &TypedMeta {
        &self.inner.meta
    }

    /// Number of live references to this buffer's storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::TypedMeta;

    #[test]
    fn write_then_read_roundtrips() {
        let mut buf = Buffer::alloc(16, 0, 0, TypedMeta::Audio(Default::default()));
        let src = b"hello";
        let copied = buf.write(src, None);
        assert_eq!(copied, 5);
        assert_eq!(buf.size(), 5);

        let mut dst = [0u8; 5];
        let read = buf.read(&mut dst, Some(0));
        assert_eq!(read, 5);
        assert_eq!(&dst, src);
    }

    #[test]
    fn write_past_capacity_saturates() {
        let mut buf = Buffer::alloc(4, 0, 0, TypedMeta::Audio(Default::default()));
        let copied = buf.write(b"0123456789", None);
        assert_eq!(copied, 4);
        assert_eq!(buf.size(), 4);
    }

    #[test]
    fn write_with_position_past_capacity_copies_zero() {
        let mut buf = Buffer::alloc(4, 0, 0, TypedMeta::Audio(Default::default()));
        let copied = buf.write(b"x", Some(100));
        assert_eq!(copied, 0);
    }

    #[test]
    fn reset_clears_size_and_timestamps_but_not_capacity() {
        let mut buf = Buffer::alloc(8, 0, 3, TypedMeta::Audio(Default::default()));
        buf.write(b"data", None);
        buf.set_pts(42);
        buf.reset();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.pts(), None);
    }

    #[test]
    fn eos_buffer_may_have_zero_size() {
        let buf = Buffer::eos(0, TypedMeta::Audio(Default::default()));
        assert!(buf.is_eos());
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn clone_shares_storage() {
        let buf = Buffer::alloc(8, 0, 0, TypedMeta::Audio(Default::default()));
        let clone = buf.clone();
        assert_eq!(buf.ref_count(), 2);
        drop(clone);
        assert_eq!(buf.ref_count(), 1);
    }
}
