//! Growable byte buffers and a pool for reusing them.
//!
//! # Invariants
//!
//! 1. `Acquire` always returns a zero-length buffer.
//! 2. Capacity survives a `Release`/`Acquire` round trip, except buffers
//!    larger than [`BufferPool::large_threshold`] are dropped instead of
//!    recycled, so the pool cannot grow memory use without bound.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::io;

/// Default ceiling above which a released buffer is dropped rather than
/// pooled.
pub const DEFAULT_LARGE_BUFFER_THRESHOLD: usize = 16 * 1024;

/// A growable, contiguous byte sequence borrowed from a [`BufferPool`].
///
/// Wraps `BytesMut` and additionally implements [`std::io::Write`] so it
/// can be used as a writer sink for serializers.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    /// Creates a detached buffer with the given starting capacity. Not
    /// pool-backed; prefer [`BufferPool::acquire`] on hot paths.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(cap),
        }
    }

    /// Appends raw bytes.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Appends a `&str`.
    #[inline]
    pub fn push_str(&mut self, s: &str) {
        self.inner.extend_from_slice(s.as_bytes());
    }

    /// Truncates length to zero; retains capacity.
    #[inline]
    pub fn reset(&mut self) {
        self.inner.clear();
    }

    /// Current length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the buffer currently holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Current capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Borrows the written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Swaps this buffer's backing storage with another in O(1).
    #[inline]
    pub fn swap(&mut self, other: &mut ByteBuffer) {
        std::mem::swap(&mut self.inner, &mut other.inner);
    }

    fn from_bytes_mut(inner: BytesMut) -> Self {
        Self { inner }
    }

    fn into_bytes_mut(self) -> BytesMut {
        self.inner
    }
}

impl io::Write for ByteBuffer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::ops::Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

/// A free-list of reusable [`ByteBuffer`]s.
///
/// `Acquire`/`Release` are the only operations; the pool has no explicit
/// teardown and is cheap to construct per-caller (tests should use their
/// own instance for isolation).
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    large_threshold: usize,
}

impl BufferPool {
    /// Creates a pool with the default large-buffer threshold (16 KiB).
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_LARGE_BUFFER_THRESHOLD)
    }

    /// Creates a pool with a custom large-buffer threshold.
    pub fn with_threshold(large_threshold: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            large_threshold,
        }
    }

    /// The configured large-buffer threshold.
    pub fn large_threshold(&self) -> usize {
        self.large_threshold
    }

    /// Acquires a reset buffer, reusing a pooled one if available.
    pub fn acquire(&self) -> ByteBuffer {
        let mut free = self.free.lock();
        match free.pop() {
            Some(mut inner) => {
                inner.clear();
                ByteBuffer::from_bytes_mut(inner)
            }
            None => ByteBuffer::with_capacity(4096),
        }
    }

    /// Releases a buffer back to the pool. Buffers whose capacity exceeds
    /// the large-buffer threshold are dropped instead of recycled.
    pub fn release(&self, mut buf: ByteBuffer) {
        buf.reset();
        if buf.capacity() > self.large_threshold {
            return;
        }
        self.free.lock().push(buf.into_bytes_mut());
    }

    /// Number of buffers currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
