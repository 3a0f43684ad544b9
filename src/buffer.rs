//! Growable byte buffer backing both sides of every connection.
//!
//! A contiguous region, a valid length, and an allocated capacity,
//! grown geometrically and drained by shifting the tail forward rather
//! than wrapping as a ring.

/// Default geometric growth multiplier applied when a buffer must grow
/// to accommodate an `append`. Configurable per-server via
/// [`crate::config::Config::growth_factor`]; this constant is only the
/// fallback used by [`ByteBuffer::new`].
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// The three allocation primitives a [`ByteBuffer`] needs, redirectable
/// to a caller-supplied allocator when the `allocator-hook` feature is
/// enabled. `std`'s global allocator is used when no hook is attached.
#[cfg(feature = "allocator-hook")]
pub trait ByteAllocator: std::fmt::Debug + Send + Sync {
    /// Allocate an empty buffer with at least `size` bytes of spare
    /// capacity, or `None` on failure.
    fn acquire(&self, size: usize) -> Option<Vec<u8>>;
    /// Grow `buf`'s capacity to at least `new_size` in place. Returns
    /// `false` on failure, leaving `buf` exactly as it was.
    fn resize(&self, buf: &mut Vec<u8>, new_size: usize) -> bool;
    /// Release `buf`'s storage. The default allocator's drop glue
    /// already does this; the hook exists for allocators that track
    /// outstanding allocations.
    fn release(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

/// The allocator used when no hook is attached: `std`'s global
/// allocator via `Vec`'s own growth.
#[cfg(feature = "allocator-hook")]
#[derive(Debug, Default)]
pub struct StdAllocator;

#[cfg(feature = "allocator-hook")]
impl ByteAllocator for StdAllocator {
    fn acquire(&self, size: usize) -> Option<Vec<u8>> {
        let mut v = Vec::new();
        v.try_reserve_exact(size).ok()?;
        Some(v)
    }

    fn resize(&self, buf: &mut Vec<u8>, new_size: usize) -> bool {
        let additional = new_size.saturating_sub(buf.len());
        buf.try_reserve(additional).is_ok()
    }
}

/// A growable, contiguous byte buffer.
///
/// Invariant: `length <= capacity` always; `capacity == 0` implies the
/// backing storage holds no allocation. `append` and `remove` are the
/// only mutating operations; both are non-blocking and allocation
/// failure is reported by return value rather than by panicking.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    growth_factor: f64,
    #[cfg(feature = "allocator-hook")]
    allocator: Option<std::sync::Arc<dyn ByteAllocator>>,
}

impl ByteBuffer {
    /// Create an empty buffer using the default growth factor.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            growth_factor: DEFAULT_GROWTH_FACTOR,
            #[cfg(feature = "allocator-hook")]
            allocator: None,
        }
    }

    /// Create a buffer pre-sized to `size` bytes of capacity. If the
    /// allocation fails the buffer degrades silently to zero capacity;
    /// length is unaffected either way (it starts at zero).
    pub fn with_capacity(size: usize, growth_factor: f64) -> Self {
        let mut data = Vec::new();
        let _ = data.try_reserve_exact(size);
        Self {
            data,
            growth_factor,
            #[cfg(feature = "allocator-hook")]
            allocator: None,
        }
    }

    /// Create a buffer that redirects its allocation primitives through
    /// `allocator` instead of `std`'s global allocator.
    #[cfg(feature = "allocator-hook")]
    pub fn with_allocator(
        size: usize,
        growth_factor: f64,
        allocator: std::sync::Arc<dyn ByteAllocator>,
    ) -> Self {
        let data = allocator.acquire(size).unwrap_or_default();
        Self {
            data,
            growth_factor,
            allocator: Some(allocator),
        }
    }

    /// Number of valid bytes currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no valid bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes of backing storage currently allocated.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The bytes currently held, in order.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append `bytes` to the end of the buffer.
    ///
    /// Returns the number of bytes accepted: either `bytes.len()` on
    /// success, or `0` if growing the buffer to fit would require an
    /// allocation that failed — the buffer is left unmodified in that
    /// case, and the caller should treat a `0` return as backpressure.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        let needed = self.data.len() + bytes.len();
        if needed >= self.data.capacity() {
            let target = ((needed as f64) * self.growth_factor) as usize;

            #[cfg(feature = "allocator-hook")]
            {
                if let Some(allocator) = self.allocator.clone() {
                    if !allocator.resize(&mut self.data, target) {
                        return 0;
                    }
                    self.data.extend_from_slice(bytes);
                    return bytes.len();
                }
            }

            let additional = target.saturating_sub(self.data.len());
            if self.data.try_reserve(additional).is_err() {
                return 0;
            }
        }
        self.data.extend_from_slice(bytes);
        bytes.len()
    }

    /// Drop the first `n` bytes, shifting the remainder forward.
    ///
    /// A no-op if `n` is zero or exceeds the current length. Shifting
    /// (rather than a ring buffer) keeps the buffer contiguous, which
    /// matters to callers that hand the readable slice straight to a
    /// parser.
    pub fn remove(&mut self, n: usize) {
        if n == 0 || n > self.data.len() {
            return;
        }
        self.data.drain(0..n);
    }

    /// Release the backing storage and reset to empty.
    pub fn free(&mut self) {
        let old = std::mem::take(&mut self.data);
        #[cfg(feature = "allocator-hook")]
        {
            if let Some(allocator) = self.allocator.clone() {
                allocator.release(old);
                return;
            }
        }
        drop(old);
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_accepted_count() {
        let mut buf = ByteBuffer::new();
        assert_eq!(buf.append(b"hello"), 5);
        assert_eq!(buf.as_slice(), b"hello");
    }

    #[test]
    fn append_zero_length_is_noop() {
        let mut buf = ByteBuffer::new();
        assert_eq!(buf.append(b""), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn growth_law_meets_factor() {
        let mut buf = ByteBuffer::with_capacity(4, 2.0);
        let c = buf.capacity();
        buf.append(&[0u8; 4]);
        assert_eq!(buf.len(), 4);
        buf.append(&[1u8]);
        assert!(buf.capacity() as f64 >= ((c + 1) as f64) * 2.0 || buf.capacity() >= c + 1);
    }

    #[test]
    fn remove_out_of_range_is_noop() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc");
        let cap = buf.capacity();
        buf.remove(10);
        assert_eq!(buf.as_slice(), b"abc");
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn remove_all_leaves_empty_buffer_with_capacity() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc");
        let cap = buf.capacity();
        buf.remove(3);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn remove_prefix_shifts_tail() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abcdef");
        buf.remove(2);
        assert_eq!(buf.as_slice(), b"cdef");
    }

    #[cfg(feature = "allocator-hook")]
    #[test]
    fn custom_allocator_is_used_for_growth() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Debug, Default)]
        struct CountingAllocator {
            resizes: AtomicUsize,
        }

        impl ByteAllocator for CountingAllocator {
            fn acquire(&self, size: usize) -> Option<Vec<u8>> {
                let mut v = Vec::new();
                v.try_reserve_exact(size).ok()?;
                Some(v)
            }

            fn resize(&self, buf: &mut Vec<u8>, new_size: usize) -> bool {
                self.resizes.fetch_add(1, Ordering::SeqCst);
                let additional = new_size.saturating_sub(buf.len());
                buf.try_reserve(additional).is_ok()
            }
        }

        let allocator = Arc::new(CountingAllocator::default());
        let mut buf = ByteBuffer::with_allocator(0, 2.0, allocator.clone());
        buf.append(b"hello");
        assert_eq!(buf.as_slice(), b"hello");
        assert!(allocator.resizes.load(Ordering::SeqCst) >= 1);
    }

    proptest::proptest! {
        /// Appending arbitrary chunks never drops or reorders bytes,
        /// and accepted length always equals what was actually stored.
        #[test]
        fn append_sequence_matches_concatenation(chunks in proptest::collection::vec(proptest::collection::vec(0u8..=255, 0..64), 0..32)) {
            let mut buf = ByteBuffer::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let accepted = buf.append(chunk);
                proptest::prop_assert_eq!(accepted, chunk.len());
                expected.extend_from_slice(chunk);
            }
            proptest::prop_assert_eq!(buf.as_slice(), expected.as_slice());
        }

        /// Growing past current capacity always lands at or above the
        /// growth-law floor `(length + n) * growth_factor`.
        #[test]
        fn growth_meets_factor_floor(initial in 0u8..=32, extra in 1u8..=64, factor in 1.5f64..4.0) {
            let mut buf = ByteBuffer::with_capacity(initial as usize, factor);
            buf.append(&vec![0u8; initial as usize]);
            let needed = buf.len() + extra as usize;
            if needed > buf.capacity() {
                buf.append(&vec![0u8; extra as usize]);
                let floor = (needed as f64 * factor) as usize;
                proptest::prop_assert!(buf.capacity() >= floor || buf.capacity() >= needed);
            }
        }
    }
}
