//! Binary layout of a stream buffer and the structural protocol over it.
//!
//! A buffer is interpreted as a fixed header followed by three per-reader
//! arrays and the data ring. Offsets are computed, never inferred from
//! padding, so every process using the same [`StreamTraits`] derives the same
//! byte positions from `word_size` and `max_readers` alone.
//!
//! # Memory Layout
//!
//! ```text
//! offset 0
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header<T>  (#[repr(C)])                                          │
//! │   magic, version, traits_hash, word_size, max_readers            │
//! │   data_available_cv/mutex, space_available_cv                    │
//! │   backward_seek_mutex, writer flags + writer_enable_mutex        │
//! │   write_start / write_end / oldest_unconsumed cursors            │
//! │   reference_count, attach_mutex, reader_enable_mutex             │
//! ├──────────────────────────────────────────────────────────────────┤ align(AtomicBool)
//! │ reader_enabled      [AtomicBool; max_readers]                    │
//! ├──────────────────────────────────────────────────────────────────┤ align(AtomicU64)
//! │ reader_cursor       [AtomicU64;  max_readers]                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ reader_close_index  [AtomicU64;  max_readers]                    │
//! ├──────────────────────────────────────────────────────────────────┤ align(word_size)
//! │ data                [word; data_size]   (the ring)               │
//! │ ...                                                              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! [`BufferLayout::init`] placement-constructs the header and arrays and
//! starts the reference count at 1. Every further view calls
//! [`BufferLayout::attach`], which validates the header and increments the
//! count. Dropping a view detaches it; the view that brings the count to zero
//! destroys the in-place objects. The memory itself belongs to the buffer.

use crate::error::{Result, SdsError};
use crate::ring::{self, Index, align_size_to};
use crate::traits::{Buffer, SharedCondvar, SharedMutex, StreamTraits, stable_hash};
use std::mem::{align_of, size_of};
use std::ptr::{self, addr_of_mut};
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering, fence};
use tracing::{debug, warn};

/// Magic number identifying a formatted stream buffer ("SDSH").
pub const MAGIC: u32 = 0x5344_5348;

/// Layout version. Attach rejects any other value.
pub const VERSION: u8 = 2;

/// Header stored at offset 0 of every stream buffer.
///
/// Plain fields are written once by `init` and only read afterwards. Every
/// mutable field is an atomic or is guarded by one of the mutexes.
#[repr(C)]
pub struct Header<T: StreamTraits> {
    pub magic: u32,
    pub version: u8,
    /// [`stable_hash`] of `T::NAME`.
    pub traits_hash: u32,
    pub word_size: u16,
    pub max_readers: u8,

    /// Signalled when the writer publishes data or closes.
    pub data_available_cv: T::Condvar,
    pub data_available_mutex: T::Mutex,

    /// Signalled when the barrier moves forward. Waited on with
    /// `backward_seek_mutex`.
    pub space_available_cv: T::Condvar,
    /// Serializes backward seeks, barrier recomputation and the space check
    /// of non-lossy writes.
    pub backward_seek_mutex: T::Mutex,

    pub writer_enabled: AtomicBool,
    pub writer_closed: AtomicBool,
    pub writer_enable_mutex: T::Mutex,

    /// End of the last completed write; readers never read past it.
    pub write_start_cursor: AtomicU64,
    /// End of the write in progress. Equal to `write_start_cursor` between
    /// writes.
    pub write_end_cursor: AtomicU64,
    /// The barrier: no enabled reader's cursor is below it, and a non-lossy
    /// writer never overwrites at or beyond it.
    pub oldest_unconsumed_cursor: AtomicU64,

    /// Number of attached views. Only mutated under `attach_mutex`.
    pub reference_count: AtomicU32,
    pub attach_mutex: T::Mutex,
    pub reader_enable_mutex: T::Mutex,
}

/// Byte offsets of every region, relative to the start of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offsets {
    pub reader_enabled: usize,
    pub reader_cursor: usize,
    pub reader_close_index: usize,
    pub data: usize,
}

impl Offsets {
    pub fn compute<T: StreamTraits>(word_size: usize, max_readers: usize) -> Self {
        let reader_enabled = align_size_to(size_of::<Header<T>>(), align_of::<AtomicBool>());
        let reader_cursor = align_size_to(
            reader_enabled + max_readers * size_of::<AtomicBool>(),
            align_of::<AtomicU64>(),
        );
        let reader_close_index = reader_cursor + max_readers * size_of::<AtomicU64>();
        let data = align_size_to(
            reader_close_index + max_readers * size_of::<AtomicU64>(),
            word_size,
        );
        Self {
            reader_enabled,
            reader_cursor,
            reader_close_index,
            data,
        }
    }
}

/// One process's view of a formatted stream buffer.
///
/// A `BufferLayout` is always attached: it comes from [`init`](Self::init) or
/// [`attach`](Self::attach) and detaches when dropped.
pub struct BufferLayout<T: StreamTraits> {
    buffer: Arc<T::Buffer>,
    header: *mut Header<T>,
    reader_enabled: *const AtomicBool,
    reader_cursor: *const AtomicU64,
    reader_close_index: *const AtomicU64,
    data: *mut u8,
    word_size: usize,
    max_readers: usize,
    data_size: Index,
}

// SAFETY: every pointer targets the buffer kept alive by `buffer`, and all
// shared state behind them is atomics or the stream's own mutexes.
unsafe impl<T: StreamTraits> Send for BufferLayout<T> {}
unsafe impl<T: StreamTraits> Sync for BufferLayout<T> {}

impl<T: StreamTraits> BufferLayout<T> {
    /// Offset of the data region for the given parameters.
    pub fn calculate_data_offset(word_size: usize, max_readers: usize) -> usize {
        Offsets::compute::<T>(word_size, max_readers).data
    }

    /// Bytes a buffer needs to hold `data_words` words.
    pub fn calculate_buffer_size(
        data_words: usize,
        word_size: usize,
        max_readers: usize,
    ) -> Result<usize> {
        check_parameters(word_size, max_readers)?;
        if data_words == 0 {
            return Err(SdsError::InvalidState("data size must be at least one word"));
        }
        data_words
            .checked_mul(word_size)
            .and_then(|bytes| bytes.checked_add(Self::calculate_data_offset(word_size, max_readers)))
            .ok_or(SdsError::InvalidState("buffer size overflows usize"))
    }

    /// Formats `buffer` as a fresh stream and returns the first view of it.
    pub fn init(buffer: Arc<T::Buffer>, word_size: usize, max_readers: usize) -> Result<Self> {
        if let Err(e) = check_parameters(word_size, max_readers) {
            warn!(word_size, max_readers, error = %e, "rejected stream format");
            return Err(e);
        }

        let base = buffer.as_mut_ptr();
        if base as usize % align_of::<Header<T>>() != 0 {
            return Err(SdsError::InvalidState("buffer is not aligned for the header"));
        }
        let offsets = Offsets::compute::<T>(word_size, max_readers);
        if buffer.len() < offsets.data + word_size {
            warn!(
                len = buffer.len(),
                required = offsets.data + word_size,
                "buffer too small for a stream"
            );
            return Err(SdsError::InvalidState("buffer too small for header and one word"));
        }

        let h = base.cast::<Header<T>>();
        // SAFETY: the buffer is large enough and aligned for the header and
        // arrays (checked above); nothing else uses it until init returns.
        unsafe {
            addr_of_mut!((*h).version).write(VERSION);
            addr_of_mut!((*h).traits_hash).write(stable_hash(T::NAME));
            addr_of_mut!((*h).word_size).write(word_size as u16);
            addr_of_mut!((*h).max_readers).write(max_readers as u8);

            <T::Condvar as SharedCondvar>::init_in_place(addr_of_mut!((*h).data_available_cv));
            <T::Mutex as SharedMutex>::init_in_place(addr_of_mut!((*h).data_available_mutex));
            <T::Condvar as SharedCondvar>::init_in_place(addr_of_mut!((*h).space_available_cv));
            <T::Mutex as SharedMutex>::init_in_place(addr_of_mut!((*h).backward_seek_mutex));

            addr_of_mut!((*h).writer_enabled).write(AtomicBool::new(false));
            addr_of_mut!((*h).writer_closed).write(AtomicBool::new(false));
            <T::Mutex as SharedMutex>::init_in_place(addr_of_mut!((*h).writer_enable_mutex));

            addr_of_mut!((*h).write_start_cursor).write(AtomicU64::new(0));
            addr_of_mut!((*h).write_end_cursor).write(AtomicU64::new(0));
            addr_of_mut!((*h).oldest_unconsumed_cursor).write(AtomicU64::new(0));

            addr_of_mut!((*h).reference_count).write(AtomicU32::new(1));
            <T::Mutex as SharedMutex>::init_in_place(addr_of_mut!((*h).attach_mutex));
            <T::Mutex as SharedMutex>::init_in_place(addr_of_mut!((*h).reader_enable_mutex));

            let enabled = base.add(offsets.reader_enabled).cast::<AtomicBool>();
            let cursor = base.add(offsets.reader_cursor).cast::<AtomicU64>();
            let close = base.add(offsets.reader_close_index).cast::<AtomicU64>();
            for id in 0..max_readers {
                enabled.add(id).write(AtomicBool::new(false));
                cursor.add(id).write(AtomicU64::new(0));
                close.add(id).write(AtomicU64::new(0));
            }

            // Magic last: attach treats it as the "formatted" mark, and every
            // write above must be visible to whoever observes it.
            fence(Ordering::Release);
            AtomicU32::from_ptr(addr_of_mut!((*h).magic)).store(MAGIC, Ordering::Relaxed);
        }

        let layout = Self::view(buffer, word_size, max_readers);
        debug!(
            traits = T::NAME,
            word_size,
            max_readers,
            data_size = layout.data_size,
            "formatted stream buffer"
        );
        Ok(layout)
    }

    /// Attaches a new view to an already formatted buffer.
    pub fn attach(buffer: Arc<T::Buffer>) -> Result<Self> {
        let base = buffer.as_mut_ptr();
        if buffer.len() < size_of::<Header<T>>() {
            return Err(SdsError::MismatchedFormat("buffer smaller than a header"));
        }
        if base as usize % align_of::<Header<T>>() != 0 {
            return Err(SdsError::InvalidState("buffer is not aligned for the header"));
        }

        // SAFETY: the buffer holds at least a header's worth of bytes and is
        // aligned for it. A formatting process may still be writing the rest.
        let magic = unsafe {
            AtomicU32::from_ptr(addr_of_mut!((*base.cast::<Header<T>>()).magic))
                .load(Ordering::Relaxed)
        };
        if magic != MAGIC {
            warn!(magic, "attach rejected");
            return Err(SdsError::MismatchedFormat("bad magic"));
        }
        fence(Ordering::Acquire);

        // SAFETY: the formatting process published the header before the
        // magic; the plain fields are validated before the synchronization
        // objects are touched.
        let header = unsafe { &*base.cast::<Header<T>>() };
        if header.version != VERSION {
            warn!(version = header.version, "attach rejected");
            return Err(SdsError::MismatchedFormat("unsupported layout version"));
        }
        if header.traits_hash != stable_hash(T::NAME) {
            warn!(traits = T::NAME, "attach rejected");
            return Err(SdsError::MismatchedFormat("traits hash mismatch"));
        }

        let word_size = usize::from(header.word_size);
        let max_readers = usize::from(header.max_readers);
        let offsets = Offsets::compute::<T>(word_size, max_readers);
        if word_size == 0 || buffer.len() < offsets.data + word_size {
            return Err(SdsError::MismatchedFormat("header does not fit the buffer"));
        }

        // A torn-down buffer has destroyed its mutexes; do not touch them.
        if header.reference_count.load(Ordering::Acquire) == 0 {
            return Err(SdsError::InvalidState("buffer has already been torn down"));
        }
        {
            let _guard = header.attach_mutex.lock();
            let count = header.reference_count.load(Ordering::Acquire);
            if count == 0 {
                return Err(SdsError::InvalidState("buffer has already been torn down"));
            }
            if count == u32::MAX {
                return Err(SdsError::InvalidState("reference count is saturated"));
            }
            header.reference_count.store(count + 1, Ordering::Release);
        }

        let layout = Self::view(buffer, word_size, max_readers);
        debug!(
            traits = T::NAME,
            word_size,
            max_readers,
            reference_count = layout.reference_count(),
            "attached to stream buffer"
        );
        Ok(layout)
    }

    /// Detaches this view; equivalent to dropping it.
    pub fn detach(self) {}

    /// Builds the cached pointers for a formatted buffer.
    fn view(buffer: Arc<T::Buffer>, word_size: usize, max_readers: usize) -> Self {
        let offsets = Offsets::compute::<T>(word_size, max_readers);
        let base = buffer.as_mut_ptr();
        let data_size = ((buffer.len() - offsets.data) / word_size) as Index;
        // SAFETY: every offset is within the buffer (validated by callers).
        unsafe {
            Self {
                header: base.cast::<Header<T>>(),
                reader_enabled: base.add(offsets.reader_enabled).cast::<AtomicBool>(),
                reader_cursor: base.add(offsets.reader_cursor).cast::<AtomicU64>(),
                reader_close_index: base.add(offsets.reader_close_index).cast::<AtomicU64>(),
                data: base.add(offsets.data),
                buffer,
                word_size,
                max_readers,
                data_size,
            }
        }
    }

    #[inline(always)]
    pub fn header(&self) -> &Header<T> {
        // SAFETY: initialized and alive while this view is attached.
        unsafe { &*self.header }
    }

    pub fn buffer(&self) -> &Arc<T::Buffer> {
        &self.buffer
    }

    #[inline(always)]
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    #[inline(always)]
    pub fn max_readers(&self) -> usize {
        self.max_readers
    }

    /// Capacity of the ring in words.
    #[inline(always)]
    pub fn data_size(&self) -> Index {
        self.data_size
    }

    pub fn reference_count(&self) -> u32 {
        self.header().reference_count.load(Ordering::Acquire)
    }

    fn reader_enabled_slots(&self) -> &[AtomicBool] {
        // SAFETY: max_readers elements were constructed by init.
        unsafe { slice::from_raw_parts(self.reader_enabled, self.max_readers) }
    }

    fn reader_cursor_slots(&self) -> &[AtomicU64] {
        unsafe { slice::from_raw_parts(self.reader_cursor, self.max_readers) }
    }

    fn reader_close_index_slots(&self) -> &[AtomicU64] {
        unsafe { slice::from_raw_parts(self.reader_close_index, self.max_readers) }
    }

    /// Panics if `id >= max_readers`.
    pub fn is_reader_enabled(&self, id: usize) -> bool {
        self.reader_enabled_slots()[id].load(Ordering::Acquire)
    }

    /// Marks slot `id` live. The caller holds `reader_enable_mutex`.
    pub fn enable_reader_locked(&self, id: usize) {
        self.reader_enabled_slots()[id].store(true, Ordering::Release);
    }

    /// Marks slot `id` free. The caller holds `reader_enable_mutex`.
    pub fn disable_reader_locked(&self, id: usize) {
        self.reader_enabled_slots()[id].store(false, Ordering::Release);
    }

    pub fn reader_cursor(&self, id: usize) -> &AtomicU64 {
        &self.reader_cursor_slots()[id]
    }

    pub fn reader_close_index(&self, id: usize) -> &AtomicU64 {
        &self.reader_close_index_slots()[id]
    }

    /// Iterates the close-index slots of enabled readers.
    pub(crate) fn enabled_close_indices(&self) -> impl Iterator<Item = &AtomicU64> {
        self.reader_enabled_slots()
            .iter()
            .zip(self.reader_close_index_slots())
            .filter(|(enabled, _)| enabled.load(Ordering::Acquire))
            .map(|(_, close)| close)
    }

    /// Words left before the ring wraps, starting at `after`.
    #[inline(always)]
    pub fn words_until_wrap(&self, after: Index) -> Index {
        ring::words_until_wrap(after, self.data_size)
    }

    /// Recomputes the barrier from the enabled readers' cursors.
    pub fn update_oldest_unconsumed_cursor(&self) {
        let _guard = self.header().backward_seek_mutex.lock();
        self.update_oldest_unconsumed_cursor_locked();
    }

    /// Same as [`update_oldest_unconsumed_cursor`](Self::update_oldest_unconsumed_cursor)
    /// with `backward_seek_mutex` already held.
    ///
    /// With no enabled reader the barrier is the write cursor, so data written
    /// before any reader exists is retained until one does. The barrier never
    /// moves backwards here.
    pub(crate) fn update_oldest_unconsumed_cursor_locked(&self) {
        let header = self.header();
        let oldest = self
            .reader_enabled_slots()
            .iter()
            .zip(self.reader_cursor_slots())
            .filter(|(enabled, _)| enabled.load(Ordering::Acquire))
            .map(|(_, cursor)| cursor.load(Ordering::Acquire))
            .min()
            .unwrap_or_else(|| header.write_start_cursor.load(Ordering::Acquire));

        let previous = header
            .oldest_unconsumed_cursor
            .fetch_max(oldest, Ordering::AcqRel);
        if oldest > previous {
            header.space_available_cv.notify_all();
        }
    }

    /// Copies whole words from `src` into the ring starting at `index`.
    ///
    /// `src.len()` must be a multiple of the word size and at most one full
    /// ring.
    pub(crate) fn copy_into_ring(&self, index: Index, src: &[u8]) {
        let words = (src.len() / self.word_size) as Index;
        debug_assert!(words <= self.data_size);
        let (head, _tail) = ring::split_at_wrap(index, words, self.data_size);
        let head_bytes = head as usize * self.word_size;
        let offset = ring::ring_position(index, self.data_size) as usize * self.word_size;
        // SAFETY: head stays within [offset, data_size * word_size) and the
        // tail restarts at position 0; both fit in the data region.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data.add(offset), head_bytes);
            ptr::copy_nonoverlapping(
                src.as_ptr().add(head_bytes),
                self.data,
                src.len() - head_bytes,
            );
        }
    }

    /// Copies whole words out of the ring starting at `index` into `dst`.
    pub(crate) fn copy_from_ring(&self, index: Index, dst: &mut [u8]) {
        let words = (dst.len() / self.word_size) as Index;
        debug_assert!(words <= self.data_size);
        let (head, _tail) = ring::split_at_wrap(index, words, self.data_size);
        let head_bytes = head as usize * self.word_size;
        let offset = ring::ring_position(index, self.data_size) as usize * self.word_size;
        // SAFETY: same bounds as `copy_into_ring`.
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(offset), dst.as_mut_ptr(), head_bytes);
            ptr::copy_nonoverlapping(
                self.data,
                dst.as_mut_ptr().add(head_bytes),
                dst.len() - head_bytes,
            );
        }
    }
}

impl<T: StreamTraits> Drop for BufferLayout<T> {
    fn drop(&mut self) {
        let header = self.header();
        let remaining = {
            let _guard = header.attach_mutex.lock();
            let count = header.reference_count.load(Ordering::Acquire);
            let remaining = count.saturating_sub(1);
            header.reference_count.store(remaining, Ordering::Release);
            remaining
        };
        debug!(traits = T::NAME, reference_count = remaining, "detached from stream buffer");
        if remaining > 0 {
            return;
        }

        let h = self.header;
        // SAFETY: this was the last attached view, so no guard on any of these
        // objects can be alive. Atomics need no teardown.
        unsafe {
            <T::Condvar as SharedCondvar>::destroy_in_place(addr_of_mut!((*h).data_available_cv));
            <T::Mutex as SharedMutex>::destroy_in_place(addr_of_mut!((*h).data_available_mutex));
            <T::Condvar as SharedCondvar>::destroy_in_place(addr_of_mut!((*h).space_available_cv));
            <T::Mutex as SharedMutex>::destroy_in_place(addr_of_mut!((*h).backward_seek_mutex));
            <T::Mutex as SharedMutex>::destroy_in_place(addr_of_mut!((*h).writer_enable_mutex));
            <T::Mutex as SharedMutex>::destroy_in_place(addr_of_mut!((*h).attach_mutex));
            <T::Mutex as SharedMutex>::destroy_in_place(addr_of_mut!((*h).reader_enable_mutex));
        }
        debug!(traits = T::NAME, "tore down stream buffer");
    }
}

fn check_parameters(word_size: usize, max_readers: usize) -> Result<()> {
    if word_size == 0 {
        return Err(SdsError::InvalidState("word size must be non-zero"));
    }
    if word_size > usize::from(u16::MAX) {
        return Err(SdsError::Overflow {
            field: "word_size",
            value: word_size,
            max: usize::from(u16::MAX),
        });
    }
    if max_readers > usize::from(u8::MAX) {
        return Err(SdsError::Overflow {
            field: "max_readers",
            value: max_readers,
            max: usize::from(u8::MAX),
        });
    }
    Ok(())
}
