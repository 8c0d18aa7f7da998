use crate::error::{Result, SdsError};
use crate::traits::{Buffer, SharedCondvar, SharedMutex, StreamTraits};
use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Alignment of heap buffers. A cache line keeps the header's hot cursors from
/// sharing a line with whatever the allocator put before the buffer.
const HEAP_BUFFER_ALIGN: usize = 64;

/// Primitives for a stream shared between threads of one process.
pub struct InProcessTraits;

impl StreamTraits for InProcessTraits {
    const NAME: &'static str = "strata_sds::InProcessTraits";

    type Buffer = HeapBuffer;
    type Mutex = Mutex<()>;
    type Condvar = Condvar;
}

/// A zero-initialized, cache-line aligned heap allocation.
pub struct HeapBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is owned by the buffer and never reallocated; all
// access to its contents goes through the stream's own synchronization.
unsafe impl Send for HeapBuffer {}
unsafe impl Sync for HeapBuffer {}

impl HeapBuffer {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(SdsError::InvalidState("buffer length must be non-zero"));
        }
        let layout = Layout::from_size_align(len, HEAP_BUFFER_ALIGN)
            .map_err(|_| SdsError::InvalidState("buffer length overflows the address space"))?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(SdsError::InvalidState("buffer allocation failed"))?;

        Ok(Self { ptr, layout })
    }
}

unsafe impl Buffer for HeapBuffer {
    #[inline]
    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// A poisoned lock only means some other handle panicked while holding it; the
// guarded state is all atomics, so the lock is still usable.

unsafe impl SharedMutex for Mutex<()> {
    type Guard<'a> = MutexGuard<'a, ()>;

    unsafe fn init_in_place(slot: *mut Self) {
        unsafe { slot.write(Mutex::new(())) };
    }

    unsafe fn destroy_in_place(slot: *mut Self) {
        unsafe { ptr::drop_in_place(slot) };
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        Mutex::lock(self).unwrap_or_else(PoisonError::into_inner)
    }
}

unsafe impl SharedCondvar for Condvar {
    type Mutex = Mutex<()>;

    unsafe fn init_in_place(slot: *mut Self) {
        unsafe { slot.write(Condvar::new()) };
    }

    unsafe fn destroy_in_place(slot: *mut Self) {
        unsafe { ptr::drop_in_place(slot) };
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()>
    where
        Mutex<()>: 'a,
    {
        Condvar::wait(self, guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(&self, guard: MutexGuard<'a, ()>, timeout: Duration) -> MutexGuard<'a, ()>
    where
        Mutex<()>: 'a,
    {
        match Condvar::wait_timeout(self, guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn notify_all(&self) {
        Condvar::notify_all(self);
    }
}
