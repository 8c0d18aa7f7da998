//! The capability set a stream is built from.
//!
//! A stream keeps its synchronization primitives *inside* the buffer it
//! manages, so the primitives must be constructible in place at an arbitrary
//! (suitably aligned) address and must never move afterwards. Which concrete
//! primitives are valid depends on who shares the buffer:
//!
//! - threads of one process: std `Mutex`/`Condvar` over a heap allocation
//!   ([`InProcessTraits`](crate::InProcessTraits));
//! - several processes: process-shared pthread objects over a shared file
//!   mapping (`SharedMemoryTraits`, linux only).
//!
//! Atomics are always `AtomicU64`/`AtomicBool`. They are lock-free and
//! address-free on every supported target, so one representation serves both
//! cases.

use std::time::Duration;

/// A contiguous byte region the stream is laid out in.
///
/// # Safety
///
/// `as_mut_ptr()` must return the same pointer for the lifetime of the buffer,
/// valid for reads and writes of `len()` bytes, aligned to at least 8 bytes,
/// and usable from any thread holding a reference to the buffer.
pub unsafe trait Buffer: Send + Sync + 'static {
    fn as_mut_ptr(&self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mutex that can live inside a stream buffer.
///
/// # Safety
///
/// Implementations must provide mutual exclusion between every holder of a
/// reference to the same instance, for as long as it was initialized with
/// [`init_in_place`](SharedMutex::init_in_place) and not yet destroyed.
pub unsafe trait SharedMutex: Send + Sync + 'static {
    type Guard<'a>
    where
        Self: 'a;

    /// Constructs the mutex at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes and aligned for `Self`; whatever was
    /// there before is overwritten without being dropped.
    unsafe fn init_in_place(slot: *mut Self);

    /// Destroys a mutex previously built with `init_in_place`.
    ///
    /// # Safety
    ///
    /// No guard may be alive and no other thread may use the mutex afterwards.
    unsafe fn destroy_in_place(slot: *mut Self);

    fn lock(&self) -> Self::Guard<'_>;
}

/// A condition variable paired with a [`SharedMutex`].
///
/// # Safety
///
/// Same in-place contract as [`SharedMutex`]; `wait*` must atomically release
/// the guard's mutex and re-acquire it before returning.
pub unsafe trait SharedCondvar: Send + Sync + 'static {
    type Mutex: SharedMutex;

    /// # Safety
    ///
    /// See [`SharedMutex::init_in_place`].
    unsafe fn init_in_place(slot: *mut Self);

    /// # Safety
    ///
    /// See [`SharedMutex::destroy_in_place`].
    unsafe fn destroy_in_place(slot: *mut Self);

    fn wait<'a>(
        &self,
        guard: <Self::Mutex as SharedMutex>::Guard<'a>,
    ) -> <Self::Mutex as SharedMutex>::Guard<'a>
    where
        Self::Mutex: 'a;

    /// Waits for at most `timeout`. Spurious wakeups are allowed; callers
    /// re-check their predicate against a deadline.
    fn wait_timeout<'a>(
        &self,
        guard: <Self::Mutex as SharedMutex>::Guard<'a>,
        timeout: Duration,
    ) -> <Self::Mutex as SharedMutex>::Guard<'a>
    where
        Self::Mutex: 'a;

    fn notify_all(&self);
}

/// A named bundle of primitives a stream is parameterized over.
///
/// `NAME` is hashed into the header at format time; attaching with a different
/// bundle is rejected so that, for example, a buffer formatted with
/// process-local mutexes is never driven by process-shared code.
pub trait StreamTraits: Send + Sync + 'static {
    const NAME: &'static str;

    type Buffer: Buffer;
    type Mutex: SharedMutex;
    type Condvar: SharedCondvar<Mutex = Self::Mutex>;
}

/// Stable 32-bit hash of a traits name.
///
/// XORs every byte into the accumulator, rotating through the four byte lanes.
/// It only has to be identical across builds and processes, not strong.
pub fn stable_hash(name: &str) -> u32 {
    name.bytes()
        .enumerate()
        .fold(0u32, |hash, (pos, byte)| {
            hash ^ (u32::from(byte) << ((pos % 4) * 8))
        })
}
