//! Primitives for a stream shared between processes.
//!
//! The buffer is a file mapping and the locks are pthread objects marked
//! `PTHREAD_PROCESS_SHARED`, so any process that maps the same file can take
//! part. Condition variables measure timeouts on `CLOCK_MONOTONIC`.

use crate::error::Result;
use crate::traits::{Buffer, SharedCondvar, SharedMutex, StreamTraits};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::path::Path;
use std::time::Duration;
use strata_mmap::MmapRegion;

/// Primitives for a stream living in a shared file mapping.
pub struct SharedMemoryTraits;

impl StreamTraits for SharedMemoryTraits {
    const NAME: &'static str = "strata_sds::SharedMemoryTraits";

    type Buffer = MmapBuffer;
    type Mutex = PthreadMutex;
    type Condvar = PthreadCondvar;
}

/// A stream buffer backed by a memory-mapped file.
pub struct MmapBuffer {
    region: MmapRegion,
}

impl MmapBuffer {
    /// Creates (or truncates) `path` to `len` zeroed bytes.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        Ok(Self {
            region: MmapRegion::create(path, len)?,
        })
    }

    /// Maps an existing file, typically one formatted by another process.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            region: MmapRegion::open(path)?,
        })
    }

    pub fn region(&self) -> &MmapRegion {
        &self.region
    }
}

// SAFETY: mappings are page aligned and stay at a fixed address until dropped.
unsafe impl Buffer for MmapBuffer {
    #[inline]
    fn as_mut_ptr(&self) -> *mut u8 {
        self.region.as_mut_ptr()
    }

    #[inline]
    fn len(&self) -> usize {
        self.region.len()
    }
}

/// A process-shared `pthread_mutex_t`.
#[repr(transparent)]
pub struct PthreadMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: pthread mutexes are designed for concurrent use; this one is also
// marked process-shared.
unsafe impl Send for PthreadMutex {}
unsafe impl Sync for PthreadMutex {}

pub struct PthreadMutexGuard<'a> {
    mutex: &'a PthreadMutex,
}

impl Drop for PthreadMutexGuard<'_> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }
}

unsafe impl SharedMutex for PthreadMutex {
    type Guard<'a> = PthreadMutexGuard<'a>;

    unsafe fn init_in_place(slot: *mut Self) {
        let raw = slot.cast::<libc::pthread_mutex_t>();
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            libc::pthread_mutexattr_init(attr.as_mut_ptr());
            libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
            let rc = libc::pthread_mutex_init(raw, attr.as_ptr());
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                tracing::error!(rc, "pthread_mutex_init failed");
            }
        }
    }

    unsafe fn destroy_in_place(slot: *mut Self) {
        unsafe { libc::pthread_mutex_destroy(slot.cast::<libc::pthread_mutex_t>()) };
    }

    fn lock(&self) -> PthreadMutexGuard<'_> {
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed");
        PthreadMutexGuard { mutex: self }
    }
}

/// A process-shared `pthread_cond_t` on the monotonic clock.
#[repr(transparent)]
pub struct PthreadCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for PthreadCondvar {}
unsafe impl Sync for PthreadCondvar {}

unsafe impl SharedCondvar for PthreadCondvar {
    type Mutex = PthreadMutex;

    unsafe fn init_in_place(slot: *mut Self) {
        let raw = slot.cast::<libc::pthread_cond_t>();
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            libc::pthread_condattr_init(attr.as_mut_ptr());
            libc::pthread_condattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
            libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC);
            let rc = libc::pthread_cond_init(raw, attr.as_ptr());
            libc::pthread_condattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                tracing::error!(rc, "pthread_cond_init failed");
            }
        }
    }

    unsafe fn destroy_in_place(slot: *mut Self) {
        unsafe { libc::pthread_cond_destroy(slot.cast::<libc::pthread_cond_t>()) };
    }

    fn wait<'a>(&self, guard: PthreadMutexGuard<'a>) -> PthreadMutexGuard<'a>
    where
        PthreadMutex: 'a,
    {
        let rc = unsafe { libc::pthread_cond_wait(self.inner.get(), guard.mutex.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_cond_wait failed");
        guard
    }

    fn wait_timeout<'a>(
        &self,
        guard: PthreadMutexGuard<'a>,
        timeout: Duration,
    ) -> PthreadMutexGuard<'a>
    where
        PthreadMutex: 'a,
    {
        let deadline = monotonic_deadline(timeout);
        // ETIMEDOUT is an ordinary outcome; the caller re-checks its deadline.
        unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.inner.get(), &deadline)
        };
        guard
    }

    fn notify_all(&self) {
        unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
    }
}

/// Absolute `CLOCK_MONOTONIC` time `timeout` from now, saturating.
fn monotonic_deadline(timeout: Duration) -> libc::timespec {
    // SAFETY: timespec is plain old data; zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };

    let secs = libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX);
    let mut tv_sec = ts.tv_sec.saturating_add(secs);
    let mut tv_nsec = ts.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if tv_nsec >= 1_000_000_000 {
        tv_sec = tv_sec.saturating_add(1);
        tv_nsec -= 1_000_000_000;
    }
    ts.tv_sec = tv_sec;
    ts.tv_nsec = tv_nsec;
    ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Instant;

    struct Shared {
        mutex: PthreadMutex,
        condvar: PthreadCondvar,
        counter: AtomicU32,
    }

    fn new_shared() -> Arc<Shared> {
        let mut slot = Arc::new(MaybeUninit::<Shared>::uninit());
        let ptr = Arc::get_mut(&mut slot).unwrap().as_mut_ptr();
        unsafe {
            PthreadMutex::init_in_place(std::ptr::addr_of_mut!((*ptr).mutex));
            PthreadCondvar::init_in_place(std::ptr::addr_of_mut!((*ptr).condvar));
            std::ptr::addr_of_mut!((*ptr).counter).write(AtomicU32::new(0));
        }
        unsafe { slot.assume_init() }
    }

    #[test]
    fn mutex_serializes_threads() {
        let shared = new_shared();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let _guard = shared.mutex.lock();
                        let v = shared.counter.load(Ordering::Relaxed);
                        shared.counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker panicked");
        }
        assert_eq!(shared.counter.load(Ordering::Relaxed), 4_000);
    }

    #[test]
    fn timed_wait_returns_after_timeout() {
        let shared = new_shared();
        let start = Instant::now();
        let guard = shared.mutex.lock();
        let guard = shared.condvar.wait_timeout(guard, Duration::from_millis(20));
        drop(guard);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn broadcast_wakes_waiter() {
        let shared = new_shared();
        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut guard = shared.mutex.lock();
                while shared.counter.load(Ordering::Acquire) == 0 {
                    guard = shared.condvar.wait(guard);
                }
            })
        };
        {
            let _guard = shared.mutex.lock();
            shared.counter.store(1, Ordering::Release);
            shared.condvar.notify_all();
        }
        waiter.join().expect("waiter panicked");
    }

    #[test]
    fn deadline_normalizes_nanoseconds() {
        let ts = monotonic_deadline(Duration::new(1, 999_999_999));
        assert!(ts.tv_nsec < 1_000_000_000);
        assert!(ts.tv_nsec >= 0);
    }
}
