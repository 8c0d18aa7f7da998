//! Tracking of objects that must be shut down explicitly.
//!
//! Objects that own threads or stream handles carry a [`ShutdownHandle`].
//! Shutting one down twice, or dropping it without shutting it down, is
//! logged as an error. A test harness can additionally own a
//! [`ShutdownMonitor`] and ask it which objects were never shut down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Registry of live objects, owned by whoever wants to audit shutdown.
#[derive(Debug, Default)]
pub struct ShutdownMonitor {
    live: Mutex<BTreeMap<u64, String>>,
    next_id: AtomicU64,
}

impl ShutdownMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts tracking an object called `name`.
    pub fn register(self: &Arc<Self>, name: impl Into<String>) -> ShutdownHandle {
        let name = name.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, name.clone());
        ShutdownHandle {
            monitor: Some(Arc::clone(self)),
            id,
            name,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Names of registered objects that have not been shut down, in
    /// registration order.
    pub fn outstanding(&self) -> Vec<String> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn release(&self, id: u64) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Per-object shutdown state.
#[derive(Debug)]
pub struct ShutdownHandle {
    monitor: Option<Arc<ShutdownMonitor>>,
    id: u64,
    name: String,
    is_shutdown: AtomicBool,
}

impl ShutdownHandle {
    /// A handle that only logs misuse and reports to no monitor.
    pub fn untracked(name: impl Into<String>) -> Self {
        Self {
            monitor: None,
            id: 0,
            name: name.into(),
            is_shutdown: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    /// Runs `teardown` the first time it is called and returns `true`.
    /// Later calls log an error and return `false` without running it.
    pub fn shutdown(&self, teardown: impl FnOnce()) -> bool {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            error!(name = %self.name, "shutdown called more than once");
            return false;
        }
        debug!(name = %self.name, "shutting down");
        teardown();
        if let Some(monitor) = &self.monitor {
            monitor.release(self.id);
        }
        true
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            error!(name = %self.name, "dropped without shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn shutdown_runs_teardown_once() {
        let handle = ShutdownHandle::untracked("pump");
        let runs = Cell::new(0);
        assert!(handle.shutdown(|| runs.set(runs.get() + 1)));
        assert!(!handle.shutdown(|| runs.set(runs.get() + 1)));
        assert_eq!(runs.get(), 1);
        assert!(handle.is_shutdown());
    }

    #[test]
    fn monitor_reports_objects_never_shut_down() {
        let monitor = ShutdownMonitor::new();
        let a = monitor.register("source");
        let b = monitor.register("sink");
        let c = monitor.register("pump");

        a.shutdown(|| {});
        drop(b);
        assert_eq!(monitor.outstanding(), vec!["sink".to_string(), "pump".to_string()]);

        c.shutdown(|| {});
        assert_eq!(monitor.outstanding(), vec!["sink".to_string()]);
    }
}
