use crate::adapter::FormattedAudioStreamAdapter;
use crate::error::AudioError;
use crate::shutdown::ShutdownHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use strata_sds::{Reader, Reference, SdsError, StreamTraits};
use tracing::{debug, error, warn};

/// A worker thread that runs a job repeatedly until the job returns `false`
/// or the thread is stopped.
///
/// Starting a running task stops and joins the previous thread first, so at
/// most one job runs at a time.
pub struct TaskThread {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskThread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start<F>(&mut self, mut job: F) -> Result<(), AudioError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) && job() {}
            })
            .map_err(AudioError::Spawn)?;
        self.handle = Some(handle);
        debug!(name = %self.name, "task thread started");
        Ok(())
    }

    /// Asks the job loop to exit and joins the thread. The job itself is not
    /// interrupted; a blocking job should wait with a timeout.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(name = %self.name, "task thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TaskThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drains a stream reader into a [`FormattedAudioStreamAdapter`] on its own
/// thread.
///
/// The pump reads with `poll` as its blocking timeout so that `shutdown` is
/// noticed promptly. It ends on its own when the writer closes. A reader that
/// falls behind a lossy writer skips ahead to live data.
pub struct StreamPump {
    task: TaskThread,
    shutdown: ShutdownHandle,
}

impl StreamPump {
    pub fn start<T: StreamTraits>(
        mut reader: Reader<T>,
        adapter: Arc<FormattedAudioStreamAdapter>,
        poll: Duration,
        shutdown: ShutdownHandle,
    ) -> Result<Self, AudioError> {
        let frame = reader.word_size();
        let mut buf = vec![0u8; frame * 256];
        let mut task = TaskThread::new(shutdown.name().to_string());

        task.start(move || match reader.read(&mut buf, poll) {
            Ok(words) => {
                adapter.send(&buf[..words * frame]);
                true
            }
            Err(SdsError::TimedOut | SdsError::WouldBlock) => true,
            Err(SdsError::Overrun) => {
                warn!(id = reader.id(), "pump fell behind, skipping to live data");
                match reader.seek(0, Reference::BeforeWriter) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "pump could not recover from overrun");
                        false
                    }
                }
            }
            Err(SdsError::Closed) => {
                debug!(id = reader.id(), "stream closed, pump exiting");
                false
            }
            Err(e) => {
                error!(error = %e, "pump read failed");
                false
            }
        })?;

        Ok(Self { task, shutdown })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Stops the pump thread. Returns `false` if it was already shut down.
    pub fn shutdown(&mut self) -> bool {
        self.shutdown.shutdown(|| self.task.stop())
    }
}
