use crate::error::{Result, SdsError};
use crate::traits::{SharedCondvar, SharedMutex};
use std::time::{Duration, Instant};

/// The point in time a blocking call gives up.
///
/// A zero timeout means "wait forever", so `Deadline::after(Duration::ZERO)`
/// never expires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            return Self(None);
        }
        // An overflowing deadline is as good as none.
        Self(Instant::now().checked_add(timeout))
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Blocks on `condvar` until woken or the deadline passes.
    ///
    /// Returns `TimedOut` once the deadline has already passed, so a caller
    /// looping on its predicate gets one last check after every wakeup.
    pub(crate) fn wait<'a, C: SharedCondvar>(
        &self,
        condvar: &C,
        guard: <C::Mutex as SharedMutex>::Guard<'a>,
    ) -> Result<<C::Mutex as SharedMutex>::Guard<'a>>
    where
        C::Mutex: 'a,
    {
        match self.remaining() {
            None => Ok(condvar.wait(guard)),
            Some(left) if left.is_zero() => Err(SdsError::TimedOut),
            Some(left) => Ok(condvar.wait_timeout(guard, left)),
        }
    }
}
