//! Deferred stop scheduling

use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default grace period between a stop request and transport teardown
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(1000);

/// Shortest accepted cleanup delay
pub const MIN_CLEANUP_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on any deferred stop
pub const MAX_STOP_DELAY: Duration = Duration::from_secs(30);

/// Clamp a cleanup delay in milliseconds into the accepted range
pub fn clamp_cleanup_delay(millis: u32) -> Duration {
    Duration::from_millis(u64::from(millis)).clamp(MIN_CLEANUP_DELAY, MAX_STOP_DELAY)
}

#[derive(Debug)]
struct ArmedStop {
    generation: u64,
    task: JoinHandle<()>,
}

/// At most one pending teardown, tagged with the session generation it
/// belongs to
#[derive(Debug, Default)]
pub(crate) struct StopTimer {
    armed: Option<ArmedStop>,
}

impl StopTimer {
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Schedule `fire` after `delay`
    ///
    /// Returns false without rescheduling if a teardown is already pending.
    pub(crate) fn arm<F>(&mut self, generation: u64, delay: Duration, fire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.armed.is_some() {
            return false;
        }

        let delay = delay.min(MAX_STOP_DELAY);
        debug!(generation, ?delay, "Arming deferred stop");
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        self.armed = Some(ArmedStop { generation, task });
        true
    }

    /// Abort the pending teardown
    pub(crate) fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                debug!(generation = armed.generation, "Cancelling deferred stop");
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Disarm without aborting; used by the firing task itself
    pub(crate) fn take(&mut self) -> Option<u64> {
        self.armed.take().map(|armed| armed.generation)
    }
}
