use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::queue::Shared;

/// What one call to [`HostPump::drain`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Queued items executed this tick.
    pub executed: usize,
    /// Nested asynchronous operations that finished this tick.
    pub nested_completed: usize,
    /// Nested asynchronous operations still waiting.
    pub nested_pending: usize,
}

/// Host-side end of the queue. Not cloneable: exactly one host drives it.
///
/// Dropping the pump stops the queue. Items still queued are discarded and
/// their callers see [`HostError::PumpStopped`](crate::HostError::PumpStopped).
pub struct HostPump<S> {
    shared: Arc<Shared<S>>,
    nested: FuturesUnordered<BoxFuture<'static, ()>>,
    runtime: Option<Handle>,
    ticks: u64,
}

impl<S> HostPump<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self {
            shared,
            nested: FuturesUnordered::new(),
            runtime: None,
            ticks: 0,
        }
    }

    /// Enter `handle` while draining, so host work can use tokio timers and
    /// spawn tasks even though the host thread is not a runtime worker.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Number of completed drains.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn nested_pending(&self) -> usize {
        self.nested.len()
    }

    /// Run every item queued at the start of this call, in submission order,
    /// then give each nested asynchronous operation a chance to progress.
    ///
    /// Never blocks waiting for work. Call once per host tick.
    pub fn drain(&mut self, state: &mut S) -> DrainStats {
        let _entered = self.runtime.as_ref().map(Handle::enter);

        let backlog = self.shared.take_backlog();
        let executed = backlog.len();
        for job in backlog {
            if let Some(nested) = job(state) {
                self.nested.push(nested);
            }
        }
        self.shared.stats.record_executed(executed);

        let mut nested_completed = 0;
        if !self.nested.is_empty() {
            // Progress is driven by the next drain, not by wakeups.
            let mut cx = Context::from_waker(futures::task::noop_waker_ref());
            while let Poll::Ready(Some(())) = self.nested.poll_next_unpin(&mut cx) {
                nested_completed += 1;
            }
        }

        self.ticks += 1;
        let stats = DrainStats {
            executed,
            nested_completed,
            nested_pending: self.nested.len(),
        };
        if executed > 0 || nested_completed > 0 {
            trace!(
                tick = self.ticks,
                executed,
                nested_completed,
                nested_pending = stats.nested_pending,
                "host drain"
            );
        }
        stats
    }
}

impl<S> Drop for HostPump<S> {
    fn drop(&mut self) {
        let discarded = self.shared.close().len();
        if discarded > 0 || !self.nested.is_empty() {
            debug!(
                discarded,
                nested = self.nested.len(),
                "host pump stopped with work outstanding"
            );
        }
    }
}
