use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{panic_message, HostError};
use crate::pump::HostPump;

/// A queued unit of host work. Returns the nested future for asynchronous
/// submissions so the pump can keep driving it on later ticks.
pub(crate) type Job<S> = Box<dyn FnOnce(&mut S) -> Option<BoxFuture<'static, ()>> + Send>;

/// How many items may wait in the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueCapacity {
    /// No limit. Sustained overload grows memory without bound.
    #[default]
    Unbounded,
    /// Submissions beyond this many pending items are rejected with
    /// [`HostError::QueueFull`].
    Bounded(usize),
}

impl QueueCapacity {
    /// `0` means unbounded.
    pub fn from_limit(limit: usize) -> Self {
        if limit == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(limit)
        }
    }
}

#[derive(Default)]
struct StatsInner {
    depth: AtomicUsize,
    submitted: AtomicU64,
    executed: AtomicU64,
}

/// Read-only counters for a host queue, independent of the state type.
#[derive(Clone, Default)]
pub struct QueueStats {
    inner: Arc<StatsInner>,
}

impl QueueStats {
    /// Items waiting for the next drain.
    pub fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::Relaxed)
    }

    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    pub fn executed(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    fn record_submitted(&self) {
        let _ = self.inner.depth.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_taken(&self, n: usize) {
        let _ = self.inner.depth.fetch_sub(n, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self, n: usize) {
        let _ = self.inner.executed.fetch_add(n as u64, Ordering::Relaxed);
    }
}

struct QueueInner<S> {
    jobs: VecDeque<Job<S>>,
    open: bool,
}

pub(crate) struct Shared<S> {
    inner: Mutex<QueueInner<S>>,
    capacity: QueueCapacity,
    pub(crate) stats: QueueStats,
}

impl<S> Shared<S> {
    /// Take everything queued right now. Items submitted while this backlog
    /// runs wait for the next tick.
    pub(crate) fn take_backlog(&self) -> VecDeque<Job<S>> {
        let jobs = std::mem::take(&mut self.inner.lock().jobs);
        self.stats.record_taken(jobs.len());
        jobs
    }

    /// Refuse further submissions and hand back whatever was still queued.
    pub(crate) fn close(&self) -> VecDeque<Job<S>> {
        let jobs = {
            let mut inner = self.inner.lock();
            inner.open = false;
            std::mem::take(&mut inner.jobs)
        };
        self.stats.record_taken(jobs.len());
        jobs
    }

    fn push(&self, job: Job<S>) -> Result<(), HostError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(HostError::PumpStopped);
        }
        if let QueueCapacity::Bounded(capacity) = self.capacity {
            if inner.jobs.len() >= capacity {
                return Err(HostError::QueueFull { capacity });
            }
        }
        inner.jobs.push_back(job);
        self.stats.record_submitted();
        Ok(())
    }
}

/// Create a connected dispatcher/pump pair for host state `S`.
pub fn host_queue<S: 'static>(capacity: QueueCapacity) -> (HostDispatcher<S>, HostPump<S>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(QueueInner {
            jobs: VecDeque::new(),
            open: true,
        }),
        capacity,
        stats: QueueStats::default(),
    });
    let dispatcher = HostDispatcher {
        shared: Arc::clone(&shared),
    };
    (dispatcher, HostPump::new(shared))
}

/// Submission handle for the host queue. Cheap to clone and usable from any
/// thread; submitting never waits for the host.
pub struct HostDispatcher<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for HostDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: 'static> HostDispatcher<S> {
    /// Run `f` on the host and observe its completion.
    pub fn run<F>(&self, f: F) -> HostCall<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.call(f)
    }

    /// Run `f` on the host and return its value.
    pub fn call<R, F>(&self, f: F) -> HostCall<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state: &mut S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(state)))
                .map_err(|payload| HostError::Panicked(panic_message(payload.as_ref())));
            let _ = tx.send(outcome);
            None
        });
        self.submit(job, rx)
    }

    /// Run a fallible `f` on the host; an `Err` resolves the call with
    /// [`HostError::Failed`].
    pub fn try_call<R, E, F>(&self, f: F) -> HostCall<R>
    where
        F: FnOnce(&mut S) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: fmt::Display + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state: &mut S| {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(state))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(HostError::Failed(e.to_string())),
                Err(payload) => Err(HostError::Panicked(panic_message(payload.as_ref()))),
            };
            let _ = tx.send(outcome);
            None
        });
        self.submit(job, rx)
    }

    /// Start asynchronous work on the host. `f` runs synchronously during a
    /// drain; the future it returns is then driven by the pump on this and
    /// later ticks, and the call resolves only once that future completes.
    ///
    /// The future cannot borrow the host state. Work that needs the state
    /// again after an await point submits a new item.
    pub fn call_async<R, F, Fut>(&self, f: F) -> HostCall<R>
    where
        F: FnOnce(&mut S) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state: &mut S| {
            match panic::catch_unwind(AssertUnwindSafe(|| f(state))) {
                Ok(nested) => Some(
                    async move {
                        let outcome = AssertUnwindSafe(nested).catch_unwind().await.map_err(
                            |payload| HostError::Panicked(panic_message(payload.as_ref())),
                        );
                        let _ = tx.send(outcome);
                    }
                    .boxed(),
                ),
                Err(payload) => {
                    let _ = tx.send(Err(HostError::Panicked(panic_message(payload.as_ref()))));
                    None
                }
            }
        });
        self.submit(job, rx)
    }

    /// Items waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.shared.stats.depth()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.clone()
    }

    fn submit<R>(&self, job: Job<S>, rx: oneshot::Receiver<Result<R, HostError>>) -> HostCall<R> {
        match self.shared.push(job) {
            Ok(()) => HostCall {
                state: CallState::Waiting(rx),
            },
            Err(err) => {
                warn!(error = %err, "host submission rejected");
                HostCall {
                    state: CallState::Rejected(Some(err)),
                }
            }
        }
    }
}

enum CallState<R> {
    Waiting(oneshot::Receiver<Result<R, HostError>>),
    Rejected(Option<HostError>),
}

/// Outcome of one submission. Stays pending until the host drains the item;
/// no timeout is applied here.
///
/// Dropping a `HostCall` does not cancel the work.
#[must_use = "a HostCall does nothing unless awaited, but the work still runs"]
pub struct HostCall<R> {
    state: CallState<R>,
}

impl<R> Unpin for HostCall<R> {}

impl<R> Future for HostCall<R> {
    type Output = Result<R, HostError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CallState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(HostError::PumpStopped))),
            CallState::Rejected(err) => {
                Poll::Ready(Err(err.take().unwrap_or(HostError::PumpStopped)))
            }
        }
    }
}
