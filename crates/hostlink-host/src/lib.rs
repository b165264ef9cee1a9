//! # hostlink-host
//!
//! Crossing into the single-threaded host context.
//!
//! - [`HostDispatcher`]: cloneable, thread-safe submission handle. Work is
//!   queued, never run inline, and each submission returns a [`HostCall`]
//!   future that resolves with the work's outcome.
//! - [`HostPump`]: owned by the host. The host calls [`HostPump::drain`] once
//!   per scheduling quantum; there is no dedicated pump thread.
//!
//! Work items receive `&mut S`, the host-owned state, so anything reachable
//! only through `S` can only be touched on the host thread.

mod error;
mod pump;
mod queue;

pub use error::HostError;
pub use pump::{DrainStats, HostPump};
pub use queue::{host_queue, HostCall, HostDispatcher, QueueCapacity, QueueStats};
