//! Task primitives shared by the controllers and the gateway.
//!
//! - [`group::TaskGroup`]: bounded, cancellable set of concurrent subtasks
//!   tied to the lifetime of the call that spawned them.
//! - [`supervisor::supervise`]: a detached job run under one retry/backoff
//!   policy, reporting progress through [`supervisor::TaskObserver`].

pub mod group;
pub mod supervisor;

pub use group::TaskGroup;
pub use supervisor::{RetryPolicy, TaskObserver, TaskOutcome, supervise};
