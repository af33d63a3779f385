//! Delayed-task scheduling used for idle release.
//!
//! Cells never sleep or spawn on their own; they hand a task to a
//! [`Scheduler`] and keep the returned [`TimerId`] so the task can be
//! cancelled when a subscriber comes back. Tests use [`ManualScheduler`] to
//! drive time explicitly; long-running processes use [`ThreadScheduler`].

/// Virtual-clock scheduler for deterministic tests.
pub mod manual;
/// Background timer worker.
pub mod thread;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use manual::ManualScheduler;
pub use thread::ThreadScheduler;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle identifying a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Monotonic source of timer ids, one per scheduler.
#[derive(Debug, Default)]
pub(crate) struct TimerIds(AtomicU64);

impl TimerIds {
    pub(crate) fn next(&self) -> TimerId {
        TimerId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Schedule-after-delay and cancel.
///
/// Implementations must never run a task while holding a lock that
/// [`Scheduler::schedule`] or [`Scheduler::cancel`] would take, because tasks
/// commonly schedule or cancel further work.
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending task. Returns false if it already ran or was unknown.
    fn cancel(&self, id: TimerId) -> bool;
}
