use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Scheduler, Task, TimerId, TimerIds};

#[derive(Default)]
struct ManualState {
    now: Duration,
    queue: BTreeMap<(Duration, TimerId), Task>,
    due: HashMap<TimerId, Duration>,
}

/// Scheduler whose clock only moves when [`ManualScheduler::advance`] is called.
///
/// Due tasks run on the caller's thread, in due-time order, ties broken by
/// scheduling order.
#[derive(Default)]
pub struct ManualScheduler {
    ids: TimerIds,
    state: Mutex<ManualState>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current virtual time since construction.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Move the clock forward by `by`, running every task that comes due.
    ///
    /// Returns the number of tasks run. Tasks scheduled by a running task are
    /// picked up in the same call if they fall due before the target time.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = 0;

        loop {
            let task = {
                let mut state = self.lock();
                let Some((&(due, id), _)) = state.queue.first_key_value() else {
                    break;
                };
                if due > target {
                    break;
                }
                state.now = due;
                state.due.remove(&id);
                state.queue.remove(&(due, id))
            };

            if let Some(task) = task {
                task();
                ran += 1;
            }
        }

        self.lock().now = target;
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = self.ids.next();
        let mut state = self.lock();
        let due = state.now + delay;
        state.queue.insert((due, id), task);
        state.due.insert(id, due);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.lock();
        match state.due.remove(&id) {
            Some(due) => state.queue.remove(&(due, id)).is_some(),
            None => false,
        }
    }
}
