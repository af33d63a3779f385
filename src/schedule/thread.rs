use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex as PendingLock;
use tracing::{trace, warn};

use super::{Scheduler, Task, TimerId, TimerIds};

enum ControlMsg {
    Schedule { id: TimerId, due: Instant, task: Task },
    Cancel { id: TimerId },
}

/// Scheduler backed by a dedicated timer thread.
///
/// Tasks run on the worker thread. The worker exits once the scheduler is
/// dropped; tasks still pending at that point are discarded.
pub struct ThreadScheduler {
    ids: TimerIds,
    /// Ids scheduled but not yet run or cancelled. Whoever removes an id
    /// first (the worker or `cancel`) decides whether the task runs.
    pending: Arc<PendingLock<HashSet<TimerId>>>,
    control_tx: Sender<ControlMsg>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler").finish_non_exhaustive()
    }
}

impl ThreadScheduler {
    /// Spawn the timer worker.
    #[must_use]
    pub fn new() -> Self {
        let (control_tx, control_rx) = unbounded::<ControlMsg>();
        let pending = Arc::new(PendingLock::new(HashSet::new()));

        let worker_pending = Arc::clone(&pending);
        let join = thread::Builder::new()
            .name("statecell-timer".to_string())
            .spawn(move || worker_loop(&control_rx, &worker_pending))
            .expect("failed to spawn statecell timer worker");

        Self {
            ids: TimerIds::default(),
            pending,
            control_tx,
            join: Mutex::new(Some(join)),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = self.ids.next();
        let due = Instant::now() + delay;
        self.pending.lock().insert(id);
        if self.control_tx.send(ControlMsg::Schedule { id, due, task }).is_err() {
            self.pending.lock().remove(&id);
            warn!(timer = %id, "timer worker is gone; task dropped");
        }
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        if !self.pending.lock().remove(&id) {
            return false;
        }
        // Only frees the queued task early; the worker already skips it.
        let _ = self.control_tx.send(ControlMsg::Cancel { id });
        true
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        // Disconnect the channel so the worker exits, then detach it.
        let (dummy_tx, _) = unbounded::<ControlMsg>();
        drop(std::mem::replace(&mut self.control_tx, dummy_tx));

        if let Ok(mut guard) = self.join.lock() {
            drop(guard.take());
        }
    }
}

fn worker_loop(control_rx: &Receiver<ControlMsg>, pending: &PendingLock<HashSet<TimerId>>) {
    let mut queue: BTreeMap<(Instant, TimerId), Task> = BTreeMap::new();
    let mut due_by_id: HashMap<TimerId, Instant> = HashMap::new();

    loop {
        let next_due = queue.keys().next().map(|&(due, _)| due);

        let msg = match next_due {
            Some(due) => {
                let wait = due.saturating_duration_since(Instant::now());
                match control_rx.recv_timeout(wait) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match control_rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        match msg {
            Some(ControlMsg::Schedule { id, due, task }) => {
                queue.insert((due, id), task);
                due_by_id.insert(id, due);
            }
            Some(ControlMsg::Cancel { id }) => {
                if let Some(due) = due_by_id.remove(&id) {
                    queue.remove(&(due, id));
                }
            }
            None => {}
        }

        let now = Instant::now();
        while let Some(entry) = queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let (_, id) = *entry.key();
            let task = entry.remove();
            due_by_id.remove(&id);
            if !pending.lock().remove(&id) {
                continue;
            }

            trace!(timer = %id, "running timer task");
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                warn!(timer = %id, "timer task panicked");
            }
        }
    }
}
