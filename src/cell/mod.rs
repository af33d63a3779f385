//! Value cells: one named slot with subscriber fan-out and idle release.
//!
//! A [`ValueCell`] notifies its subscribers only when the *content* of the
//! stored value changes. Every non-forced write is fingerprinted and compared
//! against the fingerprint of the stored value; equal fingerprints mean the
//! write is dropped without touching the slot.
//!
//! # Lifecycle
//!
//! - **Active**: at least one subscriber or update handler is registered.
//! - **Grace**: the last subscriber/handler left and a release timer is armed.
//!   Any new subscriber/handler cancels the timer.
//! - **Idle**: the timer fired (value released unless the cell is cached) or
//!   the cell was never subscribed to. A later write stores a value again.
//!
//! # Concurrency
//!
//! Writes to one cell are serialized by a reentrant write gate held across
//! compare, store and fan-out, so subscribers see writes in the order they
//! were stored and the last notification always matches the stored value.
//! The slot mutex is released before callbacks run. A callback may read the
//! cell, subscribe to it, or write to it from the same thread.

/// Subscription handles and guards.
pub mod subscription;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::{StateConfig, DEFAULT_RELEASE_GRACE};
use crate::error::StateResult;
use crate::fingerprint::{fingerprint, fingerprint_slot, Fingerprint};
use crate::schedule::{Scheduler, TimerId};

pub use subscription::{HandlerId, ScopedSubscription, SubscriptionId};

/// Values a cell can hold.
pub trait StateValue: Serialize + Clone + Send + Sync + 'static {}

impl<T> StateValue for T where T: Serialize + Clone + Send + Sync + 'static {}

/// Subscriber or update-handler callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Invoked each time a cell goes through idle release.
pub type ReleaseCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-write flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Flag the cell so idle release keeps its value. Sticky.
    pub cache: bool,
    /// Skip the fingerprint comparison and always notify.
    pub force: bool,
}

impl WriteOptions {
    /// Options with only the cache flag set.
    #[must_use]
    pub const fn cached() -> Self {
        Self {
            cache: true,
            force: false,
        }
    }

    /// Options with only the force flag set.
    #[must_use]
    pub const fn forced() -> Self {
        Self {
            cache: false,
            force: true,
        }
    }

    /// Returns a copy with the cache flag replaced.
    #[must_use]
    pub const fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Returns a copy with the force flag replaced.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Content matched the stored value; nothing was stored or notified.
    Unchanged,
    /// The value was stored and fanned out. `failed` counts callbacks that
    /// panicked; they were skipped and fan-out continued.
    Notified {
        /// Callbacks that returned normally.
        delivered: usize,
        /// Callbacks that panicked.
        failed: usize,
    },
}

impl WriteOutcome {
    /// Returns true if the write replaced the stored value.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        matches!(self, Self::Notified { .. })
    }
}

/// Coarse lifecycle state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Has at least one subscriber or update handler.
    Active,
    /// Inactive with a release timer armed.
    Grace,
    /// Inactive with no timer pending.
    Idle,
}

/// Result of [`ValueCell::attach`].
#[derive(Debug, Clone)]
pub struct Attachment<T> {
    /// Value after the initial value (if any) was applied.
    pub value: Option<T>,
    /// Pass to [`ValueCell::unsubscribe`] on teardown.
    pub subscription: SubscriptionId,
}

struct Slots<T> {
    value: Option<Arc<T>>,
    /// `None` until first needed; recomputed lazily after a forced write.
    fingerprint: Option<Fingerprint>,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
    handlers: Vec<(HandlerId, Callback<T>)>,
    cache: bool,
    release_timer: Option<TimerId>,
    /// Bumped whenever a release timer is armed or cancelled; a timer task
    /// only acts if its generation is still current.
    generation: u64,
    on_release: Option<ReleaseCallback>,
}

impl<T> Slots<T> {
    fn is_active(&self) -> bool {
        !self.subscribers.is_empty() || !self.handlers.is_empty()
    }
}

pub(crate) struct CellInner<T> {
    label: String,
    grace: Duration,
    scheduler: Arc<dyn Scheduler>,
    write_gate: ReentrantMutex<()>,
    slots: Mutex<Slots<T>>,
}

impl<T: Send + Sync + 'static> CellInner<T> {
    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_release(&self, slots: &mut Slots<T>) {
        if let Some(timer) = slots.release_timer.take() {
            slots.generation += 1;
            self.scheduler.cancel(timer);
            trace!(key = %self.label, %timer, "release cancelled");
        }
    }

    fn arm_release(this: &Arc<Self>, slots: &mut Slots<T>) {
        this.cancel_release(slots);
        slots.generation += 1;

        let generation = slots.generation;
        let weak = Arc::downgrade(this);
        let timer = this.scheduler.schedule(
            this.grace,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.release_if_idle(generation);
                }
            }),
        );
        slots.release_timer = Some(timer);
        trace!(key = %this.label, %timer, grace_ms = this.grace.as_millis() as u64, "release armed");
    }

    fn release_if_idle(&self, generation: u64) {
        let callback = {
            let mut slots = self.lock();
            if slots.generation != generation || slots.release_timer.is_none() {
                return;
            }
            slots.release_timer = None;
            if slots.is_active() {
                return;
            }
            if !slots.cache {
                slots.value = None;
                slots.fingerprint = Some(Fingerprint::released());
            }
            debug!(key = %self.label, cached = slots.cache, "idle cell released");
            slots.on_release.clone()
        };

        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                warn!(key = %self.label, "release callback panicked");
            }
        }
    }

    pub(crate) fn remove_subscriber(this: &Arc<Self>, id: SubscriptionId) -> bool {
        let mut slots = this.lock();
        let before = slots.subscribers.len();
        slots.subscribers.retain(|(sid, _)| *sid != id);
        let removed = slots.subscribers.len() != before;

        if removed {
            debug!(key = %this.label, subscription = %id, "unsubscribed");
            if !slots.is_active() {
                Self::arm_release(this, &mut slots);
            }
        }
        removed
    }
}

fn fan_out<T>(label: &str, callbacks: &[Callback<T>], value: &T) -> (usize, usize) {
    let mut delivered = 0;
    let mut failed = 0;
    for callback in callbacks {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
            Ok(()) => delivered += 1,
            Err(_) => {
                failed += 1;
                warn!(key = %label, "subscriber callback panicked; continuing fan-out");
            }
        }
    }
    (delivered, failed)
}

/// A single slot holding one value plus its subscribers.
///
/// Cloning a `ValueCell` creates another handle to the **same** slot.
pub struct ValueCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: StateValue> std::fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.inner.lock();
        f.debug_struct("ValueCell")
            .field("label", &self.inner.label)
            .field("set", &slots.value.is_some())
            .field("subscribers", &slots.subscribers.len())
            .field("handlers", &slots.handlers.len())
            .field("cache", &slots.cache)
            .field("release_pending", &slots.release_timer.is_some())
            .finish()
    }
}

/// Builder for [`ValueCell`].
pub struct CellBuilder<T> {
    scheduler: Arc<dyn Scheduler>,
    value: Option<T>,
    cache: bool,
    on_release: Option<ReleaseCallback>,
    grace: Duration,
    label: String,
}

impl<T: StateValue> CellBuilder<T> {
    /// Initial value.
    #[must_use]
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Start with the cache flag set.
    #[must_use]
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Callback run after each idle release.
    #[must_use]
    pub fn on_release(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Arc::new(callback));
        self
    }

    /// How long the cell waits after its last subscriber leaves.
    #[must_use]
    pub fn release_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Apply shared settings.
    #[must_use]
    pub fn config(mut self, config: &StateConfig) -> Self {
        self.grace = config.release_grace;
        self
    }

    /// Name used in log fields.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Finish building the cell.
    #[must_use]
    pub fn build(self) -> ValueCell<T> {
        ValueCell {
            inner: Arc::new(CellInner {
                label: self.label,
                grace: self.grace,
                scheduler: self.scheduler,
                write_gate: ReentrantMutex::new(()),
                slots: Mutex::new(Slots {
                    value: self.value.map(Arc::new),
                    fingerprint: None,
                    subscribers: Vec::new(),
                    handlers: Vec::new(),
                    cache: self.cache,
                    release_timer: None,
                    generation: 0,
                    on_release: self.on_release,
                }),
            }),
        }
    }
}

impl<T: StateValue> ValueCell<T> {
    /// Create an empty cell with default settings.
    #[must_use]
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::builder(scheduler).build()
    }

    /// Start configuring a cell.
    #[must_use]
    pub fn builder(scheduler: Arc<dyn Scheduler>) -> CellBuilder<T> {
        CellBuilder {
            scheduler,
            value: None,
            cache: false,
            on_release: None,
            grace: DEFAULT_RELEASE_GRACE,
            label: String::new(),
        }
    }

    /// Name used in log fields.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Current value, if set.
    #[must_use]
    pub fn read(&self) -> Option<T> {
        self.inner.lock().value.as_deref().cloned()
    }

    /// Store `value` and notify subscribers if its content differs from the
    /// stored value (or unconditionally with `force`).
    ///
    /// Fails only if `value` (or a never-fingerprinted stored value) cannot be
    /// canonicalized; the cell is left untouched in that case.
    pub fn write(&self, value: T, options: WriteOptions) -> StateResult<WriteOutcome> {
        let incoming = if options.force {
            None
        } else {
            Some(fingerprint(&value)?)
        };

        let _gate = self.inner.write_gate.lock();
        let value = Arc::new(value);
        let callbacks: Vec<Callback<T>> = {
            let mut slots = self.inner.lock();

            if incoming.is_some() && slots.fingerprint.is_none() {
                slots.fingerprint = Some(fingerprint_slot(slots.value.as_deref())?);
            }

            if options.cache && !slots.cache {
                slots.cache = true;
                debug!(key = %self.inner.label, "cell flagged for caching");
            }

            if let Some(incoming) = &incoming {
                if slots.fingerprint.as_ref() == Some(incoming) {
                    trace!(key = %self.inner.label, fingerprint = %incoming, "write deduplicated");
                    return Ok(WriteOutcome::Unchanged);
                }
            }

            slots.fingerprint = incoming;
            slots.value = Some(Arc::clone(&value));

            slots
                .subscribers
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .chain(slots.handlers.iter().map(|(_, cb)| Arc::clone(cb)))
                .collect()
        };

        let (delivered, failed) = fan_out(&self.inner.label, &callbacks, &*value);
        trace!(key = %self.inner.label, delivered, failed, forced = options.force, "write notified");

        Ok(WriteOutcome::Notified { delivered, failed })
    }

    /// Register a subscriber. Cancels any pending idle release.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut slots = self.inner.lock();
        slots.subscribers.push((id, Arc::new(callback)));
        self.inner.cancel_release(&mut slots);
        debug!(key = %self.inner.label, subscription = %id, "subscribed");
        id
    }

    /// Like [`ValueCell::subscribe`], but unsubscribes when the guard drops.
    pub fn subscribe_scoped(
        &self,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> ScopedSubscription<T> {
        let id = self.subscribe(callback);
        ScopedSubscription::new(id, Arc::downgrade(&self.inner))
    }

    /// Remove a subscriber. Arms idle release if the cell became inactive.
    ///
    /// Returns false for an unknown (or already removed) id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        CellInner::remove_subscriber(&self.inner, id)
    }

    /// Register an update handler. Handlers count toward activity and are
    /// notified after subscribers.
    pub fn on_update(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId::new();
        let mut slots = self.inner.lock();
        slots.handlers.push((id, Arc::new(callback)));
        self.inner.cancel_release(&mut slots);
        debug!(key = %self.inner.label, handler = %id, "update handler added");
        id
    }

    /// Remove an update handler. Arms idle release if the cell became inactive.
    pub fn off_update(&self, id: HandlerId) -> bool {
        let mut slots = self.inner.lock();
        let before = slots.handlers.len();
        slots.handlers.retain(|(hid, _)| *hid != id);
        let removed = slots.handlers.len() != before;

        if removed {
            debug!(key = %self.inner.label, handler = %id, "update handler removed");
            if !slots.is_active() {
                CellInner::arm_release(&self.inner, &mut slots);
            }
        }
        removed
    }

    /// Apply an optional initial value, then subscribe.
    ///
    /// The initial value goes through [`ValueCell::write`], so many consumers
    /// attaching with the same initial value notify at most once.
    pub fn attach(
        &self,
        initial: Option<T>,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> StateResult<Attachment<T>> {
        if let Some(initial) = initial {
            self.write(initial, WriteOptions::default())?;
        }
        let subscription = self.subscribe(callback);
        Ok(Attachment {
            value: self.read(),
            subscription,
        })
    }

    /// Install or replace the release callback.
    pub fn set_on_release(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().on_release = Some(Arc::new(callback));
    }

    /// True iff the cell has subscribers or update handlers.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        let slots = self.inner.lock();
        if slots.is_active() {
            Lifecycle::Active
        } else if slots.release_timer.is_some() {
            Lifecycle::Grace
        } else {
            Lifecycle::Idle
        }
    }

    /// True once any write set the cache flag.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.inner.lock().cache
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Number of registered update handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Fingerprint currently cached for the stored value, if computed.
    #[must_use]
    pub fn cached_fingerprint(&self) -> Option<Fingerprint> {
        self.inner.lock().fingerprint.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Value};

    use super::*;
    use crate::schedule::ManualScheduler;

    fn setup<T: StateValue>() -> (Arc<ManualScheduler>, ValueCell<T>) {
        let sched = Arc::new(ManualScheduler::new());
        let cell = ValueCell::builder(sched.clone()).label("test").build();
        (sched, cell)
    }

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    const GRACE: Duration = DEFAULT_RELEASE_GRACE;

    #[test]
    fn test_read_empty() {
        let (_, cell) = setup::<i32>();
        assert_eq!(cell.read(), None);
        assert_eq!(cell.lifecycle(), Lifecycle::Idle);
    }

    #[test]
    fn test_dedup_structural_equal() {
        let (_, cell) = setup::<Value>();
        cell.write(json!({"x": 1}), WriteOptions::default()).unwrap();

        let (seen, cb) = recorder::<Value>();
        cell.subscribe(cb);

        let outcome = cell.write(json!({"x": 1}), WriteOptions::default()).unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(seen.lock().unwrap().is_empty());

        let outcome = cell.write(json!({"x": 2}), WriteOptions::default()).unwrap();
        assert_eq!(outcome, WriteOutcome::Notified { delivered: 1, failed: 0 });
        assert_eq!(*seen.lock().unwrap(), vec![json!({"x": 2})]);
    }

    #[test]
    fn test_force_always_notifies() {
        let (_, cell) = setup::<i32>();
        cell.write(5, WriteOptions::default()).unwrap();
        let (seen, cb) = recorder::<i32>();
        cell.subscribe(cb);

        assert!(cell.write(5, WriteOptions::forced()).unwrap().is_changed());
        assert!(cell.write(5, WriteOptions::forced()).unwrap().is_changed());
        assert_eq!(*seen.lock().unwrap(), vec![5, 5]);
        // Forced writes leave the fingerprint to be recomputed lazily.
        assert_eq!(cell.cached_fingerprint(), None);
        assert_eq!(cell.write(5, WriteOptions::default()).unwrap(), WriteOutcome::Unchanged);
        assert!(cell.cached_fingerprint().is_some());
    }

    #[test]
    fn test_first_write_on_unset_cell_notifies() {
        let (_, cell) = setup::<Option<i32>>();
        let (seen, cb) = recorder::<Option<i32>>();
        cell.subscribe(cb);
        // `None` inside the value is null, distinct from the unset slot.
        assert!(cell.write(None, WriteOptions::default()).unwrap().is_changed());
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_notification_order_is_subscription_order() {
        let (_, cell) = setup::<i32>();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            cell.subscribe(move |v: &i32| log.lock().unwrap().push(format!("{name}{v}")));
        }
        let log_h = Arc::clone(&log);
        cell.on_update(move |v: &i32| log_h.lock().unwrap().push(format!("h{v}")));

        cell.write(1, WriteOptions::default()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a1", "b1", "c1", "h1"]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let (_, cell) = setup::<i32>();
        let hits = Arc::new(AtomicUsize::new(0));
        cell.subscribe(|_: &i32| panic!("bad consumer"));
        let h = Arc::clone(&hits);
        cell.subscribe(move |_: &i32| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = cell.write(1, WriteOptions::default()).unwrap();
        assert_eq!(outcome, WriteOutcome::Notified { delivered: 1, failed: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cell.read(), Some(1));
    }

    #[test]
    fn test_callback_can_read_and_write_same_cell() {
        let (_, cell) = setup::<i32>();
        let reader = cell.clone();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let obs = Arc::clone(&observed);
        cell.subscribe(move |v: &i32| {
            obs.lock().unwrap().push(reader.read());
            if *v < 3 {
                reader.write(v + 1, WriteOptions::default()).unwrap();
            }
        });

        cell.write(1, WriteOptions::default()).unwrap();
        assert_eq!(cell.read(), Some(3));
        assert_eq!(*observed.lock().unwrap(), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_concurrent_writes_notify_in_store_order() {
        use crossbeam_channel::bounded;

        let (_, cell) = setup::<i32>();
        let (entered_tx, entered_rx) = bounded::<()>(1);
        let (resume_tx, resume_rx) = bounded::<()>(1);
        let (seen, record) = recorder::<i32>();
        cell.subscribe(move |v: &i32| {
            record(v);
            if *v == 1 {
                entered_tx.send(()).unwrap();
                resume_rx.recv().unwrap();
            }
        });

        let first = {
            let cell = cell.clone();
            std::thread::spawn(move || cell.write(1, WriteOptions::default()).unwrap())
        };
        entered_rx.recv().unwrap();

        let (done_tx, done_rx) = bounded::<WriteOutcome>(1);
        let second = {
            let cell = cell.clone();
            std::thread::spawn(move || done_tx.send(cell.write(2, WriteOptions::default()).unwrap()).unwrap())
        };

        // The second writer waits for the first fan-out to finish.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        resume_tx.send(()).unwrap();

        assert!(first.join().unwrap().is_changed());
        second.join().unwrap();
        assert!(done_rx.recv().unwrap().is_changed());

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(cell.read(), Some(2));
    }

    #[test]
    fn test_idle_release_clears_value() {
        let (sched, cell) = setup::<i32>();
        let id = cell.subscribe(|_: &i32| {});
        cell.write(7, WriteOptions::default()).unwrap();

        assert!(cell.unsubscribe(id));
        assert_eq!(cell.lifecycle(), Lifecycle::Grace);

        sched.advance(GRACE - Duration::from_millis(1));
        assert_eq!(cell.read(), Some(7));

        sched.advance(Duration::from_millis(1));
        assert_eq!(cell.read(), None);
        assert_eq!(cell.lifecycle(), Lifecycle::Idle);
        assert!(cell.cached_fingerprint().unwrap().is_released());
    }

    #[test]
    fn test_released_cell_accepts_same_value_again() {
        let (sched, cell) = setup::<i32>();
        let id = cell.subscribe(|_: &i32| {});
        cell.write(7, WriteOptions::default()).unwrap();
        cell.unsubscribe(id);
        sched.advance(GRACE);

        assert!(cell.write(7, WriteOptions::default()).unwrap().is_changed());
        assert_eq!(cell.read(), Some(7));
    }

    #[test]
    fn test_cache_flag_survives_release() {
        let (sched, cell) = setup::<i32>();
        cell.write(1, WriteOptions::cached()).unwrap();
        cell.write(2, WriteOptions::default()).unwrap();
        assert!(cell.is_cached());

        let id = cell.subscribe(|_: &i32| {});
        cell.unsubscribe(id);
        sched.advance(GRACE * 2);
        assert_eq!(cell.read(), Some(2));
        assert!(cell.is_cached());
    }

    #[test]
    fn test_resubscribe_within_grace_cancels_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let sched = Arc::new(ManualScheduler::new());
        let cell: ValueCell<i32> = ValueCell::builder(sched.clone())
            .value(3)
            .on_release(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        let id = cell.subscribe(|_: &i32| {});
        cell.unsubscribe(id);
        sched.advance(Duration::from_millis(100));
        cell.subscribe(|_: &i32| {});
        assert_eq!(sched.pending(), 0);

        sched.advance(GRACE * 4);
        assert_eq!(cell.read(), Some(3));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(cell.lifecycle(), Lifecycle::Active);
    }

    #[test]
    fn test_release_callback_runs_once_per_release() {
        let (sched, cell) = setup::<i32>();
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        cell.set_on_release(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let id = cell.subscribe(|_: &i32| {});
        cell.unsubscribe(id);
        sched.advance(GRACE * 3);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_handlers_count_toward_activity() {
        let (sched, cell) = setup::<i32>();
        cell.write(1, WriteOptions::default()).unwrap();
        let handler = cell.on_update(|_: &i32| {});
        assert!(cell.is_active());
        assert_eq!(cell.handler_count(), 1);

        assert!(cell.off_update(handler));
        assert!(!cell.off_update(handler));
        assert_eq!(cell.lifecycle(), Lifecycle::Grace);

        sched.advance(GRACE);
        assert_eq!(cell.read(), None);
    }

    #[test]
    fn test_unknown_unsubscribe_is_noop() {
        let (sched, cell) = setup::<i32>();
        assert!(!cell.unsubscribe(SubscriptionId::new()));
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_scoped_subscription_unsubscribes_on_drop() {
        let (sched, cell) = setup::<i32>();
        cell.write(4, WriteOptions::default()).unwrap();
        {
            let guard = cell.subscribe_scoped(|_: &i32| {});
            assert_eq!(cell.subscriber_count(), 1);
            let _ = guard.id();
        }
        assert_eq!(cell.subscriber_count(), 0);
        assert_eq!(cell.lifecycle(), Lifecycle::Grace);
        sched.advance(GRACE);
        assert_eq!(cell.read(), None);
    }

    #[test]
    fn test_attach_dedups_initial_values() {
        let (_, cell) = setup::<Value>();
        let (first_seen, first_cb) = recorder::<Value>();
        let a = cell.attach(Some(json!({"n": 1})), first_cb).unwrap();
        assert_eq!(a.value, Some(json!({"n": 1})));

        let b = cell.attach(Some(json!({"n": 1})), |_: &Value| {}).unwrap();
        assert_eq!(b.value, Some(json!({"n": 1})));
        assert_ne!(a.subscription, b.subscription);
        assert!(first_seen.lock().unwrap().is_empty());

        let c = cell.attach(None, |_: &Value| {}).unwrap();
        assert_eq!(c.value, Some(json!({"n": 1})));
        assert_eq!(cell.subscriber_count(), 3);
    }

    #[test]
    fn test_serialization_error_leaves_cell_untouched() {
        let (_, cell) = setup::<Value>();
        cell.write(json!(1), WriteOptions::default()).unwrap();

        let mut deep = json!(0);
        for _ in 0..200 {
            deep = json!([deep]);
        }
        let err = cell.write(deep, WriteOptions::cached()).unwrap_err();
        assert!(err.is_serialization());
        assert_eq!(cell.read(), Some(json!(1)));
        assert!(!cell.is_cached());
    }

    #[test]
    fn test_failed_stored_fingerprint_keeps_cache_flag_clear() {
        let (_, cell) = setup::<Value>();
        let mut deep = json!(0);
        for _ in 0..200 {
            deep = json!([deep]);
        }
        cell.write(deep.clone(), WriteOptions::forced()).unwrap();

        let err = cell.write(json!(1), WriteOptions::cached()).unwrap_err();
        assert!(err.is_serialization());
        assert!(!cell.is_cached());
        assert_eq!(cell.read(), Some(deep));
    }

    #[test]
    fn test_deduplicated_write_still_sets_cache_flag() {
        let (_, cell) = setup::<i32>();
        cell.write(1, WriteOptions::default()).unwrap();
        assert_eq!(cell.write(1, WriteOptions::cached()).unwrap(), WriteOutcome::Unchanged);
        assert!(cell.is_cached());
    }
}
