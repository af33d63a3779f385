//! Keyed registries of value cells.
//!
//! A [`Registry`] maps string keys to [`ValueCell`]s, creating each cell the
//! first time its key is touched and keeping it for the registry's lifetime.
//! Released cells stay in the map so their cache flag survives and re-use does
//! not churn allocations.
//!
//! Different keys may hold different value types. The type is fixed by the
//! first access; later accesses with another type fail with
//! [`StateError::TypeMismatch`].

/// Default and named registries.
pub mod directory;

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cell::{Attachment, HandlerId, StateValue, SubscriptionId, ValueCell, WriteOptions, WriteOutcome};
use crate::config::StateConfig;
use crate::error::{StateError, StateResult};
use crate::schedule::Scheduler;

pub use directory::Directory;

fn lock_err(context: &'static str) -> StateError {
    StateError::internal(format!("poisoned lock: {context}"))
}

struct Entry {
    type_name: &'static str,
    cell: Box<dyn Any + Send + Sync>,
}

/// A namespace of value cells keyed by string.
pub struct Registry {
    label: String,
    config: StateConfig,
    scheduler: Arc<dyn Scheduler>,
    cells: RwLock<HashMap<String, Entry>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("label", &self.label)
            .field("config", &self.config)
            .field("cells", &self.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry labelled `registry`.
    #[must_use]
    pub fn new(scheduler: Arc<dyn Scheduler>, config: StateConfig) -> Self {
        Self::with_label("registry", scheduler, config)
    }

    /// Create a registry whose cells log under `label`.
    #[must_use]
    pub fn with_label(label: impl Into<String>, scheduler: Arc<dyn Scheduler>, config: StateConfig) -> Self {
        Self {
            label: label.into(),
            config,
            scheduler,
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Prefix of every cell label in this registry.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Settings applied to new cells.
    #[must_use]
    pub const fn config(&self) -> &StateConfig {
        &self.config
    }

    fn downcast<T: StateValue>(key: &str, entry: &Entry) -> StateResult<ValueCell<T>> {
        entry
            .cell
            .downcast_ref::<ValueCell<T>>()
            .cloned()
            .ok_or_else(|| StateError::TypeMismatch {
                key: key.to_string(),
                stored: entry.type_name,
                requested: type_name::<T>(),
            })
    }

    fn existing<T: StateValue>(&self, key: &str) -> StateResult<Option<ValueCell<T>>> {
        let cells = self.cells.read().map_err(|_| lock_err("registry cells"))?;
        cells.get(key).map(|entry| Self::downcast::<T>(key, entry)).transpose()
    }

    /// Cell for `key`, created on first access.
    pub fn cell_for<T: StateValue>(&self, key: &str) -> StateResult<ValueCell<T>> {
        if let Some(cell) = self.existing(key)? {
            return Ok(cell);
        }

        let mut cells = self.cells.write().map_err(|_| lock_err("registry cells"))?;
        // Another caller may have created it between the two locks.
        let entry = cells.entry(key.to_string()).or_insert_with(|| {
            let cell: ValueCell<T> = ValueCell::builder(Arc::clone(&self.scheduler))
                .config(&self.config)
                .label(format!("{}/{key}", self.label))
                .build();
            Entry {
                type_name: type_name::<T>(),
                cell: Box::new(cell),
            }
        });
        Self::downcast::<T>(key, entry)
    }

    /// Current value at `key`. Never creates a cell.
    pub fn read<T: StateValue>(&self, key: &str) -> StateResult<Option<T>> {
        Ok(self.existing::<T>(key)?.and_then(|cell| cell.read()))
    }

    /// Write to the cell at `key`, creating it if needed.
    pub fn write<T: StateValue>(&self, key: &str, value: T, options: WriteOptions) -> StateResult<WriteOutcome> {
        self.cell_for(key)?.write(value, options)
    }

    /// Subscribe to the cell at `key`, creating it if needed.
    pub fn subscribe<T: StateValue>(
        &self,
        key: &str,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> StateResult<SubscriptionId> {
        Ok(self.cell_for(key)?.subscribe(callback))
    }

    /// Remove a subscriber. Unknown keys report false without creating a cell.
    pub fn unsubscribe<T: StateValue>(&self, key: &str, id: SubscriptionId) -> StateResult<bool> {
        Ok(self.existing::<T>(key)?.is_some_and(|cell| cell.unsubscribe(id)))
    }

    /// Add an update handler to the cell at `key`.
    pub fn on_update<T: StateValue>(
        &self,
        key: &str,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> StateResult<HandlerId> {
        Ok(self.cell_for(key)?.on_update(callback))
    }

    /// Remove an update handler. Unknown keys report false.
    pub fn off_update<T: StateValue>(&self, key: &str, id: HandlerId) -> StateResult<bool> {
        Ok(self.existing::<T>(key)?.is_some_and(|cell| cell.off_update(id)))
    }

    /// Apply an optional initial value at `key`, then subscribe.
    pub fn attach<T: StateValue>(
        &self,
        key: &str,
        initial: Option<T>,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> StateResult<Attachment<T>> {
        self.cell_for(key)?.attach(initial, callback)
    }

    /// Returns true if a cell exists at `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.cells.read().map(|cells| cells.contains_key(key)).unwrap_or(false)
    }

    /// Keys of all cells created so far, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .cells
            .read()
            .map(|cells| cells.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Number of cells created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.read().map(|cells| cells.len()).unwrap_or(0)
    }

    /// True if no cell has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::schedule::ManualScheduler;

    fn setup() -> (Arc<ManualScheduler>, Registry) {
        let sched = Arc::new(ManualScheduler::new());
        let registry = Registry::new(sched.clone(), StateConfig::default());
        (sched, registry)
    }

    #[test]
    fn test_cell_for_is_stable() {
        let (_, registry) = setup();
        let a = registry.cell_for::<i32>("k").unwrap();
        a.write(1, WriteOptions::default()).unwrap();
        let b = registry.cell_for::<i32>("k").unwrap();
        assert_eq!(b.read(), Some(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(b.label(), "registry/k");
    }

    #[test]
    fn test_read_does_not_create() {
        let (_, registry) = setup();
        assert_eq!(registry.read::<i32>("missing").unwrap(), None);
        assert!(!registry.contains_key("missing"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let (_, registry) = setup();
        registry.write("k", 1i64, WriteOptions::default()).unwrap();
        let err = registry.read::<String>("k").unwrap_err();
        match err {
            StateError::TypeMismatch { key, stored, requested } => {
                assert_eq!(key, "k");
                assert_eq!(stored, "i64");
                assert!(requested.contains("String"));
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_keyed_dedup() {
        let (_, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        registry
            .subscribe("profile", move |_: &serde_json::Value| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        registry.write("profile", json!({"name": "a", "age": 3}), WriteOptions::default()).unwrap();
        registry.write("profile", json!({"age": 3, "name": "a"}), WriteOptions::default()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_key() {
        let (_, registry) = setup();
        assert!(!registry.unsubscribe::<i32>("nope", SubscriptionId::new()).unwrap());
        assert!(!registry.contains_key("nope"));
    }

    #[test]
    fn test_released_cells_stay_registered() {
        let (sched, registry) = setup();
        let id = registry.subscribe("k", |_: &i32| {}).unwrap();
        registry.write("k", 9, WriteOptions::cached()).unwrap();
        assert!(registry.unsubscribe::<i32>("k", id).unwrap());
        sched.advance(Duration::from_secs(1));

        assert!(registry.contains_key("k"));
        assert_eq!(registry.read::<i32>("k").unwrap(), Some(9));
        assert!(registry.cell_for::<i32>("k").unwrap().is_cached());
    }

    #[test]
    fn test_handlers_via_registry() {
        let (sched, registry) = setup();
        let hid = registry.on_update("k", |_: &i32| {}).unwrap();
        registry.write("k", 1, WriteOptions::default()).unwrap();
        assert!(registry.off_update::<i32>("k", hid).unwrap());
        sched.advance(registry.config().release_grace);
        assert_eq!(registry.read::<i32>("k").unwrap(), None);
    }

    #[test]
    fn test_keys_sorted() {
        let (_, registry) = setup();
        registry.write("b", 1, WriteOptions::default()).unwrap();
        registry.write("a", "x".to_string(), WriteOptions::default()).unwrap();
        assert_eq!(registry.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
