//! Process-wide directory and free-function surface.
//!
//! These functions operate on a lazily created [`Directory`] backed by a
//! [`ThreadScheduler`]. Code that needs isolation (tests, multiple
//! independent stores) should construct its own `Directory` instead.

use std::sync::{Arc, OnceLock};

use crate::cell::{Attachment, StateValue, SubscriptionId, WriteOptions, WriteOutcome};
use crate::config::StateConfig;
use crate::error::StateResult;
use crate::registry::{Directory, Registry};
use crate::schedule::ThreadScheduler;

static GLOBAL: OnceLock<Directory> = OnceLock::new();

/// The process-wide directory.
pub fn directory() -> &'static Directory {
    GLOBAL.get_or_init(|| Directory::new(Arc::new(ThreadScheduler::new()), StateConfig::default()))
}

/// The process-wide default registry.
pub fn default_registry() -> Arc<Registry> {
    directory().default_registry()
}

/// A process-wide named registry, created on first request.
pub fn registry_named(name: &str) -> Arc<Registry> {
    directory().registry_named(name)
}

/// Read `key` from the default registry.
pub fn read<T: StateValue>(key: &str) -> StateResult<Option<T>> {
    directory().read(key)
}

/// Write `key` in the default registry.
pub fn write<T: StateValue>(key: &str, value: T, options: WriteOptions) -> StateResult<WriteOutcome> {
    directory().write(key, value, options)
}

/// Subscribe to `key` in the default registry.
pub fn subscribe<T: StateValue>(
    key: &str,
    callback: impl Fn(&T) + Send + Sync + 'static,
) -> StateResult<SubscriptionId> {
    directory().default_registry().subscribe(key, callback)
}

/// Unsubscribe from `key` in the default registry.
pub fn unsubscribe<T: StateValue>(key: &str, id: SubscriptionId) -> StateResult<bool> {
    directory().default_registry().unsubscribe::<T>(key, id)
}

/// Apply an optional initial value at `key` in the default registry, then subscribe.
pub fn attach<T: StateValue>(
    key: &str,
    initial: Option<T>,
    callback: impl Fn(&T) + Send + Sync + 'static,
) -> StateResult<Attachment<T>> {
    directory().default_registry().attach(key, initial, callback)
}
