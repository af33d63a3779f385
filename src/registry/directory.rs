use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::cell::{StateValue, WriteOptions, WriteOutcome};
use crate::config::StateConfig;
use crate::error::StateResult;
use crate::schedule::Scheduler;

use super::Registry;

/// Log label of the default registry.
pub const DEFAULT_LABEL: &str = "default";

/// Resolves registries by name, plus one distinguished default registry.
///
/// The default registry is separate from every named one, including a
/// registry that happens to be named `"default"`. All registries share the
/// directory's scheduler and settings.
pub struct Directory {
    scheduler: Arc<dyn Scheduler>,
    config: StateConfig,
    default: Arc<Registry>,
    named: RwLock<HashMap<String, Arc<Registry>>>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("config", &self.config)
            .field("named", &self.names())
            .finish_non_exhaustive()
    }
}

impl Directory {
    /// Create a directory with an empty default registry.
    #[must_use]
    pub fn new(scheduler: Arc<dyn Scheduler>, config: StateConfig) -> Self {
        let default = Arc::new(Registry::with_label(DEFAULT_LABEL, Arc::clone(&scheduler), config));
        Self {
            scheduler,
            config,
            default,
            named: RwLock::new(HashMap::new()),
        }
    }

    /// The registry used when no name is given.
    #[must_use]
    pub fn default_registry(&self) -> Arc<Registry> {
        Arc::clone(&self.default)
    }

    /// Registry called `name`, created on first request.
    pub fn registry_named(&self, name: &str) -> Arc<Registry> {
        if let Some(registry) = self
            .named
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(registry);
        }

        let mut named = self.named.write().unwrap_or_else(PoisonError::into_inner);
        let registry = named.entry(name.to_string()).or_insert_with(|| {
            debug!(registry = name, "named registry created");
            Arc::new(Registry::with_label(
                format!("@{name}"),
                Arc::clone(&self.scheduler),
                self.config,
            ))
        });
        Arc::clone(registry)
    }

    /// Names of all named registries created so far, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .named
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Read `key` from the default registry.
    pub fn read<T: StateValue>(&self, key: &str) -> StateResult<Option<T>> {
        self.default.read(key)
    }

    /// Write `key` in the default registry.
    pub fn write<T: StateValue>(&self, key: &str, value: T, options: WriteOptions) -> StateResult<WriteOutcome> {
        self.default.write(key, value, options)
    }
}
