//! Runtime configuration for cells and registries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Grace period between a cell going inactive and its value being released.
pub const DEFAULT_RELEASE_GRACE: Duration = Duration::from_millis(250);

/// Settings shared by every cell a registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// How long a cell may sit without subscribers or handlers before its
    /// value is discarded.
    pub release_grace: Duration,
}

impl StateConfig {
    /// Override the idle-release grace period.
    #[must_use]
    pub const fn with_release_grace(mut self, release_grace: Duration) -> Self {
        self.release_grace = release_grace;
        self
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            release_grace: DEFAULT_RELEASE_GRACE,
        }
    }
}
