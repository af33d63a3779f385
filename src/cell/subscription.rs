//! Subscription handles.

use std::sync::Weak;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CellInner;

/// Token returned by `subscribe`; pass it back to `unsubscribe`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Token returned by `on_update`; pass it back to `off_update`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Create a new random handler id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A subscription that unsubscribes itself when dropped.
///
/// Holds only a weak reference, so it never keeps a standalone cell alive.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct ScopedSubscription<T: Send + Sync + 'static> {
    id: SubscriptionId,
    cell: Weak<CellInner<T>>,
}

impl<T: Send + Sync + 'static> ScopedSubscription<T> {
    pub(crate) fn new(id: SubscriptionId, cell: Weak<CellInner<T>>) -> Self {
        Self { id, cell }
    }

    /// The subscription id backing this guard.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for ScopedSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSubscription").field("id", &self.id).finish()
    }
}

impl<T: Send + Sync + 'static> Drop for ScopedSubscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.cell.upgrade() {
            CellInner::remove_subscriber(&inner, self.id);
        }
    }
}
