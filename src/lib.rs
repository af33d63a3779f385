//! # statecell - keyed, structurally-deduplicated reactive state
//!
//! Independent consumers read and write named values without holding
//! references to each other, and are notified only when a value's *content*
//! changes, not merely when a new value is assigned.
//!
//! ## Core Concepts
//!
//! - **Fingerprint**: deterministic digest of a value's canonical form, used
//!   as a cheap equality proxy
//! - **ValueCell**: one slot with subscribers, a cached fingerprint and
//!   idle-release timing
//! - **Registry**: a namespace of cells keyed by string
//! - **Directory**: a default registry plus lazily created named registries
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use statecell::{Directory, ManualScheduler, StateConfig, WriteOptions};
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let dir = Directory::new(scheduler.clone(), StateConfig::default());
//! let registry = dir.default_registry();
//!
//! let id = registry.subscribe("profile", |v: &serde_json::Value| println!("changed: {v}"))?;
//! registry.write("profile", json!({"name": "ada", "age": 36}), WriteOptions::default())?;
//!
//! // Same content, different key order: no notification.
//! let outcome = registry.write("profile", json!({"age": 36, "name": "ada"}), WriteOptions::default())?;
//! assert!(!outcome.is_changed());
//!
//! registry.unsubscribe::<serde_json::Value>("profile", id)?;
//! scheduler.advance(Duration::from_millis(250));
//! assert_eq!(registry.read::<serde_json::Value>("profile")?, None);
//! # Ok::<(), statecell::StateError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cell;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod global;
pub mod registry;
pub mod schedule;

// Re-export primary types at crate root for convenience
pub use cell::{
    Attachment, CellBuilder, HandlerId, Lifecycle, ScopedSubscription, StateValue, SubscriptionId, ValueCell,
    WriteOptions, WriteOutcome,
};
pub use config::{StateConfig, DEFAULT_RELEASE_GRACE};
pub use error::{SerializationError, StateError, StateResult};
pub use fingerprint::{canonicalize, fingerprint, fingerprint_with, forms, Fingerprint, FingerprintMode};
pub use global::{attach, default_registry, read, registry_named, subscribe, unsubscribe, write};
pub use registry::{Directory, Registry};
pub use schedule::{ManualScheduler, Scheduler, ThreadScheduler, TimerId};
