//! Content fingerprints for structured values.
//!
//! A fingerprint is a short, fixed-length digest of a value's canonical form.
//! Two values with the same structure and content always produce the same
//! fingerprint, regardless of map key insertion order. Sequence order is
//! significant unless [`FingerprintMode::Sorted`] is requested.
//!
//! Fingerprints are a probabilistic equality check. They decide whether a
//! write is worth notifying subscribers about, nothing more.
//!
//! ```
//! use serde_json::json;
//! use statecell::fingerprint::{fingerprint, fingerprint_with, FingerprintMode};
//!
//! let a = fingerprint(&json!({"a": 1, "b": 2})).unwrap();
//! let b = fingerprint(&json!({"b": 2, "a": 1})).unwrap();
//! assert_eq!(a, b);
//!
//! assert_ne!(fingerprint(&[1, 2]).unwrap(), fingerprint(&[2, 1]).unwrap());
//! assert_eq!(
//!     fingerprint_with(&[1, 2], FingerprintMode::Sorted).unwrap(),
//!     fingerprint_with(&[2, 1], FingerprintMode::Sorted).unwrap(),
//! );
//! ```

mod canonical;
pub mod forms;
pub mod hash;

use serde::{Deserialize, Serialize};

use crate::error::SerializationError;

pub use canonical::MAX_DEPTH;

/// How sequences are treated during canonicalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Element order is significant.
    #[default]
    Ordered,
    /// Elements are sorted by their canonical form before joining.
    Sorted,
}

/// Opaque content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest of the unset value (canonical form is the empty string).
    #[must_use]
    pub fn unset() -> Self {
        Self::of_canonical("")
    }

    /// Sentinel stored after a cell releases its value. It never equals a
    /// computed digest, so the next write always notifies.
    #[must_use]
    pub const fn released() -> Self {
        Self(String::new())
    }

    /// Digest an already-canonical string.
    #[must_use]
    pub fn of_canonical(canonical: &str) -> Self {
        Self(hash::digest(canonical, 0))
    }

    /// Returns true for the released sentinel.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.0.is_empty()
    }

    /// The digest text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical text form of `value`.
pub fn canonicalize<T: Serialize + ?Sized>(
    value: &T,
    mode: FingerprintMode,
) -> Result<String, SerializationError> {
    canonical::to_canonical(value, mode)
}

/// Fingerprint `value` with order-sensitive sequences.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint, SerializationError> {
    fingerprint_with(value, FingerprintMode::Ordered)
}

/// Fingerprint `value` using the given sequence mode.
pub fn fingerprint_with<T: Serialize + ?Sized>(
    value: &T,
    mode: FingerprintMode,
) -> Result<Fingerprint, SerializationError> {
    let canonical = canonical::to_canonical(value, mode)?;
    Ok(Fingerprint::of_canonical(&canonical))
}

/// Fingerprint an optional value, treating `None` as unset rather than null.
pub fn fingerprint_slot<T: Serialize>(value: Option<&T>) -> Result<Fingerprint, SerializationError> {
    match value {
        Some(v) => fingerprint(v),
        None => Ok(Fingerprint::unset()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_deterministic() {
        let v = json!({"list": [1, 2, 3], "nested": {"k": "v"}});
        assert_eq!(fingerprint(&v).unwrap(), fingerprint(&v).unwrap());
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(fingerprint(&1).unwrap().as_str(), "1tss4pk1rj75fs");
        assert_eq!(fingerprint(&json!({"b": 2, "a": 1})).unwrap().as_str(), "0807dix0nd8pir");
        assert_eq!(fingerprint(&()).unwrap().as_str(), "173lp0a0teocvu");
    }

    #[test]
    fn test_key_order_irrelevant() {
        let mut a = BTreeMap::new();
        a.insert("a", 1);
        a.insert("b", 2);
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&json!({"b": 2, "a": 1})).unwrap());
    }

    #[test]
    fn test_sequence_order_modes() {
        assert_ne!(fingerprint(&vec![1, 2]).unwrap(), fingerprint(&vec![2, 1]).unwrap());
        assert_eq!(
            fingerprint_with(&vec![1, 2], FingerprintMode::Sorted).unwrap(),
            fingerprint_with(&vec![2, 1], FingerprintMode::Sorted).unwrap()
        );
    }

    #[test]
    fn test_unset_and_released() {
        assert_eq!(Fingerprint::unset().as_str(), "0k4n83c07h0j2b");
        assert!(Fingerprint::released().is_released());
        assert!(!Fingerprint::unset().is_released());
        assert_ne!(Fingerprint::released(), Fingerprint::unset());
    }

    #[test]
    fn test_slot_none_is_unset_not_null() {
        assert_eq!(fingerprint_slot::<i32>(None).unwrap(), Fingerprint::unset());
        assert_ne!(fingerprint_slot::<i32>(None).unwrap(), fingerprint(&None::<i32>).unwrap());
    }

    #[test]
    fn test_same_shape_different_types_collide() {
        #[derive(Serialize)]
        struct User {
            id: u32,
        }
        #[derive(Serialize)]
        struct Order {
            id: u32,
        }
        // No type discriminator is folded into the canonical form.
        assert_eq!(fingerprint(&User { id: 1 }).unwrap(), fingerprint(&Order { id: 1 }).unwrap());
    }

    #[test]
    fn test_display_matches_as_str() {
        let fp = fingerprint("x").unwrap();
        assert_eq!(fp.to_string(), fp.as_str());
        assert_eq!(fp.as_str().len(), hash::DIGEST_LEN);
    }
}
