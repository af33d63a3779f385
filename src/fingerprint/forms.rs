//! `serialize_with` adapters for values whose canonical form is textual.
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::Serialize;
//!
//! #[derive(Clone, Serialize)]
//! struct Session {
//!     #[serde(serialize_with = "statecell::forms::iso8601")]
//!     started: DateTime<Utc>,
//!     #[serde(serialize_with = "statecell::forms::pattern")]
//!     filter: regex::Regex,
//! }
//! ```
//!
//! Hash-ordered collections (`HashSet`, or any set whose iteration order
//! depends on its hasher) must go through [`unordered_set`]; two equal sets
//! otherwise fingerprint differently.
//!
//! ```
//! use std::collections::HashSet;
//!
//! use serde::Serialize;
//!
//! #[derive(Clone, Serialize)]
//! struct Selection {
//!     #[serde(serialize_with = "statecell::forms::unordered_set")]
//!     ids: HashSet<u32>,
//! }
//!
//! let a = Selection { ids: (0..16).collect() };
//! let b = Selection { ids: (0..16).rev().collect() };
//! assert_eq!(statecell::fingerprint(&a).unwrap(), statecell::fingerprint(&b).unwrap());
//! ```

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde::{ser, Serialize, Serializer};

use super::{canonicalize, FingerprintMode};

/// Render a date-time as UTC ISO-8601 with millisecond precision,
/// e.g. `2024-01-02T03:04:05.006Z`. Equal instants in different zones
/// render identically.
pub fn iso8601<Tz, S>(value: &DateTime<Tz>, serializer: S) -> Result<S::Ok, S::Error>
where
    Tz: TimeZone,
    S: Serializer,
{
    let text = value
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&text)
}

/// Render a compiled pattern as its delimited source text, `/source/`.
pub fn pattern<S: Serializer>(value: &Regex, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("/{}/", value.as_str()))
}

/// Serialize a collection as a sequence ordered by each element's canonical
/// form, so iteration order does not leak into the fingerprint.
pub fn unordered_set<'a, C, T, S>(value: &'a C, serializer: S) -> Result<S::Ok, S::Error>
where
    &'a C: IntoIterator<Item = &'a T>,
    T: Serialize + 'a,
    S: Serializer,
{
    let mut keyed = Vec::new();
    for item in value {
        let text = canonicalize(item, FingerprintMode::Ordered).map_err(<S::Error as ser::Error>::custom)?;
        keyed.push((text, item));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    serializer.collect_seq(keyed.into_iter().map(|(_, item)| item))
}
