//! Relay query filters.
//!
//! A filter selects events by kind, by single-letter or named tag values
//! (serialized as `"#<name>"` keys), and by an inclusive `since` lower bound.

use crate::{Event, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A relay-side event filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,

    /// Tag constraints keyed by `#<tag name>`.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,

    /// Inclusive lower bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Creates an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an accepted kind.
    pub fn kind(mut self, kind: u32) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    /// Adds an accepted value for the named tag.
    pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
        let values = self.tags.entry(format!("#{name}")).or_default();
        let value = value.into();
        if !values.contains(&value) {
            values.push(value);
        }
        self
    }

    /// Sets the inclusive `since` bound.
    pub fn since(mut self, since: Option<Timestamp>) -> Self {
        self.since = since;
        self
    }

    /// Caps the number of stored events a one-shot query returns.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The accepted values for a tag name (without the `#` prefix).
    pub fn tag_values(&self, name: &str) -> Option<&[String]> {
        self.tags.get(&format!("#{name}")).map(Vec::as_slice)
    }

    /// Returns true if the event satisfies every constraint of this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        self.tags.iter().all(|(key, accepted)| {
            let name = key.trim_start_matches('#');
            event
                .tag_values(name)
                .any(|v| accepted.iter().any(|a| a == v))
        })
    }
}
