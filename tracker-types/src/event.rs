//! Wire event types.
//!
//! Events are the unit of replication between relays and peers. Every event
//! is immutable once signed: its `id` commits to the author, timestamp, kind,
//! tags and content, and `sig` commits to the `id`.
//!
//! The kinds and tag names defined here are a compatibility contract with
//! other clients on the same relays. Changing them breaks interoperability.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Numeric event kinds understood by the tracker.
pub mod kinds {
    /// Public (plaintext) project state.
    pub const PROJECT: u32 = 34020;
    /// Public (plaintext) ticket state.
    pub const TICKET: u32 = 34021;
    /// Encrypted, recipient-addressed wrapper around a project or ticket rumor.
    pub const GIFT_WRAP: u32 = 1059;
    /// Lightweight ticket status update.
    pub const TICKET_STATUS: u32 = 30402;
}

/// Tag names used on tracker events.
pub mod tag {
    /// Entity identity (replaceable-event discriminator).
    pub const D: &str = "d";
    pub const PROJECT_UUID: &str = "project-uuid";
    pub const TICKET_UUID: &str = "ticket-uuid";
    /// Entity type carried on gift wraps: `project` or `ticket`.
    pub const TYPE: &str = "type";
    /// Recipient public key on gift wraps.
    pub const P: &str = "p";
    /// Child entity uuid touched by a project update.
    pub const UPDATED: &str = "updated";
    /// Which property of the project changed.
    pub const PROPERTY: &str = "property";
    /// Causal predecessor event id.
    pub const E: &str = "e";
    /// `true` or `false`.
    pub const PRIVATE: &str = "private";
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
}

/// A single event tag: a name followed by one or more values.
///
/// Serialized as a plain JSON array of strings, e.g. `["d", "ticket-42"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    /// Creates a `[name, value]` tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![name.into(), value.into()])
    }

    /// Creates a tag from raw parts.
    pub fn from_parts(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// The tag name, if the tag is non-empty.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The first value after the name.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// All parts of the tag, including the name.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for Tag {
    fn from((name, value): (N, V)) -> Self {
        Self::new(name, value)
    }
}

/// Returns the values of every `[name, value, ..]` tag with the given name.
pub fn tag_values<'a>(tags: &'a [Tag], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    tags.iter()
        .filter(move |t| t.name() == Some(name))
        .filter_map(Tag::value)
}

/// Returns the first value of the named tag.
pub fn first_tag_value<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.name() == Some(name))
        .and_then(Tag::value)
}

/// An event before it has been hashed and signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: Timestamp,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Creates a template stamped with the current time.
    pub fn new(pubkey: impl Into<String>, kind: u32, content: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at: Timestamp::now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Appends a `[name, value]` tag.
    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    /// Overrides the creation timestamp.
    pub fn at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// The canonical serialization the event id is computed over:
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn canonical_json(&self) -> crate::Result<String> {
        let value = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        Ok(serde_json::to_string(&value)?)
    }
}

/// A signed event as stored and forwarded by relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Hex public key of the author.
    pub pubkey: String,
    pub created_at: Timestamp,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Hex signature over the id.
    pub sig: String,
}

impl Event {
    /// Values of every tag with the given name.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        tag_values(&self.tags, name)
    }

    /// First value of the named tag.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        first_tag_value(&self.tags, name)
    }

    /// Whether a `[name, value]` tag is present.
    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tag_values(name).any(|v| v == value)
    }

    /// Strips id and signature back to the template they were computed from.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}
