//! Core type definitions for the tracker.
//!
//! This crate defines the wire-level and domain types shared by every other
//! crate in the workspace:
//! - Signed relay events, tags, and the numeric event kinds
//! - Relay query filters
//! - Projects, project members, and tickets, plus their sync cursors
//!
//! It performs no I/O and no cryptography.

mod entity;
mod event;
mod filter;
mod timestamp;

pub use entity::{
    new_entity_uuid, EntityKind, MemberRole, Project, ProjectMember, SyncCursor, SyncEntity,
    Ticket, INITIAL_TICKET_STATE,
};
pub use event::{first_tag_value, kinds, tag, tag_values, Event, Tag, UnsignedEvent};
pub use filter::Filter;
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
