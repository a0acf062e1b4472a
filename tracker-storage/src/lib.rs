//! Local persistence for tracker projects and tickets.
//!
//! The sync engine only ever talks to the [`LocalStore`] trait. Records are
//! keyed by uuid and carry the sync cursor (`last_event_id`,
//! `last_event_created_at`) of the event that produced them; the store never
//! decides whether a write is stale, that is the reconciler's job.
//!
//! [`SqliteStore`] is the bundled implementation. It keeps scalar columns
//! queryable and stores the child-uuid sets as JSON text.

mod error;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteStore;

use tracker_types::{Project, Ticket};

/// Query for [`LocalStore::list_tickets`]. `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketFilter {
    pub state: Option<String>,
    pub project_uuid: Option<String>,
}

impl TicketFilter {
    pub fn in_project(project_uuid: impl Into<String>) -> Self {
        Self {
            project_uuid: Some(project_uuid.into()),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// Persistent record store for projects and tickets.
///
/// Implementations are synchronous; async callers run them on a blocking
/// thread.
pub trait LocalStore: Send + Sync {
    /// Reads a project, including its members and ticket set.
    fn get_project(&self, uuid: &str) -> StorageResult<Option<Project>>;

    /// Inserts or replaces a project. The member list is replaced wholesale.
    fn save_project(&self, project: &Project) -> StorageResult<()>;

    /// Projects visible to `pubkey`: those it is a member of, plus every
    /// public project.
    fn list_projects_for_member(&self, pubkey: &str) -> StorageResult<Vec<Project>>;

    fn get_ticket(&self, uuid: &str) -> StorageResult<Option<Ticket>>;

    /// Inserts or replaces a ticket. Fails with [`StorageError::NotFound`]
    /// when the owning project is not stored.
    fn save_ticket(&self, ticket: &Ticket) -> StorageResult<()>;

    /// Tickets matching the filter, oldest first.
    fn list_tickets(&self, filter: &TicketFilter) -> StorageResult<Vec<Ticket>>;

    /// Deletes a ticket. Returns whether a row was removed.
    fn delete_ticket(&self, uuid: &str) -> StorageResult<bool>;
}
