//! Reconciliation: applies decoded entities to the local store.
//!
//! The only rule is last-writer-wins on the envelope timestamp: an incoming
//! entity replaces the stored one iff its `last_event_created_at` is strictly
//! greater. Equal or older events are duplicates or reorderings and are
//! dropped without error.
//!
//! Writes for the same uuid are serialized through a per-uuid async lock so
//! two streams delivering the same entity cannot interleave their
//! read-compare-write sequences.

use crate::codec::{Decoded, Property};
use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use tracker_storage::{LocalStore, StorageResult};
use tracker_types::{Project, SyncCursor, SyncEntity, Ticket};

/// Subscription-tree change requested by a reconciled project event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaDirective {
    AddTicket { project_uuid: String, ticket_uuid: String },
    RemoveTicket { project_uuid: String, ticket_uuid: String },
    MembershipChanged { project_uuid: String },
}

impl DeltaDirective {
    pub fn project_uuid(&self) -> &str {
        match self {
            Self::AddTicket { project_uuid, .. }
            | Self::RemoveTicket { project_uuid, .. }
            | Self::MembershipChanged { project_uuid } => project_uuid,
        }
    }

    /// Directive for a project update carrying `updated`/`property` tags.
    pub fn from_delta(project_uuid: &str, updated: &str, property: Property) -> Self {
        let project_uuid = project_uuid.to_string();
        match property {
            Property::AddTicket => Self::AddTicket {
                project_uuid,
                ticket_uuid: updated.to_string(),
            },
            Property::RemoveTicket => Self::RemoveTicket {
                project_uuid,
                ticket_uuid: updated.to_string(),
            },
            Property::Membership => Self::MembershipChanged { project_uuid },
        }
    }
}

/// What happened to an incoming entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored. Carries the directive emitted for it, if any.
    Applied { directive: Option<DeltaDirective> },
    /// Not newer than the stored record; dropped.
    Stale,
    /// A ticket whose project is not stored; dropped.
    Orphaned,
}

/// An entity the reconciler knows how to load and store.
pub trait LocalRecord: SyncEntity {
    fn load(store: &dyn LocalStore, uuid: &str) -> StorageResult<Option<Self>>;

    fn save(&self, store: &dyn LocalStore) -> StorageResult<()>;

    /// Whether the record's parent exists, so it can be stored.
    fn has_parent(&self, _store: &dyn LocalStore) -> StorageResult<bool> {
        Ok(true)
    }

    /// Directive to emit after this record was applied from `decoded`.
    fn directive(_decoded: &Decoded<Self>) -> Option<DeltaDirective> {
        None
    }
}

impl LocalRecord for Project {
    fn load(store: &dyn LocalStore, uuid: &str) -> StorageResult<Option<Self>> {
        store.get_project(uuid)
    }

    fn save(&self, store: &dyn LocalStore) -> StorageResult<()> {
        store.save_project(self)
    }

    fn directive(decoded: &Decoded<Self>) -> Option<DeltaDirective> {
        decoded.delta().map(|delta| {
            DeltaDirective::from_delta(&decoded.entity.uuid, &delta.updated, delta.property)
        })
    }
}

impl LocalRecord for Ticket {
    fn load(store: &dyn LocalStore, uuid: &str) -> StorageResult<Option<Self>> {
        store.get_ticket(uuid)
    }

    fn save(&self, store: &dyn LocalStore) -> StorageResult<()> {
        store.save_ticket(self)
    }

    fn has_parent(&self, store: &dyn LocalStore) -> StorageResult<bool> {
        Ok(store.get_project(&self.project_uuid)?.is_some())
    }
}

enum WriteOutcome<T> {
    Written(T),
    Stale(T),
    Orphaned,
}

type LockTable = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A uuid's entry in the lock table, pruned on drop once nobody else holds it.
struct LockLease<'a> {
    locks: &'a LockTable,
    uuid: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> LockLease<'a> {
    fn acquire(locks: &'a LockTable, uuid: &'a str) -> Self {
        let mut table = locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(table.entry(uuid.to_string()).or_default());
        Self { locks, uuid, lock }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Two holders: the table itself and this lease.
        if table
            .get(self.uuid)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2)
        {
            table.remove(self.uuid);
        }
    }
}

/// Applies decoded entities under last-writer-wins.
pub struct Reconciler {
    store: Arc<dyn LocalStore>,
    locks: LockTable,
    directives: mpsc::Sender<DeltaDirective>,
}

impl Reconciler {
    /// Creates a reconciler that reports directives on `directives`.
    pub fn new(store: Arc<dyn LocalStore>, directives: mpsc::Sender<DeltaDirective>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            directives,
        }
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Number of uuids with a live lock-table entry.
    pub fn locked_uuids(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Runs `write` against the stored record for `uuid` with the uuid locked.
    ///
    /// The guard travels into the blocking closure, so the uuid stays locked
    /// until the write has finished even if this future is dropped first.
    async fn with_record<T, O, F>(&self, uuid: &str, write: F) -> SyncResult<O>
    where
        T: LocalRecord,
        O: Send + 'static,
        F: FnOnce(&dyn LocalStore, Option<T>) -> SyncResult<O> + Send + 'static,
    {
        let lease = LockLease::acquire(&self.locks, uuid);
        let guard = Arc::clone(&lease.lock).lock_owned().await;
        let store = Arc::clone(&self.store);
        let key = uuid.to_string();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let stored = T::load(store.as_ref(), &key)?;
            write(store.as_ref(), stored)
        })
        .await?
    }

    /// Applies an entity decoded from a remote event.
    ///
    /// Fails with [`SyncError::ChannelClosed`] when the entity was stored but
    /// its directive could not be queued.
    pub async fn apply<T: LocalRecord>(&self, decoded: Decoded<T>) -> SyncResult<ReconcileOutcome> {
        let uuid = decoded.entity.uuid().to_string();
        let incoming = decoded.entity.clone();

        let outcome = self
            .with_record(&uuid, move |store, stored: Option<T>| {
                if let Some(stored) = stored {
                    if incoming.last_event_created_at() <= stored.last_event_created_at() {
                        return Ok(WriteOutcome::Stale(stored));
                    }
                }
                if !incoming.has_parent(store)? {
                    return Ok(WriteOutcome::Orphaned);
                }
                incoming.save(store)?;
                Ok(WriteOutcome::Written(incoming))
            })
            .await?;

        match outcome {
            WriteOutcome::Stale(_) => {
                debug!("Discarding stale {} {} from event {}", T::KIND, uuid, decoded.event_id);
                Ok(ReconcileOutcome::Stale)
            }
            WriteOutcome::Orphaned => Ok(ReconcileOutcome::Orphaned),
            WriteOutcome::Written(_) => {
                debug!("Applied {} {} from event {}", T::KIND, uuid, decoded.event_id);
                let directive = T::directive(&decoded);
                if let Some(directive) = &directive {
                    self.directives
                        .send(directive.clone())
                        .await
                        .map_err(|_| SyncError::ChannelClosed)?;
                }
                Ok(ReconcileOutcome::Applied { directive })
            }
        }
    }

    /// Stores a newly created entity before it is first published.
    ///
    /// Existing records are changed with [`Reconciler::edit`] instead, so an
    /// entity that is already stored is refused.
    pub async fn store_local<T: LocalRecord>(&self, entity: T) -> SyncResult<T> {
        let uuid = entity.uuid().to_string();
        let outcome = self
            .with_record(&uuid, move |store, stored: Option<T>| {
                if stored.is_some() {
                    return Err(SyncError::AlreadyExists(format!("{} {}", T::KIND, entity.uuid())));
                }
                if !entity.has_parent(store)? {
                    return Ok(WriteOutcome::Orphaned);
                }
                entity.save(store)?;
                Ok(WriteOutcome::Written(entity))
            })
            .await?;

        match outcome {
            WriteOutcome::Written(entity) | WriteOutcome::Stale(entity) => Ok(entity),
            WriteOutcome::Orphaned => Err(SyncError::NotFound(format!(
                "project for {} {}",
                T::KIND,
                uuid
            ))),
        }
    }

    /// Edits the stored record for `uuid` in place and saves it.
    ///
    /// `edit` sees the record as currently stored, including any remote
    /// update applied a moment ago, and returns `None` to leave it untouched.
    /// The cursor is not the edit's to change and is kept as stored.
    /// Returns the record as stored afterwards and the edit's result.
    pub async fn edit<T, R, F>(&self, uuid: &str, edit: F) -> SyncResult<(T, Option<R>)>
    where
        T: LocalRecord,
        R: Send + 'static,
        F: FnOnce(&mut T) -> Option<R> + Send + 'static,
    {
        let missing = format!("{} {}", T::KIND, uuid);
        self.with_record(uuid, move |store, stored: Option<T>| {
            let Some(mut record) = stored else {
                return Err(SyncError::NotFound(missing));
            };
            let cursor = record.cursor();
            let Some(result) = edit(&mut record) else {
                return Ok((record, None));
            };
            if let Some(cursor) = cursor {
                record.set_cursor(cursor);
            }
            record.save(store)?;
            Ok((record, Some(result)))
        })
        .await
    }

    /// Records a just-published snapshot under its event cursor.
    ///
    /// The snapshot replaces the stored record only if its cursor is newer;
    /// a remote update that overtook it in the meantime wins, exactly as it
    /// will on every other device. Returns the record as stored afterwards.
    pub async fn record_published<T: LocalRecord>(
        &self,
        published: T,
        cursor: SyncCursor,
    ) -> SyncResult<T> {
        let uuid = published.uuid().to_string();
        let missing = uuid.clone();
        let outcome = self
            .with_record(&uuid, move |store, stored: Option<T>| {
                let Some(stored) = stored else {
                    return Err(SyncError::NotFound(missing));
                };
                if cursor.created_at <= stored.last_event_created_at() {
                    return Ok(WriteOutcome::Stale(stored));
                }
                let mut published = published;
                published.set_cursor(cursor);
                published.save(store)?;
                Ok(WriteOutcome::Written(published))
            })
            .await?;

        match outcome {
            WriteOutcome::Written(entity) | WriteOutcome::Stale(entity) => Ok(entity),
            WriteOutcome::Orphaned => Err(SyncError::NotFound(uuid)),
        }
    }
}
