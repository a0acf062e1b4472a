//! Sync engine: the single context object wiring transport, crypto, store,
//! registry, reconciler, cascade controller and publisher together.
//!
//! Nothing here is global. Two engines in one process (one per identity,
//! say) share nothing but what they are handed.

use crate::cascade::{CascadeController, StreamHandle};
use crate::codec::{Delta, EventCodec, Property};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::filter::{ticket_status_filter, FilterBuilder};
use crate::publisher::{PublishReceipt, Publisher};
use crate::reconcile::{DeltaDirective, LocalRecord, Reconciler};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::transport::{RelayTransport, SubscriptionMessage};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracker_crypto::{CryptoProvider, Identity};
use tracker_storage::LocalStore;
use tracker_types::{Event, Filter, MemberRole, Project, ProjectMember, Ticket, Timestamp};

/// The relay sync engine for one identity.
pub struct SyncEngine {
    config: SyncConfig,
    identity: Identity,
    transport: Arc<dyn RelayTransport>,
    store: Arc<dyn LocalStore>,
    codec: EventCodec,
    publisher: Publisher,
    reconciler: Arc<Reconciler>,
    registry: Arc<SubscriptionRegistry>,
    cascade: Arc<CascadeController>,
    directives: Mutex<Option<mpsc::Receiver<DeltaDirective>>>,
    cascade_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Creates an engine. Call [`SyncEngine::start`] before subscribing so
    /// cascade directives are acted on.
    pub fn new(
        config: SyncConfig,
        identity: Identity,
        transport: Arc<dyn RelayTransport>,
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn LocalStore>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let (directive_tx, directive_rx) = mpsc::channel(config.directive_buffer);
        let codec = EventCodec::new(crypto);
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), directive_tx));
        let registry = Arc::new(SubscriptionRegistry::new());
        let publisher = Publisher::new(Arc::clone(&transport), config.relays.clone(), codec.clone());
        let cascade = Arc::new(CascadeController::new(
            identity.clone(),
            config.relays.clone(),
            Arc::clone(&transport),
            codec.clone(),
            Arc::clone(&reconciler),
            Arc::clone(&registry),
            FilterBuilder::new(config.since_policy),
        ));

        Ok(Self {
            config,
            identity,
            transport,
            store,
            codec,
            publisher,
            reconciler,
            registry,
            cascade,
            directives: Mutex::new(Some(directive_rx)),
            cascade_task: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn codec(&self) -> &EventCodec {
        &self.codec
    }

    pub fn cascade(&self) -> &Arc<CascadeController> {
        &self.cascade
    }

    /// Starts the cascade controller. Returns false if already started.
    pub fn start(&self) -> bool {
        let Some(rx) = self
            .directives
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        let task = tokio::spawn(Arc::clone(&self.cascade).run(rx));
        *self
            .cascade_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        info!("Sync engine started for {}", self.identity.public_key());
        true
    }

    /// Rebuilds the full subscription tree from the local store.
    pub async fn subscribe_all(&self) -> SyncResult<usize> {
        self.cascade.subscribe_all().await
    }

    /// Subscribes to a stored project and its tickets.
    pub async fn subscribe_project(&self, project_uuid: &str) -> SyncResult<usize> {
        let project = self.require_project(project_uuid).await?;
        self.cascade.subscribe_tree(&project).await
    }

    /// Closes every subscription and stops the cascade controller.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.close_all().await;
        let task = self
            .cascade_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!("Sync engine stopped, closed {} subscriptions", closed);
        closed
    }

    // ── Local writes ─────────────────────────────────────────────

    /// Persist → publish → persist the published cursor if it advances.
    async fn commit_new<T: LocalRecord>(
        &self,
        entity: T,
        is_private: bool,
        recipients: &[String],
    ) -> SyncResult<T> {
        let entity = self.reconciler.store_local(entity).await?;
        self.publish_stored(entity, is_private, recipients, None).await
    }

    /// Publishes a record as just stored, then records the published snapshot.
    async fn publish_stored<T: LocalRecord>(
        &self,
        entity: T,
        is_private: bool,
        recipients: &[String],
        delta: Option<Delta>,
    ) -> SyncResult<T> {
        let receipt: PublishReceipt = self
            .publisher
            .publish(&entity, &self.identity, is_private, recipients, delta.as_ref())
            .await?;
        debug!(
            "Published {} {} as {} ({} wraps delivered, {} failed)",
            T::KIND,
            entity.uuid(),
            receipt.event_id,
            receipt.wraps_delivered,
            receipt.wraps_failed
        );
        self.reconciler
            .record_published(entity, receipt.cursor())
            .await
    }

    async fn require_project(&self, uuid: &str) -> SyncResult<Project> {
        let store = Arc::clone(&self.store);
        let key = uuid.to_string();
        tokio::task::spawn_blocking(move || store.get_project(&key))
            .await??
            .ok_or_else(|| SyncError::NotFound(format!("project {uuid}")))
    }

    /// Creates, stores and publishes a new project, then subscribes to it.
    /// The local identity becomes its admin.
    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        is_private: bool,
        members: Vec<(String, MemberRole)>,
    ) -> SyncResult<Project> {
        let project = Project::new(
            name,
            description,
            is_private,
            self.identity.public_key(),
            members,
        );
        let recipients = member_keys(&project);
        let project = self.commit_new(project, is_private, &recipients).await?;
        info!("Created project {} ({})", project.name, project.uuid);
        self.cascade.subscribe_project(&project).await?;
        Ok(project)
    }

    /// Publishes the name, description and visibility of `edited`. Members
    /// and the ticket set are taken from the stored project.
    pub async fn update_project(&self, edited: Project) -> SyncResult<Project> {
        let uuid = edited.uuid.clone();
        let (project, _) = self
            .reconciler
            .edit(&uuid, move |project: &mut Project| {
                project.name = edited.name;
                project.description = edited.description;
                project.is_private = edited.is_private;
                Some(())
            })
            .await?;
        let recipients = member_keys(&project);
        let is_private = project.is_private;
        self.publish_stored(project, is_private, &recipients, None).await
    }

    /// Replaces the member list. Former members receive this one last
    /// update so they learn they were removed.
    pub async fn set_members(
        &self,
        project_uuid: &str,
        members: Vec<(String, MemberRole)>,
    ) -> SyncResult<Project> {
        let (project, previous) = self
            .reconciler
            .edit(project_uuid, move |project: &mut Project| {
                let now = Timestamp::now();
                let previous = std::mem::take(&mut project.members);
                for (pub_key, role) in members {
                    if project.members.iter().any(|m| m.pub_key == pub_key) {
                        continue;
                    }
                    let created_at = previous
                        .iter()
                        .find(|m| m.pub_key == pub_key)
                        .map_or(now, |m| m.created_at);
                    project.members.push(ProjectMember {
                        project_uuid: project.uuid.clone(),
                        pub_key,
                        role,
                        created_at,
                    });
                }
                Some(previous.into_iter().map(|m| m.pub_key).collect::<Vec<_>>())
            })
            .await?;

        let mut recipients = previous.unwrap_or_default();
        for key in member_keys(&project) {
            if !recipients.contains(&key) {
                recipients.push(key);
            }
        }

        let delta = Delta::new(project.uuid.clone(), Property::Membership);
        let is_private = project.is_private;
        let project = self
            .publish_stored(project, is_private, &recipients, Some(delta))
            .await?;
        self.cascade
            .handle(DeltaDirective::MembershipChanged {
                project_uuid: project.uuid.clone(),
            })
            .await?;
        Ok(project)
    }

    /// Creates a ticket in a stored project, publishes it, and adds it to
    /// the project's ticket set.
    pub async fn create_ticket(
        &self,
        project_uuid: &str,
        ticket_type: &str,
        title: &str,
        description: &str,
    ) -> SyncResult<Ticket> {
        let project = self.require_project(project_uuid).await?;
        let ticket = Ticket::new(
            project_uuid,
            ticket_type,
            title,
            description,
            self.identity.public_key(),
        );
        let ticket = self
            .commit_new(ticket, project.is_private, &member_keys(&project))
            .await?;
        self.add_ticket_to_project(project_uuid, &ticket.uuid).await?;
        info!("Created ticket {} in project {}", ticket.uuid, project_uuid);
        Ok(ticket)
    }

    /// Publishes the editable fields of `edited` (type, title, description,
    /// state, parent and children) on top of the stored ticket.
    pub async fn update_ticket(&self, edited: Ticket) -> SyncResult<Ticket> {
        let project = self.require_project(&edited.project_uuid).await?;
        let uuid = edited.uuid.clone();
        let (ticket, _) = self
            .reconciler
            .edit(&uuid, move |ticket: &mut Ticket| {
                ticket.ticket_type = edited.ticket_type;
                ticket.title = edited.title;
                ticket.description = edited.description;
                ticket.state = edited.state;
                ticket.parent_uuid = edited.parent_uuid;
                ticket.children_uuids = edited.children_uuids;
                ticket.updated_at = Timestamp::now();
                Some(())
            })
            .await?;
        self.publish_stored(ticket, project.is_private, &member_keys(&project), None)
            .await
    }

    /// Adds a ticket uuid to a project and publishes an `add-ticket` update.
    pub async fn add_ticket_to_project(
        &self,
        project_uuid: &str,
        ticket_uuid: &str,
    ) -> SyncResult<Project> {
        let added = ticket_uuid.to_string();
        let (project, changed) = self
            .reconciler
            .edit(project_uuid, move |project: &mut Project| {
                project.tickets.insert(added).then_some(())
            })
            .await?;
        if changed.is_none() {
            debug!("Ticket {} already in project {}", ticket_uuid, project_uuid);
            return Ok(project);
        }
        self.publish_ticket_change(project, ticket_uuid, Property::AddTicket)
            .await
    }

    /// Removes a ticket uuid from a project and publishes a `remove-ticket` update.
    pub async fn remove_ticket_from_project(
        &self,
        project_uuid: &str,
        ticket_uuid: &str,
    ) -> SyncResult<Project> {
        let removed = ticket_uuid.to_string();
        let (project, changed) = self
            .reconciler
            .edit(project_uuid, move |project: &mut Project| {
                project.tickets.remove(&removed).then_some(())
            })
            .await?;
        if changed.is_none() {
            debug!("Ticket {} not in project {}", ticket_uuid, project_uuid);
            return Ok(project);
        }
        self.publish_ticket_change(project, ticket_uuid, Property::RemoveTicket)
            .await
    }

    async fn publish_ticket_change(
        &self,
        project: Project,
        ticket_uuid: &str,
        property: Property,
    ) -> SyncResult<Project> {
        let recipients = member_keys(&project);
        let is_private = project.is_private;
        let delta = Delta::new(ticket_uuid, property);
        let project = self
            .publish_stored(project, is_private, &recipients, Some(delta))
            .await?;
        self.cascade
            .handle(DeltaDirective::from_delta(&project.uuid, ticket_uuid, property))
            .await?;
        Ok(project)
    }

    // ── Queries and status updates ───────────────────────────────

    /// One-shot query for the newest stored events of the given kinds.
    pub async fn fetch_latest(&self, kinds: &[u32], limit: usize) -> SyncResult<Vec<Event>> {
        let filter = kinds
            .iter()
            .fold(Filter::new(), |f, kind| f.kind(*kind))
            .limit(limit);
        self.transport.query_sync(&self.config.relays, filter).await
    }

    /// Publishes a ticket status update.
    pub async fn publish_ticket_status(
        &self,
        ticket_uuid: &str,
        status: &str,
        content: &str,
    ) -> SyncResult<Event> {
        self.publisher
            .publish_ticket_status(ticket_uuid, status, content, &self.identity)
            .await
    }

    /// Watches status updates for one ticket. `on_event` receives every
    /// update whose signature verifies, until the returned guard is
    /// unsubscribed or dropped.
    pub async fn subscribe_to_ticket_status<F>(
        &self,
        ticket_uuid: &str,
        on_event: F,
    ) -> SyncResult<StatusSubscription>
    where
        F: Fn(Event) + Send + 'static,
    {
        let crypto = Arc::clone(self.codec.crypto());
        let id = ticket_uuid.to_string();
        let handle = StreamHandle::open(
            self.transport.as_ref(),
            &self.config.relays,
            ticket_status_filter(ticket_uuid),
            move |mut rx, signal| async move {
                while let Some(message) = signal.next(&mut rx).await {
                    match message {
                        SubscriptionMessage::Event(event) => {
                            if crypto.verify(&event) {
                                on_event(event);
                            } else {
                                warn!("Status subscription {} rejected event {}", id, event.id);
                            }
                        }
                        SubscriptionMessage::Closed(reason) => {
                            debug!("Status subscription {} closed: {}", id, reason);
                            break;
                        }
                    }
                }
            },
        )
        .await?;

        Ok(StatusSubscription {
            ticket_uuid: ticket_uuid.to_string(),
            handle: Some(handle),
        })
    }
}

fn member_keys(project: &Project) -> Vec<String> {
    project.members.iter().map(|m| m.pub_key.clone()).collect()
}

/// Guard for a ticket status subscription. The underlying subscription is
/// closed exactly once: by [`StatusSubscription::unsubscribe`] or on drop.
pub struct StatusSubscription {
    ticket_uuid: String,
    handle: Option<StreamHandle>,
}

impl StatusSubscription {
    pub fn ticket_uuid(&self) -> &str {
        &self.ticket_uuid
    }

    pub fn unsubscribe(mut self) -> SyncResult<()> {
        match self.handle.take() {
            Some(mut handle) => handle.close(),
            None => Ok(()),
        }
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.close() {
                warn!("Failed to close status subscription {}: {}", self.ticket_uuid, e);
            }
        }
    }
}
