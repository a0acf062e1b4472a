//! Cascading subscription controller.
//!
//! Keeps the subscription tree in step with the local store: one
//! subscription per visible project, plus one per ticket listed in that
//! project's `tickets` set, each keyed by the entity uuid. Directives from
//! the reconciler grow and shrink the tree as project events arrive.
//!
//! Every subscription runs as its own task that decodes incoming events and
//! hands them to the reconciler. A failure on one event is logged and the
//! stream moves on.

use crate::codec::EventCodec;
use crate::error::{SyncError, SyncResult};
use crate::filter::{FilterBuilder, SubscriptionTarget, Visibility};
use crate::reconcile::{DeltaDirective, LocalRecord, ReconcileOutcome, Reconciler};
use crate::registry::{Subscription, SubscriptionHandle, SubscriptionRegistry};
use crate::transport::{RelayTransport, SubscriptionMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use tracker_crypto::Identity;
use tracker_storage::LocalStore;
use tracker_types::{Event, Filter, Project, SyncEntity, Ticket, Timestamp};

/// Stop flag shared by a [`StreamHandle`] and the task draining it.
#[derive(Default)]
pub(crate) struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Next message from `rx`, or `None` once closed or once the relays end
    /// the stream. Only the wait for a message is interrupted by a close;
    /// whatever the caller does with a message runs to completion.
    pub(crate) async fn next(
        &self,
        rx: &mut mpsc::UnboundedReceiver<SubscriptionMessage>,
    ) -> Option<SubscriptionMessage> {
        tokio::select! {
            biased;
            () = self.wait() => None,
            message = rx.recv() => message,
        }
    }
}

/// A transport subscription plus the task draining it.
///
/// Closing never aborts the task. It stops at its next wait for a message,
/// so an event already being applied finishes under its uuid lock and
/// nothing delivered afterwards reaches the store.
pub(crate) struct StreamHandle {
    transport: Box<dyn SubscriptionHandle>,
    signal: Arc<CloseSignal>,
}

impl StreamHandle {
    /// Opens `filter` on the transport and spawns `drive` over its messages.
    pub(crate) async fn open<F, Fut>(
        transport: &dyn RelayTransport,
        relays: &[String],
        filter: Filter,
        drive: F,
    ) -> SyncResult<Self>
    where
        F: FnOnce(mpsc::UnboundedReceiver<SubscriptionMessage>, Arc<CloseSignal>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = transport.subscribe_many(relays, filter, tx).await?;
        let signal = Arc::new(CloseSignal::default());
        tokio::spawn(drive(rx, Arc::clone(&signal)));
        Ok(Self {
            transport: handle,
            signal,
        })
    }
}

impl SubscriptionHandle for StreamHandle {
    fn close(&mut self) -> SyncResult<()> {
        self.signal.close();
        self.transport.close()
    }
}

/// Everything a subscription task needs to turn events into store writes.
#[derive(Clone)]
struct StreamContext {
    id: String,
    identity: Identity,
    codec: EventCodec,
    reconciler: Arc<Reconciler>,
}

impl StreamContext {
    async fn run<T: LocalRecord>(
        self,
        mut rx: mpsc::UnboundedReceiver<SubscriptionMessage>,
        signal: Arc<CloseSignal>,
    ) {
        while let Some(message) = signal.next(&mut rx).await {
            match message {
                SubscriptionMessage::Event(event) => self.handle::<T>(&event, &signal).await,
                SubscriptionMessage::Closed(reason) => {
                    debug!("Subscription {} closed by relays: {}", self.id, reason);
                    break;
                }
            }
        }
    }

    async fn handle<T: LocalRecord>(&self, event: &Event, signal: &CloseSignal) {
        let decoded = match self.codec.decode::<T>(event, &self.identity) {
            Ok(decoded) => decoded,
            Err(e) => {
                log_dropped(&self.id, event, &e);
                return;
            }
        };
        if signal.is_closed() {
            return;
        }
        match self.reconciler.apply(decoded).await {
            Ok(ReconcileOutcome::Applied { directive }) => {
                debug!(
                    "Subscription {} applied event {} (directive: {:?})",
                    self.id, event.id, directive
                );
            }
            Ok(ReconcileOutcome::Stale) => {}
            Ok(ReconcileOutcome::Orphaned) => {
                warn!(
                    "Subscription {} dropped event {}: {} has no local project",
                    self.id,
                    event.id,
                    T::KIND
                );
            }
            Err(SyncError::ChannelClosed) => {
                warn!(
                    "Subscription {} applied event {} but the cascade controller is stopped",
                    self.id, event.id
                );
            }
            Err(e) => warn!("Subscription {} failed to apply event {}: {}", self.id, event.id, e),
        }
    }
}

fn log_dropped(id: &str, event: &Event, err: &SyncError) {
    match err {
        SyncError::Authentication(_) => {
            warn!("Subscription {} rejected event {}: {}", id, event.id, err)
        }
        SyncError::Decryption(_) => {
            warn!("Subscription {} could not decrypt event {}: {}", id, event.id, err)
        }
        _ => warn!("Subscription {} dropped event {}: {}", id, event.id, err),
    }
}

/// Opens, tracks and closes project and ticket subscriptions.
pub struct CascadeController {
    identity: Identity,
    relays: Vec<String>,
    transport: Arc<dyn RelayTransport>,
    codec: EventCodec,
    reconciler: Arc<Reconciler>,
    registry: Arc<SubscriptionRegistry>,
    filters: FilterBuilder,
    /// Serializes check-then-open so a directive and a local write racing
    /// on the same entity open one transport subscription, not two.
    opening: tokio::sync::Mutex<()>,
}

impl CascadeController {
    pub fn new(
        identity: Identity,
        relays: Vec<String>,
        transport: Arc<dyn RelayTransport>,
        codec: EventCodec,
        reconciler: Arc<Reconciler>,
        registry: Arc<SubscriptionRegistry>,
        filters: FilterBuilder,
    ) -> Self {
        Self {
            identity,
            relays,
            transport,
            codec,
            reconciler,
            registry,
            filters,
            opening: tokio::sync::Mutex::new(()),
        }
    }

    fn store(&self) -> Arc<dyn LocalStore> {
        Arc::clone(self.reconciler.store())
    }

    async fn load<T: LocalRecord>(&self, uuid: &str) -> SyncResult<Option<T>> {
        let store = self.store();
        let uuid = uuid.to_string();
        Ok(tokio::task::spawn_blocking(move || T::load(store.as_ref(), &uuid)).await??)
    }

    async fn open<T: LocalRecord>(
        &self,
        target: SubscriptionTarget,
        visibility: &Visibility,
        since: Option<Timestamp>,
    ) -> SyncResult<bool> {
        let id = target.id().to_string();
        let _opening = self.opening.lock().await;
        if self.registry.contains(&id).await {
            return Ok(false);
        }

        let filter = self.filters.build(&target, visibility, since);
        let context = StreamContext {
            id: id.clone(),
            identity: self.identity.clone(),
            codec: self.codec.clone(),
            reconciler: Arc::clone(&self.reconciler),
        };
        let handle = StreamHandle::open(
            self.transport.as_ref(),
            &self.relays,
            filter,
            move |rx, signal| context.run::<T>(rx, signal),
        )
        .await?;

        let added = self
            .registry
            .add(Subscription::new(id.clone(), Box::new(handle)))
            .await;
        if added {
            debug!("Subscribed to {} {}", target.kind(), id);
        }
        Ok(added)
    }

    /// Subscribes to a project's own events. Returns false if already
    /// subscribed or if the project is private and we are not a member.
    pub async fn subscribe_project(&self, project: &Project) -> SyncResult<bool> {
        let Some(visibility) = Visibility::for_project(project, self.identity.public_key()) else {
            debug!("Not a member of private project {}, not subscribing", project.uuid);
            return Ok(false);
        };
        let since = self.filters.since(project.cursor().as_ref());
        self.open::<Project>(SubscriptionTarget::project(&project.uuid), &visibility, since)
            .await
    }

    /// Subscribes to one ticket of `project`.
    ///
    /// A ticket already stored resumes from its cursor (or the since policy).
    /// A ticket we have never seen gets no lower bound, so the event that
    /// created it is not missed.
    pub async fn subscribe_ticket(&self, project: &Project, ticket_uuid: &str) -> SyncResult<bool> {
        let Some(visibility) = Visibility::for_project(project, self.identity.public_key()) else {
            return Ok(false);
        };
        let since = match self.load::<Ticket>(ticket_uuid).await? {
            Some(ticket) => self.filters.since(ticket.cursor().as_ref()),
            None => None,
        };
        self.open::<Ticket>(
            SubscriptionTarget::ticket(&project.uuid, ticket_uuid),
            &visibility,
            since,
        )
        .await
    }

    /// Subscribes to a project and every ticket it lists. Returns how many
    /// new subscriptions were registered.
    pub async fn subscribe_tree(&self, project: &Project) -> SyncResult<usize> {
        let mut opened = usize::from(self.subscribe_project(project).await?);
        if Visibility::for_project(project, self.identity.public_key()).is_none() {
            return Ok(opened);
        }
        for ticket_uuid in &project.tickets {
            opened += usize::from(self.subscribe_ticket(project, ticket_uuid).await?);
        }
        Ok(opened)
    }

    /// Rebuilds the whole tree from the local store.
    pub async fn subscribe_all(&self) -> SyncResult<usize> {
        let store = self.store();
        let me = self.identity.public_key().to_string();
        let projects =
            tokio::task::spawn_blocking(move || store.list_projects_for_member(&me)).await??;

        let mut opened = 0;
        for project in &projects {
            opened += self.subscribe_tree(project).await?;
        }
        info!(
            "Subscribed to {} projects ({} new subscriptions)",
            projects.len(),
            opened
        );
        Ok(opened)
    }

    /// Closes a project subscription and all of its ticket subscriptions.
    pub async fn unsubscribe_tree(&self, project: &Project) -> SyncResult<usize> {
        let mut closed = usize::from(self.registry.remove(&project.uuid).await);
        for ticket_uuid in &project.tickets {
            closed += usize::from(self.registry.remove(ticket_uuid).await);
        }
        Ok(closed)
    }

    /// Applies one directive to the subscription tree.
    pub async fn handle(&self, directive: DeltaDirective) -> SyncResult<()> {
        let project_uuid = directive.project_uuid().to_string();
        let Some(project) = self.load::<Project>(&project_uuid).await? else {
            return Err(SyncError::CascadeInconsistency(format!(
                "{directive:?} refers to unknown project {project_uuid}"
            )));
        };

        match directive {
            DeltaDirective::AddTicket { ticket_uuid, .. } => {
                if !self.subscribe_ticket(&project, &ticket_uuid).await? {
                    debug!("Ticket {} already tracked", ticket_uuid);
                }
            }
            DeltaDirective::RemoveTicket { ticket_uuid, .. } => {
                self.registry.remove(&ticket_uuid).await;
            }
            DeltaDirective::MembershipChanged { .. } => {
                let me = self.identity.public_key();
                if project.is_private && !project.is_member(me) {
                    let closed = self.unsubscribe_tree(&project).await?;
                    info!(
                        "No longer a member of project {}, closed {} subscriptions",
                        project.uuid, closed
                    );
                } else {
                    self.subscribe_tree(&project).await?;
                }
            }
        }
        Ok(())
    }

    /// Consumes directives until the sender side is dropped.
    pub async fn run(self: Arc<Self>, mut directives: mpsc::Receiver<DeltaDirective>) {
        while let Some(directive) = directives.recv().await {
            match self.handle(directive).await {
                Ok(()) => {}
                Err(e @ SyncError::CascadeInconsistency(_)) => warn!("{}", e),
                Err(e) => warn!("Failed to apply directive: {}", e),
            }
        }
        debug!("Directive queue closed, cascade controller stopping");
    }
}
