//! Filter builder.
//!
//! Turns "watch this project" or "watch this ticket" into the relay filter
//! other clients expect. The filter shape is part of the wire contract.

use crate::config::SincePolicy;
use tracker_types::{kinds, tag, EntityKind, Filter, Project, SyncCursor, Timestamp};

/// How an entity's events are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Plain signed events.
    Public,
    /// Gift wraps addressed to `recipient`.
    Private { recipient: String },
}

impl Visibility {
    /// The variant `pubkey` should use for `project`, or `None` if the
    /// project is private and `pubkey` is not a member.
    pub fn for_project(project: &Project, pubkey: &str) -> Option<Self> {
        if !project.is_private {
            return Some(Self::Public);
        }
        project.is_member(pubkey).then(|| Self::Private {
            recipient: pubkey.to_string(),
        })
    }
}

/// The entity a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    Project { uuid: String },
    Ticket { project_uuid: String, ticket_uuid: String },
}

impl SubscriptionTarget {
    pub fn project(uuid: impl Into<String>) -> Self {
        Self::Project { uuid: uuid.into() }
    }

    pub fn ticket(project_uuid: impl Into<String>, ticket_uuid: impl Into<String>) -> Self {
        Self::Ticket {
            project_uuid: project_uuid.into(),
            ticket_uuid: ticket_uuid.into(),
        }
    }

    /// Registry id: the uuid of the watched entity.
    pub fn id(&self) -> &str {
        match self {
            Self::Project { uuid } => uuid,
            Self::Ticket { ticket_uuid, .. } => ticket_uuid,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Project { .. } => EntityKind::Project,
            Self::Ticket { .. } => EntityKind::Ticket,
        }
    }

    fn project_uuid(&self) -> &str {
        match self {
            Self::Project { uuid } => uuid,
            Self::Ticket { project_uuid, .. } => project_uuid,
        }
    }
}

/// Builds subscription filters under a `since` policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterBuilder {
    policy: SincePolicy,
}

impl FilterBuilder {
    pub fn new(policy: SincePolicy) -> Self {
        Self { policy }
    }

    /// `since` for an entity with the given cursor: the cursor's timestamp
    /// if there is one, otherwise whatever the policy says.
    pub fn since(&self, cursor: Option<&SyncCursor>) -> Option<Timestamp> {
        self.policy.resolve(cursor, Timestamp::now())
    }

    /// Filter for `target` with an explicit `since`.
    pub fn build(
        &self,
        target: &SubscriptionTarget,
        visibility: &Visibility,
        since: Option<Timestamp>,
    ) -> Filter {
        let filter = match visibility {
            Visibility::Public => {
                let filter = Filter::new()
                    .kind(target.kind().event_kind())
                    .tag(tag::PROJECT_UUID, target.project_uuid());
                match target {
                    SubscriptionTarget::Project { .. } => filter,
                    SubscriptionTarget::Ticket { ticket_uuid, .. } => {
                        filter.tag(tag::D, ticket_uuid.as_str())
                    }
                }
            }
            Visibility::Private { recipient } => {
                let filter = Filter::new()
                    .kind(kinds::GIFT_WRAP)
                    .tag(tag::PROJECT_UUID, target.project_uuid());
                let filter = match target {
                    SubscriptionTarget::Project { .. } => filter,
                    SubscriptionTarget::Ticket { ticket_uuid, .. } => {
                        filter.tag(tag::TICKET_UUID, ticket_uuid.as_str())
                    }
                };
                filter
                    .tag(tag::TYPE, target.kind().as_str())
                    .tag(tag::P, recipient.as_str())
            }
        };
        filter.since(since)
    }

    /// Filter for `target`, with `since` taken from its cursor or the policy.
    pub fn for_cursor(
        &self,
        target: &SubscriptionTarget,
        visibility: &Visibility,
        cursor: Option<&SyncCursor>,
    ) -> Filter {
        self.build(target, visibility, self.since(cursor))
    }
}

/// Filter for status updates of one ticket: `{kinds:[30402], "#d":[uuid]}`.
pub fn ticket_status_filter(ticket_uuid: &str) -> Filter {
    Filter::new()
        .kind(kinds::TICKET_STATUS)
        .tag(tag::D, ticket_uuid)
}
