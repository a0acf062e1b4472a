//! Synchronized domain records: projects, their members, and tickets.
//!
//! The JSON shape of these types is the plaintext content of project and
//! ticket events. `last_event_id` / `last_event_created_at` travel in that
//! content too, but decoders always overwrite them from the event envelope.

use crate::event::tag;
use crate::{Tag, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Generates a fresh random entity uuid.
pub fn new_entity_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// The last successfully reconciled event for an entity.
///
/// Used both as the idempotency token for reconciliation and as the `since`
/// bound for the next subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    pub event_id: String,
    pub created_at: Timestamp,
}

impl SyncCursor {
    pub fn new(event_id: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            event_id: event_id.into(),
            created_at,
        }
    }
}

/// Which kind of record an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Ticket,
}

impl EntityKind {
    /// Value of the `type` tag on gift wraps.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Ticket => "ticket",
        }
    }

    /// Event kind used for the public (or rumor) event.
    pub const fn event_kind(&self) -> u32 {
        match self {
            Self::Project => crate::kinds::PROJECT,
            Self::Ticket => crate::kinds::TICKET,
        }
    }

    /// Maps a public event kind back to the record kind.
    pub fn from_event_kind(kind: u32) -> Option<Self> {
        match kind {
            crate::kinds::PROJECT => Some(Self::Project),
            crate::kinds::TICKET => Some(Self::Ticket),
            _ => None,
        }
    }

    /// Parses the `type` tag value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "ticket" => Some(Self::Ticket),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that is replicated through relay events.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Stable identity of the record.
    fn uuid(&self) -> &str;

    /// The project this record belongs to (itself, for projects).
    fn project_uuid(&self) -> &str;

    /// The last reconciled event, if this record has ever been synced.
    fn cursor(&self) -> Option<SyncCursor>;

    /// Records a new reconciled event.
    fn set_cursor(&mut self, cursor: SyncCursor);

    /// Timestamp compared by last-writer-wins (`ZERO` when never synced).
    fn last_event_created_at(&self) -> Timestamp {
        self.cursor().map(|c| c.created_at).unwrap_or(Timestamp::ZERO)
    }

    /// Identity tags placed on the public event or rumor.
    fn scope_tags(&self) -> Vec<Tag>;
}

fn cursor_from(id: &Option<String>, created_at: Timestamp) -> Option<SyncCursor> {
    match id {
        Some(id) if !id.is_empty() => Some(SyncCursor::new(id.clone(), created_at)),
        _ => None,
    }
}

/// Role of a project member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    #[default]
    Member,
}

impl MemberRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of a project. For private projects the member list decides who
/// receives gift wraps of future updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub project_uuid: String,
    pub pub_key: String,
    pub role: MemberRole,
    pub created_at: Timestamp,
}

/// A project: a named, optionally private, collection of tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_private: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_event_id: Option<String>,
    #[serde(default)]
    pub last_event_created_at: Timestamp,
    #[serde(default)]
    pub members: Vec<ProjectMember>,
    #[serde(default)]
    pub tickets: BTreeSet<String>,
}

impl Project {
    /// Creates a new project. The creator is always the first member, with
    /// the admin role; any other entry for the creator's key is ignored.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        is_private: bool,
        creator_pubkey: &str,
        members: impl IntoIterator<Item = (String, MemberRole)>,
    ) -> Self {
        let uuid = new_entity_uuid();
        let created_at = Timestamp::now();

        let mut all = vec![ProjectMember {
            project_uuid: uuid.clone(),
            pub_key: creator_pubkey.to_string(),
            role: MemberRole::Admin,
            created_at,
        }];
        for (pub_key, role) in members {
            if all.iter().any(|m| m.pub_key == pub_key) {
                continue;
            }
            all.push(ProjectMember {
                project_uuid: uuid.clone(),
                pub_key,
                role,
                created_at,
            });
        }

        Self {
            uuid,
            name: name.into(),
            description: description.into(),
            is_private,
            created_at,
            last_event_id: None,
            last_event_created_at: Timestamp::ZERO,
            members: all,
            tickets: BTreeSet::new(),
        }
    }

    /// Whether the given key is in the member list.
    pub fn is_member(&self, pubkey: &str) -> bool {
        self.members.iter().any(|m| m.pub_key == pubkey)
    }

    /// Role of the given key, if it is a member.
    pub fn role_of(&self, pubkey: &str) -> Option<MemberRole> {
        self.members
            .iter()
            .find(|m| m.pub_key == pubkey)
            .map(|m| m.role)
    }
}

impl SyncEntity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn project_uuid(&self) -> &str {
        &self.uuid
    }

    fn cursor(&self) -> Option<SyncCursor> {
        cursor_from(&self.last_event_id, self.last_event_created_at)
    }

    fn set_cursor(&mut self, cursor: SyncCursor) {
        self.last_event_id = Some(cursor.event_id);
        self.last_event_created_at = cursor.created_at;
    }

    fn scope_tags(&self) -> Vec<Tag> {
        vec![
            Tag::new(tag::D, &self.uuid),
            Tag::new(tag::PROJECT_UUID, &self.uuid),
            Tag::new(tag::NAME, &self.name),
        ]
    }
}

/// Initial state of a freshly created ticket.
pub const INITIAL_TICKET_STATE: &str = "backlog";

/// A unit of work inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub uuid: String,
    pub project_uuid: String,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: String,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    pub creator_pubkey: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub last_event_id: Option<String>,
    #[serde(default)]
    pub last_event_created_at: Timestamp,
    #[serde(default)]
    pub children_uuids: BTreeSet<String>,
}

impl Ticket {
    /// Creates a new ticket in the `backlog` state.
    pub fn new(
        project_uuid: impl Into<String>,
        ticket_type: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        creator_pubkey: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            uuid: new_entity_uuid(),
            project_uuid: project_uuid.into(),
            ticket_type: ticket_type.into(),
            title: title.into(),
            description: description.into(),
            state: INITIAL_TICKET_STATE.to_string(),
            parent_uuid: None,
            creator_pubkey: creator_pubkey.into(),
            created_at: now,
            updated_at: now,
            last_event_id: None,
            last_event_created_at: Timestamp::ZERO,
            children_uuids: BTreeSet::new(),
        }
    }
}

impl SyncEntity for Ticket {
    const KIND: EntityKind = EntityKind::Ticket;

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn project_uuid(&self) -> &str {
        &self.project_uuid
    }

    fn cursor(&self) -> Option<SyncCursor> {
        cursor_from(&self.last_event_id, self.last_event_created_at)
    }

    fn set_cursor(&mut self, cursor: SyncCursor) {
        self.last_event_id = Some(cursor.event_id);
        self.last_event_created_at = cursor.created_at;
    }

    fn scope_tags(&self) -> Vec<Tag> {
        vec![
            Tag::new(tag::D, &self.uuid),
            Tag::new(tag::PROJECT_UUID, &self.project_uuid),
            Tag::new(tag::TICKET_UUID, &self.uuid),
        ]
    }
}
