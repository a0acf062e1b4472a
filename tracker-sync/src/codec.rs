//! Event codec: projects and tickets to signed relay events and back.
//!
//! Public entities become one signed event whose content is the entity JSON.
//! Private entities become a signed *rumor* (same shape, never published)
//! plus one gift wrap per recipient. A wrap's content is the rumor encrypted
//! under the pairwise key of author and recipient. Its tags stay in the
//! clear so relays can route it, which reveals who is in the project and
//! which entity changed, but not what changed.
//!
//! On decode the cursor always comes from the event envelope (id and
//! `created_at`), never from the content.

use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tracker_crypto::{generate_nonce, CryptoProvider, Identity};
use tracker_types::{
    kinds, tag, EntityKind, Event, SyncCursor, SyncEntity, Tag, Timestamp, UnsignedEvent,
};

/// Which property of a project an update touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    AddTicket,
    RemoveTicket,
    Membership,
}

impl Property {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddTicket => "add-ticket",
            Self::RemoveTicket => "remove-ticket",
            Self::Membership => "membership",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add-ticket" => Some(Self::AddTicket),
            "remove-ticket" => Some(Self::RemoveTicket),
            "membership" => Some(Self::Membership),
            _ => None,
        }
    }
}

/// The `updated` + `property` tag pair on a project event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Uuid of the child entity (ticket uuid, or member key for membership).
    pub updated: String,
    pub property: Property,
}

impl Delta {
    pub fn new(updated: impl Into<String>, property: Property) -> Self {
        Self {
            updated: updated.into(),
            property,
        }
    }

    /// Reads the delta from a tag list. Both tags must be present and the
    /// property must be known.
    pub fn from_tags(tags: &[Tag]) -> Option<Self> {
        let updated = tracker_types::first_tag_value(tags, tag::UPDATED)?;
        let property = tracker_types::tag_values(tags, tag::PROPERTY).find_map(Property::parse)?;
        Some(Self::new(updated, property))
    }
}

/// Result of encoding an entity.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// The public event, or the signed rumor for private entities.
    pub event: Event,
    /// One gift wrap per recipient; empty for public entities.
    pub wraps: Vec<Event>,
}

impl Encoded {
    pub fn is_private(&self) -> bool {
        !self.wraps.is_empty()
    }

    /// Cursor the author should persist once this is published.
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.event.id.clone(), self.event.created_at)
    }
}

/// An entity recovered from an event, with the envelope it came in.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    /// The entity, its cursor already set from the envelope.
    pub entity: T,
    pub event_id: String,
    pub created_at: Timestamp,
    /// Author public key.
    pub author: String,
    /// Tags of the event carrying the entity (the rumor, for gift wraps).
    pub tags: Vec<Tag>,
}

impl<T> Decoded<T> {
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.event_id.clone(), self.created_at)
    }

    pub fn delta(&self) -> Option<Delta> {
        Delta::from_tags(&self.tags)
    }
}

/// Encodes and decodes tracker events through a [`CryptoProvider`].
#[derive(Clone)]
pub struct EventCodec {
    crypto: Arc<dyn CryptoProvider>,
}

impl EventCodec {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    /// Encodes `entity` as `identity`.
    ///
    /// `created_at` is the current time, bumped past the entity's cursor if
    /// needed so that a rapid local edit is never treated as stale.
    /// Private entities get one wrap per key in `recipients`.
    pub fn encode<T: SyncEntity>(
        &self,
        entity: &T,
        identity: &Identity,
        is_private: bool,
        recipients: &[String],
        delta: Option<&Delta>,
    ) -> SyncResult<Encoded> {
        let content = serde_json::to_string(entity)?;
        let previous = entity.cursor();
        let created_at = next_timestamp(previous.as_ref());

        let mut template = UnsignedEvent::new(identity.public_key(), T::KIND.event_kind(), content)
            .at(created_at);
        template.tags = entity.scope_tags();
        template.tags.push(Tag::new(tag::PRIVATE, is_private.to_string()));
        if let Some(delta) = delta {
            template.tags.push(Tag::new(tag::UPDATED, delta.updated.as_str()));
            template.tags.push(Tag::new(tag::PROPERTY, delta.property.as_str()));
        }
        if let Some(previous) = previous {
            template.tags.push(Tag::new(tag::E, previous.event_id));
        }

        let event = self.crypto.sign(template, identity)?;
        if !is_private {
            return Ok(Encoded {
                event,
                wraps: Vec::new(),
            });
        }

        let rumor = serde_json::to_vec(&event)?;
        let mut wraps = Vec::with_capacity(recipients.len());
        for recipient in dedup(recipients) {
            let key = self.crypto.derive_shared_key(identity, recipient)?;
            let ciphertext = self.crypto.encrypt(&rumor, &key, &generate_nonce())?;

            let mut wrap = UnsignedEvent::new(identity.public_key(), kinds::GIFT_WRAP, ciphertext)
                .at(created_at)
                .tag(tag::P, recipient)
                .tag(tag::PROJECT_UUID, entity.project_uuid());
            if T::KIND == EntityKind::Ticket {
                wrap = wrap.tag(tag::TICKET_UUID, entity.uuid());
            }
            wrap = wrap.tag(tag::TYPE, T::KIND.as_str());
            wraps.push(self.crypto.sign(wrap, identity)?);
        }

        Ok(Encoded { event, wraps })
    }

    /// Decodes a public event or a gift wrap addressed to `identity`.
    pub fn decode<T: SyncEntity>(&self, event: &Event, identity: &Identity) -> SyncResult<Decoded<T>> {
        if event.kind == kinds::GIFT_WRAP {
            self.decode_gift_wrap(event, identity)
        } else {
            self.decode_public(event)
        }
    }

    /// Decodes a plaintext event. The signature must verify.
    pub fn decode_public<T: SyncEntity>(&self, event: &Event) -> SyncResult<Decoded<T>> {
        if event.kind != T::KIND.event_kind() {
            return Err(SyncError::UnsupportedKind(event.kind));
        }
        if !self.crypto.verify(event) {
            return Err(SyncError::Authentication(format!(
                "invalid signature on event {}",
                event.id
            )));
        }
        let entity: T = serde_json::from_str(&event.content)
            .map_err(|e| SyncError::InvalidEvent(format!("event {}: {e}", event.id)))?;
        into_decoded(entity, event, event.tags.clone())
    }

    /// Opens a gift wrap and decodes its rumor.
    pub fn decode_gift_wrap<T: SyncEntity>(
        &self,
        wrap: &Event,
        identity: &Identity,
    ) -> SyncResult<Decoded<T>> {
        if wrap.kind != kinds::GIFT_WRAP {
            return Err(SyncError::UnsupportedKind(wrap.kind));
        }
        if !self.crypto.verify(wrap) {
            return Err(SyncError::Authentication(format!(
                "invalid signature on gift wrap {}",
                wrap.id
            )));
        }
        if !wrap.has_tag(tag::P, identity.public_key()) {
            return Err(SyncError::Decryption(format!(
                "gift wrap {} is not addressed to us",
                wrap.id
            )));
        }

        let key = self
            .crypto
            .derive_shared_key(identity, &wrap.pubkey)
            .map_err(|e| SyncError::Decryption(e.to_string()))?;
        let plaintext = self
            .crypto
            .decrypt(&wrap.content, &key)
            .map_err(|e| SyncError::Decryption(e.to_string()))?;
        let rumor: Event = serde_json::from_slice(&plaintext)
            .map_err(|e| SyncError::Decryption(format!("malformed rumor: {e}")))?;

        if rumor.pubkey != wrap.pubkey || !self.crypto.verify(&rumor) {
            return Err(SyncError::Authentication(format!(
                "rumor {} in gift wrap {} is not signed by the wrap author",
                rumor.id, wrap.id
            )));
        }
        if rumor.kind != T::KIND.event_kind() {
            return Err(SyncError::UnsupportedKind(rumor.kind));
        }

        let entity: T = serde_json::from_str(&rumor.content)
            .map_err(|e| SyncError::Decryption(format!("malformed {} content: {e}", T::KIND)))?;
        into_decoded(entity, &rumor, rumor.tags.clone())
    }

    /// True iff the signature is valid and `event.pubkey == owner`.
    pub fn verify_event_auth(&self, event: &Event, owner: &str) -> bool {
        event.pubkey == owner && self.crypto.verify(event)
    }

    /// Builds a signed ticket status update: kind 30402, tags `d` and `status`.
    pub fn ticket_status(
        &self,
        ticket_uuid: &str,
        status: &str,
        content: &str,
        identity: &Identity,
    ) -> SyncResult<Event> {
        let template = UnsignedEvent::new(identity.public_key(), kinds::TICKET_STATUS, content)
            .tag(tag::D, ticket_uuid)
            .tag(tag::STATUS, status);
        Ok(self.crypto.sign(template, identity)?)
    }
}

fn into_decoded<T: SyncEntity>(mut entity: T, envelope: &Event, tags: Vec<Tag>) -> SyncResult<Decoded<T>> {
    match envelope.first_tag_value(tag::D) {
        Some(d) if d == entity.uuid() => {}
        other => {
            return Err(SyncError::InvalidEvent(format!(
                "event {} carries {} {} but d tag {:?}",
                envelope.id,
                T::KIND,
                entity.uuid(),
                other
            )));
        }
    }
    let cursor = SyncCursor::new(envelope.id.clone(), envelope.created_at);
    entity.set_cursor(cursor);
    Ok(Decoded {
        entity,
        event_id: envelope.id.clone(),
        created_at: envelope.created_at,
        author: envelope.pubkey.clone(),
        tags,
    })
}

fn next_timestamp(previous: Option<&SyncCursor>) -> Timestamp {
    let now = Timestamp::now();
    match previous {
        Some(cursor) if cursor.created_at >= now => Timestamp::from_secs(cursor.created_at.as_secs() + 1),
        _ => now,
    }
}

fn dedup(keys: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(&key.as_str()) {
            out.push(key);
        }
    }
    out
}
