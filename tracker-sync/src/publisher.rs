//! Publisher: fans encoded events out to the relays.
//!
//! A public event succeeds as soon as any relay accepts it. A private
//! entity is delivered as independent gift wraps; one wrap (or one relay)
//! failing never stops the others, and the publish only fails if no wrap
//! reached any relay.

use crate::codec::{Delta, Encoded, EventCodec};
use crate::error::{SyncError, SyncResult};
use crate::transport::{RelayRejection, RelayTransport};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use tracker_crypto::Identity;
use tracker_types::{tag, Event, SyncCursor, SyncEntity, Timestamp};

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Id of the public event, or of the rumor for private entities.
    pub event_id: String,
    pub created_at: Timestamp,
    pub wraps_delivered: usize,
    pub wraps_failed: usize,
}

impl PublishReceipt {
    /// The cursor the author should persist.
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.event_id.clone(), self.created_at)
    }
}

/// Publishes tracker entities through a [`RelayTransport`].
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn RelayTransport>,
    relays: Vec<String>,
    codec: EventCodec,
}

impl Publisher {
    pub fn new(transport: Arc<dyn RelayTransport>, relays: Vec<String>, codec: EventCodec) -> Self {
        Self {
            transport,
            relays,
            codec,
        }
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Sends one event to every relay and returns the first relay to accept it.
    ///
    /// Remaining acknowledgements keep draining in the background.
    pub async fn publish_event(&self, event: &Event) -> SyncResult<String> {
        if self.relays.is_empty() {
            return Err(SyncError::Config("no relays configured".to_string()));
        }

        let mut pending: FuturesUnordered<_> = self
            .transport
            .publish(&self.relays, event)
            .into_iter()
            .collect();
        let mut failures: Vec<RelayRejection> = Vec::new();

        loop {
            let ack = pending.next().await;
            match ack {
                None => break,
                Some(Ok(relay)) => {
                    debug!("Event {} accepted by {}", event.id, relay);
                    if !pending.is_empty() {
                        let event_id = event.id.clone();
                        tokio::spawn(async move {
                            while let Some(ack) = pending.next().await {
                                if let Err(rejection) = ack {
                                    debug!("Event {} rejected by {}", event_id, rejection);
                                }
                            }
                        });
                    }
                    return Ok(relay);
                }
                Some(Err(rejection)) => {
                    debug!("Event {} rejected by {}", event.id, rejection);
                    failures.push(rejection);
                }
            }
        }

        Err(SyncError::AllRelaysFailed { failures })
    }

    /// Publishes an already-encoded entity.
    pub async fn publish_encoded(&self, encoded: &Encoded) -> SyncResult<PublishReceipt> {
        let mut receipt = PublishReceipt {
            event_id: encoded.event.id.clone(),
            created_at: encoded.event.created_at,
            wraps_delivered: 0,
            wraps_failed: 0,
        };

        if !encoded.is_private() {
            self.publish_event(&encoded.event).await?;
            return Ok(receipt);
        }

        let results =
            futures::future::join_all(encoded.wraps.iter().map(|wrap| self.publish_event(wrap)))
                .await;

        let mut failures = Vec::new();
        for (wrap, result) in encoded.wraps.iter().zip(results) {
            match result {
                Ok(_) => receipt.wraps_delivered += 1,
                Err(e) => {
                    let recipient = wrap.first_tag_value(tag::P).unwrap_or("?");
                    warn!(
                        "Gift wrap {} for {} not delivered: {}",
                        wrap.id, recipient, e
                    );
                    receipt.wraps_failed += 1;
                    match e {
                        SyncError::AllRelaysFailed { failures: f } => failures.extend(f),
                        other => return Err(other),
                    }
                }
            }
        }

        if receipt.wraps_delivered == 0 {
            return Err(SyncError::AllRelaysFailed { failures });
        }
        Ok(receipt)
    }

    /// Encodes `entity` as `identity` and publishes it.
    ///
    /// `members` are the gift-wrap recipients when `is_private` is set.
    pub async fn publish<T: SyncEntity>(
        &self,
        entity: &T,
        identity: &Identity,
        is_private: bool,
        members: &[String],
        delta: Option<&Delta>,
    ) -> SyncResult<PublishReceipt> {
        if is_private && members.is_empty() {
            return Err(SyncError::Config(format!(
                "private {} {} has no recipients",
                T::KIND,
                entity.uuid()
            )));
        }
        let encoded = self.codec.encode(entity, identity, is_private, members, delta)?;
        self.publish_encoded(&encoded).await
    }

    /// Publishes a ticket status update (kind 30402) in a single publish call.
    pub async fn publish_ticket_status(
        &self,
        ticket_uuid: &str,
        status: &str,
        content: &str,
        identity: &Identity,
    ) -> SyncResult<Event> {
        let event = self.codec.ticket_status(ticket_uuid, status, content, identity)?;
        self.publish_event(&event).await?;
        Ok(event)
    }
}
