//! Subscription registry.
//!
//! Owns every live subscription, keyed by the uuid of the entity it watches.
//! All mutations go through one async mutex, so a callback on one stream can
//! add or remove subscriptions while other streams are running.

use crate::error::SyncResult;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Something that can be closed: a transport subscription, or a stream
/// task wrapped around one.
pub trait SubscriptionHandle: Send {
    fn close(&mut self) -> SyncResult<()>;
}

/// A live subscription and the id it is registered under.
pub struct Subscription {
    pub id: String,
    handle: Box<dyn SubscriptionHandle>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, handle: Box<dyn SubscriptionHandle>) -> Self {
        Self {
            id: id.into(),
            handle,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Map of subscription id → live handle.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Box<dyn SubscriptionHandle>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription. Returns false if the id is already taken;
    /// the rejected subscription is closed so it cannot leak.
    pub async fn add(&self, subscription: Subscription) -> bool {
        let Subscription { id, mut handle } = subscription;
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            debug!("Subscription {} already registered", id);
            drop(entries);
            if let Err(e) = handle.close() {
                warn!("Failed to close duplicate subscription {}: {}", id, e);
            }
            return false;
        }
        debug!("Subscription {} added", id);
        entries.insert(id, handle);
        true
    }

    /// Closes and removes a subscription. Returns false if it was not registered.
    pub async fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(mut handle) = entries.remove(id) else {
            debug!("Subscription {} not registered", id);
            return false;
        };
        if let Err(e) = handle.close() {
            warn!("Failed to close subscription {}: {}", id, e);
        }
        debug!("Subscription {} removed", id);
        true
    }

    /// Closes every subscription and empties the registry. Close failures are
    /// logged, never propagated. Returns how many subscriptions were closed.
    pub async fn close_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        for (id, mut handle) in entries.drain() {
            if let Err(e) = handle.close() {
                warn!("Failed to close subscription {} during shutdown: {}", id, e);
            }
        }
        debug!("Closed {} subscriptions", count);
        count
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
