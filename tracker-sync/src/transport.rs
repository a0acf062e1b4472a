//! Relay transport abstraction.
//!
//! The engine never speaks a relay wire protocol itself. It hands signed
//! events and filters to a [`RelayTransport`], which fans them out to the
//! configured endpoints. Relays are unreliable: a transport may deliver the
//! same event several times and in any order.

use crate::error::SyncResult;
use crate::registry::SubscriptionHandle;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracker_types::{Event, Filter};

/// A relay refused (or never acknowledged) an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{relay}: {reason}")]
pub struct RelayRejection {
    pub relay: String,
    pub reason: String,
}

impl RelayRejection {
    pub fn new(relay: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            relay: relay.into(),
            reason: reason.into(),
        }
    }
}

/// Acknowledgement from a single relay: the accepting relay's url, or why it refused.
pub type PublishFuture = BoxFuture<'static, Result<String, RelayRejection>>;

/// What a live subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMessage {
    /// A matching event.
    Event(Event),
    /// The relays closed the subscription.
    Closed(String),
}

/// A pool of relay connections.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Sends `event` to every relay. Returns one acknowledgement future per
    /// relay; they resolve independently.
    fn publish(&self, relays: &[String], event: &Event) -> Vec<PublishFuture>;

    /// Opens a live subscription across `relays`. Matching events (stored and
    /// future) are pushed into `sink` until the returned handle is closed.
    async fn subscribe_many(
        &self,
        relays: &[String],
        filter: Filter,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
    ) -> SyncResult<Box<dyn SubscriptionHandle>>;

    /// One-shot query: stored events matching `filter`, newest first, no live updates.
    async fn query_sync(&self, relays: &[String], filter: Filter) -> SyncResult<Vec<Event>>;
}

/// An in-process relay pool for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    struct LiveSubscription {
        id: u64,
        relays: Vec<String>,
        filter: Filter,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
        delivered: HashSet<String>,
    }

    impl LiveSubscription {
        fn offer(&mut self, relay: &str, event: &Event) {
            if !self.relays.iter().any(|r| r == relay) || !self.filter.matches(event) {
                return;
            }
            if self.delivered.insert(event.id.clone()) {
                let _ = self.sink.send(SubscriptionMessage::Event(event.clone()));
            }
        }
    }

    #[derive(Default)]
    struct RelayState {
        stored: HashMap<String, Vec<Event>>,
        offline: HashSet<String>,
        rejected_tags: Vec<(String, String)>,
        live: Vec<LiveSubscription>,
        next_id: u64,
        published: Vec<Event>,
        publish_calls: usize,
        subscribed_filters: Vec<Filter>,
        close_calls: HashMap<u64, usize>,
    }

    impl RelayState {
        fn is_rejected(&self, event: &Event) -> bool {
            self.rejected_tags
                .iter()
                .any(|(name, value)| event.has_tag(name, value))
        }
    }

    /// Shared in-memory relays. Clones share state, so a test can publish
    /// through one engine and observe delivery in another.
    #[derive(Clone, Default)]
    pub struct MemoryRelay {
        state: Arc<Mutex<RelayState>>,
    }

    impl MemoryRelay {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes a relay refuse publishes and serve nothing.
        pub fn set_offline(&self, relay: &str, offline: bool) {
            let mut state = self.state.lock().unwrap();
            if offline {
                state.offline.insert(relay.to_string());
            } else {
                state.offline.remove(relay);
            }
        }

        /// Every relay rejects events carrying this tag.
        pub fn reject_tagged(&self, name: &str, value: &str) {
            self.state
                .lock()
                .unwrap()
                .rejected_tags
                .push((name.to_string(), value.to_string()));
        }

        /// Stores an event on a relay without notifying anyone, as if it had
        /// been published before the test started.
        pub fn seed(&self, relay: &str, event: Event) {
            let mut state = self.state.lock().unwrap();
            state.stored.entry(relay.to_string()).or_default().push(event);
        }

        /// Events that at least one relay accepted, in publish order.
        pub fn published(&self) -> Vec<Event> {
            self.state.lock().unwrap().published.clone()
        }

        /// Number of `publish` calls.
        pub fn publish_calls(&self) -> usize {
            self.state.lock().unwrap().publish_calls
        }

        /// Every filter ever passed to `subscribe_many`.
        pub fn subscribed_filters(&self) -> Vec<Filter> {
            self.state.lock().unwrap().subscribed_filters.clone()
        }

        /// Filters of subscriptions that are still open.
        pub fn live_filters(&self) -> Vec<Filter> {
            self.state
                .lock()
                .unwrap()
                .live
                .iter()
                .map(|s| s.filter.clone())
                .collect()
        }

        /// Total number of `close` calls across all handles.
        pub fn close_calls(&self) -> usize {
            self.state.lock().unwrap().close_calls.values().sum()
        }

        /// Largest number of `close` calls received by a single handle.
        pub fn max_closes_per_handle(&self) -> usize {
            self.state
                .lock()
                .unwrap()
                .close_calls
                .values()
                .copied()
                .max()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl RelayTransport for MemoryRelay {
        fn publish(&self, relays: &[String], event: &Event) -> Vec<PublishFuture> {
            let mut state = self.state.lock().unwrap();
            state.publish_calls += 1;

            let rejected = state.is_rejected(event);
            let mut acks: Vec<PublishFuture> = Vec::with_capacity(relays.len());
            let mut accepted = false;

            for relay in relays {
                if state.offline.contains(relay) {
                    let rejection = RelayRejection::new(relay.as_str(), "relay offline");
                    acks.push(Box::pin(futures::future::ready(Err(rejection))));
                    continue;
                }
                if rejected {
                    let rejection = RelayRejection::new(relay.as_str(), "blocked: event rejected");
                    acks.push(Box::pin(futures::future::ready(Err(rejection))));
                    continue;
                }

                let stored = state.stored.entry(relay.clone()).or_default();
                if !stored.iter().any(|e| e.id == event.id) {
                    stored.push(event.clone());
                }
                for sub in state.live.iter_mut() {
                    sub.offer(relay, event);
                }
                accepted = true;
                acks.push(Box::pin(futures::future::ready(Ok(relay.clone()))));
            }

            if accepted {
                state.published.push(event.clone());
            }
            acks
        }

        async fn subscribe_many(
            &self,
            relays: &[String],
            filter: Filter,
            sink: mpsc::UnboundedSender<SubscriptionMessage>,
        ) -> SyncResult<Box<dyn SubscriptionHandle>> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state.subscribed_filters.push(filter.clone());

            let online: Vec<String> = relays
                .iter()
                .filter(|r| !state.offline.contains(*r))
                .cloned()
                .collect();

            let mut sub = LiveSubscription {
                id,
                relays: online.clone(),
                filter,
                sink,
                delivered: HashSet::new(),
            };
            for relay in &online {
                if let Some(events) = state.stored.get(relay) {
                    for event in events {
                        sub.offer(relay, event);
                    }
                }
            }
            state.live.push(sub);

            Ok(Box::new(MemorySubscription {
                id,
                state: Arc::clone(&self.state),
            }))
        }

        async fn query_sync(&self, relays: &[String], filter: Filter) -> SyncResult<Vec<Event>> {
            let state = self.state.lock().unwrap();
            if relays.iter().all(|r| state.offline.contains(r)) {
                return Err(SyncError::Transport("no relay reachable".to_string()));
            }

            let mut seen = HashSet::new();
            let mut events: Vec<Event> = relays
                .iter()
                .filter(|r| !state.offline.contains(*r))
                .filter_map(|r| state.stored.get(r))
                .flatten()
                .filter(|e| filter.matches(e) && seen.insert(e.id.clone()))
                .cloned()
                .collect();

            events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                events.truncate(limit);
            }
            Ok(events)
        }
    }

    struct MemorySubscription {
        id: u64,
        state: Arc<Mutex<RelayState>>,
    }

    impl SubscriptionHandle for MemorySubscription {
        fn close(&mut self) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            *state.close_calls.entry(self.id).or_default() += 1;
            state.live.retain(|s| s.id != self.id);
            Ok(())
        }
    }
}
