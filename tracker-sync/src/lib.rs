//! Relay sync engine for tracker projects and tickets.
//!
//! Entities travel as signed events over a pool of untrusted relays. Public
//! entities are published in the clear; private ones are sealed per member
//! as gift wraps. Every device keeps its own local store and converges by
//! last-writer-wins on the event timestamp.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Registry**: Owns live subscriptions keyed by entity uuid
//! - **Filter**: Builds relay filters for projects, tickets and status updates
//! - **Codec**: Turns entities into signed (and optionally wrapped) events and back
//! - **Reconcile**: Applies incoming entities under last-writer-wins
//! - **Cascade**: Grows and shrinks the subscription tree as projects change
//! - **Publisher**: Fans events out to relays
//! - **Engine**: Wires all of the above to one identity
//!
//! ## Sync Process
//!
//! 1. **Subscribe**: One subscription per visible project and per listed ticket
//! 2. **Decode**: Verify signatures, open gift wraps addressed to us
//! 3. **Reconcile**: Store the entity if it is newer than what we have
//! 4. **Cascade**: Follow `add-ticket`, `remove-ticket` and membership changes
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tracker_crypto::{DefaultCryptoProvider, Identity};
//! use tracker_storage::SqliteStore;
//! use tracker_sync::{mock::MemoryRelay, SyncConfig, SyncEngine};
//!
//! # #[tokio::main]
//! # async fn main() -> tracker_sync::SyncResult<()> {
//! let store = SqliteStore::open_in_memory()?;
//! let engine = SyncEngine::new(
//!     SyncConfig::with_relays(["wss://relay.example"]),
//!     Identity::generate(),
//!     Arc::new(MemoryRelay::new()),
//!     Arc::new(DefaultCryptoProvider),
//!     Arc::new(store),
//! )?;
//! engine.start();
//!
//! let project = engine.create_project("Roadmap", "", false, Vec::new()).await?;
//! engine.create_ticket(&project.uuid, "task", "Ship it", "").await?;
//! # Ok(())
//! # }
//! ```

mod cascade;
mod codec;
mod config;
mod engine;
mod error;
mod filter;
mod publisher;
mod reconcile;
mod registry;
pub mod transport;

pub use cascade::CascadeController;
pub use codec::{Decoded, Delta, Encoded, EventCodec, Property};
pub use config::{
    RelayList, SincePolicy, SyncConfig, CONFIG_DIR_NAME, DEFAULT_DIRECTIVE_BUFFER,
    RELAYS_FILE_NAME,
};
pub use engine::{StatusSubscription, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use filter::{ticket_status_filter, FilterBuilder, SubscriptionTarget, Visibility};
pub use publisher::{PublishReceipt, Publisher};
pub use reconcile::{DeltaDirective, LocalRecord, ReconcileOutcome, Reconciler};
pub use registry::{Subscription, SubscriptionHandle, SubscriptionRegistry};
pub use transport::{mock, PublishFuture, RelayRejection, RelayTransport, SubscriptionMessage};
