use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracker_sync::{Subscription, SubscriptionHandle, SubscriptionRegistry, SyncError, SyncResult};

struct CountingHandle {
    closes: Arc<AtomicUsize>,
    fail: bool,
}

impl SubscriptionHandle for CountingHandle {
    fn close(&mut self) -> SyncResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SyncError::Transport("socket already gone".into()));
        }
        Ok(())
    }
}

fn sub(id: &str, closes: &Arc<AtomicUsize>) -> Subscription {
    Subscription::new(
        id,
        Box::new(CountingHandle {
            closes: Arc::clone(closes),
            fail: false,
        }),
    )
}

// ── Add ──────────────────────────────────────────────────────────

#[tokio::test]
async fn add_registers_subscription() {
    let registry = SubscriptionRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));

    assert!(registry.add(sub("p-1", &closes)).await);
    assert!(registry.contains("p-1").await);
    assert_eq!(registry.len().await, 1);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn add_is_idempotent_per_id() {
    let registry = SubscriptionRegistry::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    assert!(registry.add(sub("p-1", &first)).await);
    assert!(!registry.add(sub("p-1", &second)).await);

    assert_eq!(registry.len().await, 1);
    // The rejected duplicate is closed, the original stays open.
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ids_are_sorted() {
    let registry = SubscriptionRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));
    for id in ["t-2", "p-1", "t-1"] {
        registry.add(sub(id, &closes)).await;
    }
    assert_eq!(registry.ids().await, vec!["p-1", "t-1", "t-2"]);
}

// ── Remove ───────────────────────────────────────────────────────

#[tokio::test]
async fn remove_closes_exactly_once() {
    let registry = SubscriptionRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));
    registry.add(sub("t-1", &closes)).await;

    assert!(registry.remove("t-1").await);
    assert!(!registry.remove("t-1").await);

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn remove_unknown_is_noop() {
    let registry = SubscriptionRegistry::new();
    assert!(!registry.remove("missing").await);
}

// ── Close all ────────────────────────────────────────────────────

#[tokio::test]
async fn close_all_closes_everything() {
    let registry = SubscriptionRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));
    for id in ["p-1", "t-1", "t-2"] {
        registry.add(sub(id, &closes)).await;
    }

    assert_eq!(registry.close_all().await, 3);
    assert_eq!(closes.load(Ordering::SeqCst), 3);
    assert!(registry.is_empty().await);
    assert_eq!(registry.close_all().await, 0);
}

#[tokio::test]
async fn close_all_continues_past_failures() {
    let registry = SubscriptionRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));
    registry
        .add(Subscription::new(
            "broken",
            Box::new(CountingHandle {
                closes: Arc::clone(&closes),
                fail: true,
            }),
        ))
        .await;
    registry.add(sub("ok", &closes)).await;

    registry.close_all().await;

    assert_eq!(closes.load(Ordering::SeqCst), 2);
    assert!(registry.is_empty().await);
}
