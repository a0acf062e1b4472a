use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracker_storage::{LocalStore, SqliteStore};
use tracker_sync::{Decoded, DeltaDirective, ReconcileOutcome, Reconciler, SyncError};
use tracker_types::{
    MemberRole, Project, SyncCursor, SyncEntity, Tag, Ticket, Timestamp,
};

fn setup() -> (Arc<SqliteStore>, Reconciler, mpsc::Receiver<DeltaDirective>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let (tx, rx) = mpsc::channel(16);
    let reconciler = Reconciler::new(store.clone(), tx);
    (store, reconciler, rx)
}

fn decoded<T: SyncEntity>(mut entity: T, event_id: &str, secs: i64, tags: Vec<Tag>) -> Decoded<T> {
    let created_at = Timestamp::from_secs(secs);
    entity.set_cursor(SyncCursor::new(event_id, created_at));
    Decoded {
        entity,
        event_id: event_id.to_string(),
        created_at,
        author: "alice".into(),
        tags,
    }
}

fn project_version(base: &Project, name: &str) -> Project {
    let mut p = base.clone();
    p.name = name.to_string();
    p
}

fn delta_tags(updated: &str, property: &str) -> Vec<Tag> {
    vec![Tag::new("updated", updated), Tag::new("property", property)]
}

// ── Last writer wins ─────────────────────────────────────────────

#[tokio::test]
async fn applies_unknown_entity() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());

    let outcome = reconciler
        .apply(decoded(p.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied { directive: None });
    let stored = store.get_project(&p.uuid).unwrap().unwrap();
    assert_eq!(stored.cursor(), Some(SyncCursor::new("evt-1", Timestamp::from_secs(100))));
}

#[tokio::test]
async fn newer_event_replaces_older() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());

    reconciler
        .apply(decoded(project_version(&p, "old"), "evt-1", 100, Vec::new()))
        .await
        .unwrap();
    reconciler
        .apply(decoded(project_version(&p, "new"), "evt-2", 200, Vec::new()))
        .await
        .unwrap();

    assert_eq!(store.get_project(&p.uuid).unwrap().unwrap().name, "new");
}

#[tokio::test]
async fn older_and_equal_events_are_stale() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(project_version(&p, "current"), "evt-2", 200, Vec::new()))
        .await
        .unwrap();

    let older = reconciler
        .apply(decoded(project_version(&p, "older"), "evt-1", 100, Vec::new()))
        .await
        .unwrap();
    let equal = reconciler
        .apply(decoded(project_version(&p, "equal"), "evt-3", 200, Vec::new()))
        .await
        .unwrap();

    assert_eq!(older, ReconcileOutcome::Stale);
    assert_eq!(equal, ReconcileOutcome::Stale);
    let stored = store.get_project(&p.uuid).unwrap().unwrap();
    assert_eq!(stored.name, "current");
    assert_eq!(stored.last_event_id.as_deref(), Some("evt-2"));
}

#[tokio::test]
async fn duplicate_delivery_is_stale() {
    let (_store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    let event = decoded(p, "evt-1", 100, Vec::new());

    reconciler.apply(event.clone()).await.unwrap();
    assert_eq!(reconciler.apply(event).await.unwrap(), ReconcileOutcome::Stale);
}

#[tokio::test]
async fn ticket_without_project_is_orphaned() {
    let (store, reconciler, _rx) = setup();
    let t = Ticket::new("missing-project", "bug", "Crash", "", "alice");

    let outcome = reconciler
        .apply(decoded(t.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Orphaned);
    assert!(store.get_ticket(&t.uuid).unwrap().is_none());
}

#[tokio::test]
async fn ticket_with_project_is_applied() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    store.save_project(&p).unwrap();
    let t = Ticket::new(&p.uuid, "bug", "Crash", "", "alice");

    let outcome = reconciler
        .apply(decoded(t.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied { directive: None });
    assert_eq!(store.get_ticket(&t.uuid).unwrap().unwrap().title, "Crash");
}

// ── Directives ───────────────────────────────────────────────────

#[tokio::test]
async fn add_ticket_delta_emits_directive() {
    let (_store, reconciler, mut rx) = setup();
    let mut p = Project::new("P", "", false, "alice", Vec::new());
    p.tickets.insert("ticket-42".into());

    let outcome = reconciler
        .apply(decoded(p.clone(), "evt-1", 100, delta_tags("ticket-42", "add-ticket")))
        .await
        .unwrap();

    let expected = DeltaDirective::AddTicket {
        project_uuid: p.uuid.clone(),
        ticket_uuid: "ticket-42".into(),
    };
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            directive: Some(expected.clone())
        }
    );
    assert_eq!(rx.try_recv().unwrap(), expected);
}

#[tokio::test]
async fn remove_and_membership_deltas_emit_directives() {
    let (_store, reconciler, mut rx) = setup();
    let p = Project::new("P", "", true, "alice", [("bob".to_string(), MemberRole::Member)]);

    reconciler
        .apply(decoded(p.clone(), "evt-1", 100, delta_tags("ticket-42", "remove-ticket")))
        .await
        .unwrap();
    reconciler
        .apply(decoded(p.clone(), "evt-2", 200, delta_tags(&p.uuid, "membership")))
        .await
        .unwrap();

    assert_eq!(
        rx.try_recv().unwrap(),
        DeltaDirective::RemoveTicket {
            project_uuid: p.uuid.clone(),
            ticket_uuid: "ticket-42".into(),
        }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        DeltaDirective::MembershipChanged {
            project_uuid: p.uuid.clone()
        }
    );
}

#[tokio::test]
async fn stale_event_emits_nothing() {
    let (_store, reconciler, mut rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(p.clone(), "evt-2", 200, Vec::new()))
        .await
        .unwrap();

    reconciler
        .apply(decoded(p, "evt-1", 100, delta_tags("ticket-42", "add-ticket")))
        .await
        .unwrap();

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unknown_property_emits_nothing() {
    let (_store, reconciler, mut rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());

    let outcome = reconciler
        .apply(decoded(p, "evt-1", 100, delta_tags("x", "rename")))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied { directive: None });
    assert!(rx.try_recv().is_err());
}

// ── Local writes ─────────────────────────────────────────────────

#[tokio::test]
async fn store_local_refuses_existing_record() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(p.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    let err = reconciler
        .store_local(project_version(&p, "overwrite"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AlreadyExists(_)), "{err}");
    assert_eq!(store.get_project(&p.uuid).unwrap().unwrap().name, "P");
}

#[tokio::test]
async fn store_local_ticket_needs_project() {
    let (_store, reconciler, _rx) = setup();
    let t = Ticket::new("missing", "bug", "Crash", "", "alice");

    let err = reconciler.store_local(t).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn edit_keeps_stored_cursor() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(p.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    let (edited, result) = reconciler
        .edit(&p.uuid, |project: &mut Project| {
            project.name = "edited".into();
            project.last_event_id = None;
            Some(7)
        })
        .await
        .unwrap();

    assert_eq!(result, Some(7));
    assert_eq!(edited.name, "edited");
    assert_eq!(edited.last_event_id.as_deref(), Some("evt-1"));
    assert_eq!(store.get_project(&p.uuid).unwrap().unwrap(), edited);
}

#[tokio::test]
async fn declined_edit_writes_nothing() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    store.save_project(&p).unwrap();

    let (current, result) = reconciler
        .edit(&p.uuid, |project: &mut Project| {
            project.name = "scratch".into();
            None::<()>
        })
        .await
        .unwrap();

    assert_eq!(result, None);
    assert_eq!(current.name, "scratch");
    assert_eq!(store.get_project(&p.uuid).unwrap().unwrap().name, "P");
}

#[tokio::test]
async fn edit_of_missing_record_fails() {
    let (_store, reconciler, _rx) = setup();
    let err = reconciler
        .edit("nope", |_: &mut Ticket| Some(()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn local_edit_builds_on_remote_update_applied_meanwhile() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(p.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    // The local user started from this copy...
    let mut local_copy = store.get_project(&p.uuid).unwrap().unwrap();
    local_copy.tickets.insert("A".into());

    // ...while a peer's update adding "B" arrived.
    let mut remote = p.clone();
    remote.tickets.insert("B".into());
    let remote_event = decoded(remote, "evt-2", 200, delta_tags("B", "add-ticket"));
    reconciler.apply(remote_event.clone()).await.unwrap();

    assert!(reconciler.store_local(local_copy).await.is_err());
    let (edited, _) = reconciler
        .edit(&p.uuid, |project: &mut Project| {
            project.tickets.insert("A".into()).then_some(())
        })
        .await
        .unwrap();

    let stored = store.get_project(&p.uuid).unwrap().unwrap();
    assert_eq!(edited, stored);
    assert_eq!(
        stored.tickets.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["A", "B"]
    );
    assert_eq!(stored.last_event_id.as_deref(), Some("evt-2"));
    assert_eq!(reconciler.apply(remote_event).await.unwrap(), ReconcileOutcome::Stale);
}

#[tokio::test]
async fn record_published_only_advances() {
    let (_store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(p.clone(), "evt-2", 200, Vec::new()))
        .await
        .unwrap();

    let kept = reconciler
        .record_published(
            project_version(&p, "older"),
            SyncCursor::new("evt-1", Timestamp::from_secs(100)),
        )
        .await
        .unwrap();
    assert_eq!(kept.last_event_id.as_deref(), Some("evt-2"));
    assert_eq!(kept.name, "P");

    let advanced = reconciler
        .record_published(
            project_version(&p, "published"),
            SyncCursor::new("evt-3", Timestamp::from_secs(300)),
        )
        .await
        .unwrap();
    assert_eq!(advanced.last_event_id.as_deref(), Some("evt-3"));
    assert_eq!(advanced.name, "published");
}

#[tokio::test]
async fn remote_update_overtaking_a_publish_wins() {
    let (store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());
    reconciler
        .apply(decoded(p.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();

    let (mine, _) = reconciler
        .edit(&p.uuid, |project: &mut Project| {
            project.name = "mine".into();
            Some(())
        })
        .await
        .unwrap();
    reconciler
        .apply(decoded(project_version(&p, "theirs"), "evt-3", 300, Vec::new()))
        .await
        .unwrap();

    let stored = reconciler
        .record_published(mine, SyncCursor::new("evt-2", Timestamp::from_secs(200)))
        .await
        .unwrap();

    assert_eq!(stored.name, "theirs");
    assert_eq!(store.get_project(&p.uuid).unwrap().unwrap().last_event_id.as_deref(), Some("evt-3"));
}

#[tokio::test]
async fn record_published_for_missing_entity_fails() {
    let (_store, reconciler, _rx) = setup();
    let err = reconciler
        .record_published(
            Project::new("P", "", false, "alice", Vec::new()),
            SyncCursor::new("evt", Timestamp::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(format!("{err}").contains("not found"));
}

// ── Directive queue ──────────────────────────────────────────────

#[tokio::test]
async fn closed_directive_queue_is_reported() {
    let (store, reconciler, rx) = setup();
    drop(rx);
    let mut p = Project::new("P", "", false, "alice", Vec::new());
    p.tickets.insert("ticket-42".into());

    let err = reconciler
        .apply(decoded(p.clone(), "evt-1", 100, delta_tags("ticket-42", "add-ticket")))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ChannelClosed), "{err}");
    assert!(store.get_project(&p.uuid).unwrap().is_some());
}

#[tokio::test]
async fn lock_table_is_pruned_after_writes() {
    let (_store, reconciler, _rx) = setup();
    let p = Project::new("P", "", false, "alice", Vec::new());

    reconciler
        .apply(decoded(p.clone(), "evt-1", 100, Vec::new()))
        .await
        .unwrap();
    reconciler
        .edit(&p.uuid, |project: &mut Project| {
            project.name = "x".into();
            Some(())
        })
        .await
        .unwrap();

    assert_eq!(reconciler.locked_uuids(), 0);
}

#[tokio::test]
async fn concurrent_applies_converge() {
    let (store, reconciler, _rx) = setup();
    let reconciler = Arc::new(reconciler);
    let p = Project::new("P", "", false, "alice", Vec::new());

    let mut tasks = Vec::new();
    for secs in 1..=20 {
        let reconciler = Arc::clone(&reconciler);
        let version = decoded(
            project_version(&p, &format!("v{secs}")),
            &format!("evt-{secs}"),
            secs,
            Vec::new(),
        );
        tasks.push(tokio::spawn(async move { reconciler.apply(version).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(store.get_project(&p.uuid).unwrap().unwrap().name, "v20");
    assert_eq!(reconciler.locked_uuids(), 0);
}

// ── Convergence property ─────────────────────────────────────────

proptest! {
    #[test]
    fn any_delivery_order_converges_to_newest(
        timestamps in prop::collection::btree_set(1i64..1_000_000, 1..8)
            .prop_flat_map(|set| Just(set.into_iter().collect::<Vec<_>>()).prop_shuffle())
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let newest = *timestamps.iter().max().unwrap();

        let name = runtime.block_on(async {
            let (store, reconciler, _rx) = setup();
            let p = Project::new("P", "", false, "alice", Vec::new());
            for secs in &timestamps {
                let version = decoded(
                    project_version(&p, &format!("v{secs}")),
                    &format!("evt-{secs}"),
                    *secs,
                    Vec::new(),
                );
                reconciler.apply(version).await.unwrap();
            }
            store.get_project(&p.uuid).unwrap().unwrap().name
        });

        prop_assert_eq!(name, format!("v{newest}"));
    }
}
