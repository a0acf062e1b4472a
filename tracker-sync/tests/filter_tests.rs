use pretty_assertions::assert_eq;
use tracker_sync::{ticket_status_filter, FilterBuilder, SincePolicy, SubscriptionTarget, Visibility};
use tracker_types::{kinds, MemberRole, Project, SyncCursor, Timestamp};

fn private() -> Visibility {
    Visibility::Private {
        recipient: "alice".into(),
    }
}

// ── Visibility ───────────────────────────────────────────────────

#[test]
fn public_project_is_visible_to_anyone() {
    let p = Project::new("P", "", false, "alice", Vec::new());
    assert_eq!(Visibility::for_project(&p, "mallory"), Some(Visibility::Public));
}

#[test]
fn private_project_is_visible_to_members_only() {
    let p = Project::new(
        "P",
        "",
        true,
        "alice",
        [("bob".to_string(), MemberRole::Member)],
    );
    assert_eq!(
        Visibility::for_project(&p, "bob"),
        Some(Visibility::Private {
            recipient: "bob".into()
        })
    );
    assert_eq!(Visibility::for_project(&p, "mallory"), None);
}

// ── Filter shapes ────────────────────────────────────────────────

#[test]
fn public_project_filter() {
    let f = FilterBuilder::default().build(&SubscriptionTarget::project("p-1"), &Visibility::Public, None);

    assert_eq!(f.kinds, vec![kinds::PROJECT]);
    assert_eq!(f.tag_values("project-uuid"), Some(&["p-1".to_string()][..]));
    assert_eq!(f.tags.len(), 1);
    assert_eq!(f.since, None);
}

#[test]
fn public_ticket_filter() {
    let f = FilterBuilder::default().build(
        &SubscriptionTarget::ticket("p-1", "ticket-42"),
        &Visibility::Public,
        None,
    );

    assert_eq!(f.kinds, vec![kinds::TICKET]);
    assert_eq!(f.tag_values("project-uuid"), Some(&["p-1".to_string()][..]));
    assert_eq!(f.tag_values("d"), Some(&["ticket-42".to_string()][..]));
    assert_eq!(f.tags.len(), 2);
}

#[test]
fn private_project_filter() {
    let f = FilterBuilder::default().build(&SubscriptionTarget::project("p-1"), &private(), None);

    assert_eq!(f.kinds, vec![kinds::GIFT_WRAP]);
    assert_eq!(f.tag_values("project-uuid"), Some(&["p-1".to_string()][..]));
    assert_eq!(f.tag_values("type"), Some(&["project".to_string()][..]));
    assert_eq!(f.tag_values("p"), Some(&["alice".to_string()][..]));
    assert_eq!(f.tag_values("ticket-uuid"), None);
}

#[test]
fn private_ticket_filter() {
    let f = FilterBuilder::default().build(
        &SubscriptionTarget::ticket("p-1", "ticket-42"),
        &private(),
        None,
    );

    assert_eq!(f.kinds, vec![kinds::GIFT_WRAP]);
    assert_eq!(f.tag_values("ticket-uuid"), Some(&["ticket-42".to_string()][..]));
    assert_eq!(f.tag_values("type"), Some(&["ticket".to_string()][..]));
    assert_eq!(f.tag_values("p"), Some(&["alice".to_string()][..]));
    assert_eq!(f.tags.len(), 4);
}

#[test]
fn ticket_status_filter_shape() {
    let f = ticket_status_filter("test-uuid");
    let json = serde_json::to_value(&f).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "kinds": [30402], "#d": ["test-uuid"] })
    );
}

#[test]
fn target_ids_are_entity_uuids() {
    assert_eq!(SubscriptionTarget::project("p-1").id(), "p-1");
    assert_eq!(SubscriptionTarget::ticket("p-1", "t-1").id(), "t-1");
}

// ── Since policy ─────────────────────────────────────────────────

#[test]
fn cursor_wins_over_policy() {
    let cursor = SyncCursor::new("evt", Timestamp::from_secs(1_234));
    for policy in [
        SincePolicy::Now,
        SincePolicy::Backfill,
        SincePolicy::Lookback { seconds: 60 },
    ] {
        assert_eq!(
            FilterBuilder::new(policy).since(Some(&cursor)),
            Some(Timestamp::from_secs(1_234))
        );
    }
}

#[test]
fn backfill_has_no_lower_bound() {
    assert_eq!(FilterBuilder::new(SincePolicy::Backfill).since(None), None);
}

#[test]
fn now_policy_uses_current_time() {
    let before = Timestamp::now();
    let since = FilterBuilder::new(SincePolicy::Now).since(None).unwrap();
    assert!(since >= before);
}

#[test]
fn lookback_subtracts_window() {
    let now = Timestamp::from_secs(10_000);
    assert_eq!(
        SincePolicy::Lookback { seconds: 600 }.resolve(None, now),
        Some(Timestamp::from_secs(9_400))
    );
    assert_eq!(
        SincePolicy::Lookback { seconds: 60_000 }.resolve(None, now),
        Some(Timestamp::ZERO)
    );
}

#[test]
fn for_cursor_sets_since() {
    let cursor = SyncCursor::new("evt", Timestamp::from_secs(500));
    let f = FilterBuilder::new(SincePolicy::Backfill).for_cursor(
        &SubscriptionTarget::project("p-1"),
        &Visibility::Public,
        Some(&cursor),
    );
    assert_eq!(f.since, Some(Timestamp::from_secs(500)));
}
