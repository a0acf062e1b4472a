use proptest::prelude::*;
use tracker_types::{kinds, Event, Filter, Tag, Timestamp};

fn event(kind: u32, created_at: i64, tags: Vec<Tag>) -> Event {
    Event {
        id: "id".into(),
        pubkey: "pk".into(),
        created_at: Timestamp::from_secs(created_at),
        kind,
        tags,
        content: String::new(),
        sig: String::new(),
    }
}

#[test]
fn serializes_tag_keys_with_hash_prefix() {
    let filter = Filter::new()
        .kind(kinds::TICKET_STATUS)
        .tag("d", "test-uuid");
    let json = serde_json::to_value(&filter).unwrap();
    assert_eq!(json, serde_json::json!({"kinds": [30402], "#d": ["test-uuid"]}));
}

#[test]
fn deserializes_wire_form() {
    let filter: Filter = serde_json::from_str(
        r##"{"kinds":[1059],"#p":["me"],"#type":["ticket"],"since":5}"##,
    )
    .unwrap();
    assert_eq!(filter.kinds, vec![kinds::GIFT_WRAP]);
    assert_eq!(filter.tag_values("p"), Some(&["me".to_string()][..]));
    assert_eq!(filter.since, Some(Timestamp::from_secs(5)));
}

#[test]
fn duplicate_kinds_and_values_are_collapsed() {
    let filter = Filter::new().kind(1).kind(1).tag("d", "x").tag("d", "x");
    assert_eq!(filter.kinds, vec![1]);
    assert_eq!(filter.tag_values("d").map(<[String]>::len), Some(1));
}

#[test]
fn matches_requires_every_tag_constraint() {
    let filter = Filter::new()
        .kind(kinds::GIFT_WRAP)
        .tag("p", "me")
        .tag("type", "project");

    let hit = event(
        kinds::GIFT_WRAP,
        1,
        vec![Tag::new("p", "me"), Tag::new("type", "project")],
    );
    let wrong_type = event(
        kinds::GIFT_WRAP,
        1,
        vec![Tag::new("p", "me"), Tag::new("type", "ticket")],
    );
    let wrong_kind = event(kinds::PROJECT, 1, hit.tags.clone());

    assert!(filter.matches(&hit));
    assert!(!filter.matches(&wrong_type));
    assert!(!filter.matches(&wrong_kind));
}

#[test]
fn since_is_inclusive() {
    let filter = Filter::new().since(Some(Timestamp::from_secs(100)));
    assert!(filter.matches(&event(1, 100, vec![])));
    assert!(!filter.matches(&event(1, 99, vec![])));
}

proptest! {
    #[test]
    fn empty_filter_matches_everything(kind in any::<u32>(), ts in 0i64..i64::MAX / 2) {
        prop_assert!(Filter::new().matches(&event(kind, ts, vec![])));
    }
}
