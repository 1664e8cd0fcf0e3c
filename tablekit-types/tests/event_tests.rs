use pretty_assertions::assert_eq;
use serde_json::json;
use tablekit_types::{DocumentChange, EventKind, Query, RealtimeEvent, TypesError};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn collapses_wildcard_and_concrete_names() {
    let events = names(&[
        "databases.*.collections.*.documents.*.update",
        "databases.*.collections.*.documents.*",
        "databases.main.collections.messages.documents.42.update",
        "databases.main.collections.messages.documents.42",
    ]);
    let event = RealtimeEvent::from_raw(&events, json!({ "$id": "42", "text": "hi" })).unwrap();
    assert_eq!(event.table_id.as_str(), "messages");
    assert_eq!(event.document_id.as_str(), "42");
    assert_eq!(event.kinds.iter().copied().collect::<Vec<_>>(), vec![EventKind::Update]);
}

#[test]
fn falls_back_to_payload_ids() {
    let events = names(&["databases.*.tables.*.rows.*.create"]);
    let event = RealtimeEvent::from_raw(
        &events,
        json!({ "$id": "r1", "$tableId": "users", "name": "a" }),
    )
    .unwrap();
    assert_eq!(event.table_id.as_str(), "users");
    assert_eq!(event.document_id.as_str(), "r1");
    assert!(event.has_kind(EventKind::Create));
}

#[test]
fn non_document_events_are_rejected() {
    let events = names(&["buckets.avatars.files.f1.create"]);
    assert!(matches!(
        RealtimeEvent::from_raw(&events, json!({})),
        Err(TypesError::InvalidEvent(_))
    ));
}

#[test]
fn changes_yield_one_typed_change_per_kind() {
    let event = RealtimeEvent::new(
        "messages",
        "42",
        [EventKind::Update, EventKind::Create],
        json!({ "$id": "42", "text": "hi" }),
    );
    let changes = event.changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].kind(), EventKind::Create);
    assert_eq!(changes[1].kind(), EventKind::Update);
    let doc = changes[1].change.document().unwrap();
    assert_eq!(doc.get("text"), Some(&json!("hi")));
}

#[test]
fn delete_change_carries_id_only() {
    let event = RealtimeEvent::new("messages", "7", [EventKind::Delete], json!({ "$id": "7" }));
    assert_eq!(
        event.changes()[0].change,
        DocumentChange::Deleted("7".into())
    );
}

#[test]
fn query_wire_format() {
    assert_eq!(
        Query::equal("title", "x").to_json(),
        json!({ "method": "equal", "attribute": "title", "values": ["x"] })
    );
    assert_eq!(Query::Limit(5).to_json(), json!({ "method": "limit", "values": [5] }));
    assert!(Query::IsNull("a".into()).is_filter());
    assert!(!Query::OrderAsc("a".into()).is_filter());
}
