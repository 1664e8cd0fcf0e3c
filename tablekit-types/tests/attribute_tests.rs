use serde_json::{json, Map, Value};
use tablekit_types::attribute::{is_datetime, validate_record};
use tablekit_types::{AttributeKind, AttributeSpec, AttributeStatus, TypesError};

fn record(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

// --- Kinds ---

#[test]
fn kind_parses_backend_aliases() {
    assert_eq!("double".parse::<AttributeKind>().unwrap(), AttributeKind::Float);
    assert_eq!("INT".parse::<AttributeKind>().unwrap(), AttributeKind::Integer);
    assert!(matches!(
        "blob".parse::<AttributeKind>(),
        Err(TypesError::UnknownKind(_))
    ));
}

#[test]
fn status_unknown_string_is_processing() {
    assert_eq!(AttributeStatus::from_backend("available"), AttributeStatus::Available);
    assert_eq!(AttributeStatus::from_backend("stuck"), AttributeStatus::Stuck);
    assert_eq!(AttributeStatus::from_backend("queued"), AttributeStatus::Processing);
    assert!(AttributeStatus::Failed.is_failure());
    assert!(!AttributeStatus::Deleting.is_failure());
}

// --- Value validation ---

#[test]
fn string_size_is_enforced() {
    let spec = AttributeSpec::string("title", 5);
    assert!(spec.validate_value(&json!("hello")).is_ok());
    assert!(spec.validate_value(&json!("hello!")).is_err());
    assert!(spec.validate_value(&json!(5)).is_err());
}

#[test]
fn integer_range_is_enforced() {
    let spec = AttributeSpec::integer("age").range(Some(0.0), Some(150.0));
    assert!(spec.validate_value(&json!(30)).is_ok());
    assert!(spec.validate_value(&json!(-1)).is_err());
    assert!(spec.validate_value(&json!(1.5)).is_err());
}

#[test]
fn enum_membership_is_enforced() {
    let spec = AttributeSpec::enumeration("status", ["open", "closed"]);
    assert!(spec.validate_value(&json!("open")).is_ok());
    assert!(spec.validate_value(&json!("pending")).is_err());
}

#[test]
fn array_attributes_validate_each_item() {
    let spec = AttributeSpec::string("tags", 10).array();
    assert!(spec.validate_value(&json!(["a", "b"])).is_ok());
    assert!(spec.validate_value(&json!("a")).is_err());
    assert!(spec.validate_value(&json!(["a", 1])).is_err());
}

#[test]
fn null_only_allowed_for_optional() {
    assert!(AttributeSpec::boolean("done").validate_value(&Value::Null).is_ok());
    assert!(AttributeSpec::boolean("done").required().validate_value(&Value::Null).is_err());
}

#[test]
fn datetime_accepts_common_forms() {
    assert!(is_datetime("2024-05-01T10:00:00Z"));
    assert!(is_datetime("2024-05-01T10:00:00.123+02:00"));
    assert!(is_datetime("2024-05-01 10:00:00"));
    assert!(is_datetime("2024-05-01"));
    assert!(!is_datetime("yesterday"));
}

// --- Records ---

#[test]
fn record_missing_required_fails_on_create_only() {
    let specs = vec![
        AttributeSpec::string("title", 50).required(),
        AttributeSpec::integer("votes"),
    ];
    let body = record(json!({ "votes": 3 }));
    assert_eq!(
        validate_record(&specs, &body, false),
        Err(TypesError::MissingRequired("title".into()))
    );
    assert!(validate_record(&specs, &body, true).is_ok());
}

#[test]
fn record_rejects_unknown_fields_but_skips_metadata() {
    let specs = vec![AttributeSpec::string("title", 50)];
    let body = record(json!({ "title": "x", "$createdAt": "2024-01-01T00:00:00Z" }));
    assert!(validate_record(&specs, &body, false).is_ok());

    let body = record(json!({ "title": "x", "extra": 1 }));
    assert_eq!(
        validate_record(&specs, &body, false),
        Err(TypesError::UnknownAttribute("extra".into()))
    );
}

#[test]
fn spec_serde_uses_lowercase_kinds() {
    let spec: AttributeSpec =
        serde_json::from_value(json!({ "name": "n", "kind": "float", "required": true })).unwrap();
    assert_eq!(spec.kind, AttributeKind::Float);
    assert!(spec.required);
    assert!(!spec.array);
}
