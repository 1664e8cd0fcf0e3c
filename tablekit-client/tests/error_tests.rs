use tablekit_client::BackendError;

#[test]
fn status_mapping() {
    assert!(matches!(BackendError::from_status(400, "x".into()), BackendError::Validation(_)));
    assert!(matches!(BackendError::from_status(403, "x".into()), BackendError::Unauthorized(_)));
    assert!(BackendError::from_status(404, "x".into()).is_not_found());
    assert!(BackendError::from_status(409, "x".into()).is_conflict());
    assert!(BackendError::from_status(429, "x".into()).is_rate_limited());
    assert!(matches!(
        BackendError::from_status(503, "down".into()),
        BackendError::Api { status: 503, .. }
    ));
}

#[test]
fn api_error_display() {
    let err = BackendError::Api { status: 500, message: "boom".into() };
    assert_eq!(err.to_string(), "API request failed (500): boom");
}

#[test]
fn validation_display() {
    let err = BackendError::Validation("Invalid document structure".into());
    assert_eq!(err.to_string(), "validation failed: Invalid document structure");
}

#[test]
fn decode_errors_convert_and_clone() {
    let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = BackendError::from(decode);
    let copy = err.clone();

    assert!(matches!(copy, BackendError::Serialization(_)));
    assert_eq!(err.to_string(), copy.to_string());
    assert!(std::error::Error::source(&copy).is_some());
}
