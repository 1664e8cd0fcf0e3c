use pretty_assertions::assert_eq;
use serde_json::json;
use tablekit_client::{Backend, BackendConfig, BackendError, HttpBackend};
use tablekit_types::{
    AttributeKind, AttributeSpec, AttributeStatus, DocumentId, PermissionAction, PermissionRule,
    Query, TableId,
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TABLE_PATH: &str = "/databases/main/collections/messages";

fn setup(server: &MockServer) -> HttpBackend {
    let config = BackendConfig {
        endpoint: server.uri(),
        project_id: "proj".into(),
        database_id: "main".into(),
        api_key: Some("secret".into()),
        request_timeout_secs: 5,
    };
    HttpBackend::new(config).unwrap()
}

fn table() -> TableId {
    TableId::new("messages")
}

fn table_body(permissions: &[&str]) -> serde_json::Value {
    json!({ "$id": "messages", "name": "Messages", "$permissions": permissions })
}

// --- Config ---

#[test]
fn new_requires_project_id() {
    let result = HttpBackend::new(BackendConfig::default());
    assert!(matches!(result, Err(BackendError::Config(_))));
}

#[test]
fn realtime_endpoint_swaps_scheme() {
    let config = BackendConfig {
        endpoint: "https://cloud.example.io/v1/".into(),
        project_id: "p1".into(),
        ..BackendConfig::default()
    };
    assert_eq!(
        config.realtime_endpoint(),
        "wss://cloud.example.io/v1/realtime?project=p1"
    );
    assert_eq!(
        config.documents_channel("messages"),
        "databases.main.collections.messages.documents"
    );
}

// --- Tables ---

#[tokio::test]
async fn get_table_sends_project_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(header("X-Appwrite-Project", "proj"))
        .and(header("X-Appwrite-Key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(table_body(&[r#"read("any")"#])))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let info = backend.get_table(&table()).await.unwrap().unwrap();
    assert_eq!(info.name, "Messages");
    assert_eq!(
        info.permissions,
        vec![PermissionRule::new("any", PermissionAction::Read)]
    );
}

#[tokio::test]
async fn get_missing_table_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({ "message": "Collection not found", "code": 404 })),
        )
        .mount(&server)
        .await;

    let backend = setup(&server);
    assert!(backend.get_table(&table()).await.unwrap().is_none());
}

// --- Attributes ---

#[tokio::test]
async fn list_attributes_maps_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{TABLE_PATH}/attributes")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "attributes": [
                { "key": "text", "type": "string", "status": "available", "required": true, "array": false, "size": 255, "default": null },
                { "key": "score", "type": "double", "status": "processing", "required": false, "array": false, "min": 0.0, "max": 10.0 },
                { "key": "mood", "type": "string", "format": "enum", "status": "failed", "error": "index limit", "required": false, "array": false, "elements": ["happy", "sad"] }
            ]
        })))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let attrs = backend.list_attributes(&table()).await.unwrap();
    assert_eq!(attrs.len(), 3);

    assert_eq!(attrs[0].spec, AttributeSpec::string("text", 255).required());
    assert_eq!(attrs[0].status, AttributeStatus::Available);

    assert_eq!(attrs[1].kind(), AttributeKind::Float);
    assert_eq!(attrs[1].spec.max, Some(10.0));
    assert_eq!(attrs[1].status, AttributeStatus::Processing);

    assert_eq!(attrs[2].kind(), AttributeKind::Enum);
    assert_eq!(attrs[2].spec.elements, vec!["happy", "sad"]);
    assert_eq!(attrs[2].error.as_deref(), Some("index limit"));
}

#[tokio::test]
async fn create_string_attribute_posts_typed_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TABLE_PATH}/attributes/string")))
        .and(body_partial_json(json!({ "key": "text", "size": 120, "required": true })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "key": "text", "type": "string", "status": "processing", "required": true, "array": false, "size": 120
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = setup(&server);
    let remote = backend
        .create_attribute(&table(), &AttributeSpec::string("text", 120).required())
        .await
        .unwrap();
    assert_eq!(remote.status, AttributeStatus::Processing);
}

#[tokio::test]
async fn update_attribute_patches_by_kind_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("{TABLE_PATH}/attributes/integer/votes")))
        .and(body_partial_json(json!({ "required": false, "default": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "votes", "type": "integer", "status": "available", "required": false, "array": false, "default": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = setup(&server);
    let spec = AttributeSpec::integer("votes").default_value(json!(0));
    let remote = backend.update_attribute(&table(), &spec).await.unwrap();
    assert_eq!(remote.spec.default, Some(json!(0)));
}

#[tokio::test]
async fn duplicate_attribute_is_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TABLE_PATH}/attributes/boolean")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "message": "Attribute with the requested key already exists.", "code": 409
        })))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let err = backend
        .create_attribute(&table(), &AttributeSpec::boolean("done"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("already exists"));
}

// --- Permissions ---

#[tokio::test]
async fn grant_permission_puts_full_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(table_body(&[r#"read("any")"#])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(TABLE_PATH))
        .and(body_partial_json(json!({
            "permissions": [r#"read("any")"#, r#"create("users")"#]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(table_body(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let backend = setup(&server);
    backend
        .grant_permission(&table(), &PermissionRule::new("users", PermissionAction::Create))
        .await
        .unwrap();
}

#[tokio::test]
async fn revoke_absent_permission_skips_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(table_body(&[r#"read("any")"#])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = setup(&server);
    backend
        .revoke_permission(&table(), &PermissionRule::new("users", PermissionAction::Delete))
        .await
        .unwrap();
}

// --- Documents ---

#[tokio::test]
async fn create_document_wraps_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TABLE_PATH}/documents")))
        .and(body_partial_json(json!({ "documentId": "d1", "data": { "text": "hi" } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "$id": "d1", "$collectionId": "messages", "text": "hi"
        })))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let data = json!({ "text": "hi" }).as_object().cloned().unwrap();
    let doc = backend
        .create_document(&table(), &DocumentId::new("d1"), &data)
        .await
        .unwrap();
    assert_eq!(doc.id.as_str(), "d1");
    assert_eq!(doc.table_id(), Some(table()));
    assert_eq!(doc.fields(), data);
}

#[tokio::test]
async fn list_documents_encodes_queries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{TABLE_PATH}/documents")))
        .and(query_param("queries[]", r#"{"method":"limit","values":[2]}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "documents": [{ "$id": "a" }, { "$id": "b" }]
        })))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let list = backend
        .list_documents(&table(), &[Query::Limit(2)])
        .await
        .unwrap();
    assert_eq!(list.total, 2);
    assert!(list.contains(&DocumentId::new("b")));
}

#[tokio::test]
async fn missing_document_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{TABLE_PATH}/documents/nope")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Document with the requested ID could not be found.", "code": 404
        })))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let err = backend
        .get_document(&table(), &DocumentId::new("nope"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn bulk_create_reports_per_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TABLE_PATH}/documents")))
        .and(body_partial_json(json!({ "documentId": "bad" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Invalid document structure", "code": 400
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{TABLE_PATH}/documents")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "$id": "ok" })))
        .mount(&server)
        .await;

    let backend = setup(&server);
    let empty = serde_json::Map::new();
    let results = backend
        .create_documents(
            &table(),
            &[
                (DocumentId::new("ok"), empty.clone()),
                (DocumentId::new("bad"), empty.clone()),
            ],
        )
        .await;
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(BackendError::Validation(_))));
}
