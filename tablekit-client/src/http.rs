//! REST implementation of [`Backend`].
//!
//! Speaks the backend's database API with project/key headers and JSON
//! bodies. Non-2xx responses carry `{ "message", "code", "type" }` and are
//! mapped through [`BackendError::from_status`].

use crate::backend::{Backend, TableInfo};
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tablekit_types::{
    AttributeKind, AttributeSpec, AttributeStatus, Document, DocumentId, DocumentList,
    PermissionRule, Query, RemoteAttribute, TableId,
};
use tracing::{debug, warn};

/// HTTP client for the remote document backend.
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct TableWire {
    #[serde(rename = "$id")]
    id: String,
    name: String,
    #[serde(rename = "$permissions", default)]
    permissions: Vec<String>,
}

impl TableWire {
    fn into_info(self) -> TableInfo {
        let permissions = self
            .permissions
            .iter()
            .filter_map(|p| match PermissionRule::parse(p) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("ignoring unparseable permission on table {}: {e}", self.id);
                    None
                }
            })
            .collect();
        TableInfo {
            id: TableId::new(self.id),
            name: self.name,
            permissions,
        }
    }
}

#[derive(Deserialize)]
struct AttributeWire {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    array: bool,
    #[serde(default)]
    size: Option<u32>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    elements: Vec<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(rename = "relatedCollection", default)]
    related_collection: Option<String>,
}

impl AttributeWire {
    fn into_remote(self) -> BackendResult<RemoteAttribute> {
        let kind = if self.format.as_deref() == Some("enum") {
            AttributeKind::Enum
        } else {
            self.kind
                .parse::<AttributeKind>()
                .map_err(|e| BackendError::Unsupported(e.to_string()))?
        };

        let mut spec = AttributeSpec::new(self.key, kind);
        spec.required = self.required;
        spec.array = self.array;
        spec.size = self.size;
        spec.min = self.min;
        spec.max = self.max;
        spec.default = self.default;
        spec.elements = self.elements;
        spec.related_table = self.related_collection.map(TableId::new);

        Ok(RemoteAttribute {
            spec,
            status: AttributeStatus::from_backend(&self.status),
            error: (!self.error.is_empty()).then_some(self.error),
        })
    }
}

#[derive(Deserialize)]
struct AttributeListWire {
    attributes: Vec<AttributeWire>,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        if config.project_id.is_empty() {
            return Err(BackendError::Config("project_id must be set".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn table_path(&self, table: &TableId) -> String {
        format!(
            "/databases/{}/collections/{}",
            self.config.database_id, table
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        let mut builder = self
            .client
            .request(method, url)
            .header("X-Appwrite-Project", &self.config.project_id);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("X-Appwrite-Key", key);
        }
        builder
    }

    async fn check(resp: Response) -> BackendResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or(text);
        Err(BackendError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BackendResult<T> {
        let resp = Self::check(builder.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> BackendResult<()> {
        Self::check(builder.send().await?).await?;
        Ok(())
    }

    async fn put_permissions(
        &self,
        table: &TableId,
        name: &str,
        permissions: &[PermissionRule],
    ) -> BackendResult<()> {
        let body = json!({
            "name": name,
            "permissions": permissions.iter().map(PermissionRule::to_backend_string).collect::<Vec<_>>(),
        });
        self.send_empty(self.request(Method::PUT, &self.table_path(table)).json(&body))
            .await
    }

    async fn require_table(&self, table: &TableId) -> BackendResult<TableInfo> {
        self.get_table(table)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("table {table}")))
    }
}

/// Path segment used for typed attribute endpoints.
fn attribute_endpoint(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::String => "string",
        AttributeKind::Integer => "integer",
        AttributeKind::Float => "float",
        AttributeKind::Boolean => "boolean",
        AttributeKind::Enum => "enum",
        AttributeKind::Datetime => "datetime",
        AttributeKind::Relationship => "relationship",
    }
}

/// Constraint fields shared by create and update bodies.
fn constraint_body(spec: &AttributeSpec, body: &mut Map<String, Value>) {
    match spec.kind {
        AttributeKind::String => {
            if let Some(size) = spec.size {
                body.insert("size".into(), json!(size));
            }
        }
        AttributeKind::Integer | AttributeKind::Float => {
            if let Some(min) = spec.min {
                body.insert("min".into(), json!(min));
            }
            if let Some(max) = spec.max {
                body.insert("max".into(), json!(max));
            }
        }
        AttributeKind::Enum => {
            body.insert("elements".into(), json!(spec.elements));
        }
        _ => {}
    }
}

fn create_body(spec: &AttributeSpec) -> Value {
    let mut body = Map::new();
    if spec.kind == AttributeKind::Relationship {
        body.insert(
            "relatedCollectionId".into(),
            json!(spec.related_table.as_ref().map(TableId::as_str)),
        );
        body.insert(
            "type".into(),
            json!(if spec.array { "oneToMany" } else { "oneToOne" }),
        );
        body.insert("twoWay".into(), json!(false));
        body.insert("key".into(), json!(spec.name));
        body.insert("onDelete".into(), json!("setNull"));
        return Value::Object(body);
    }
    body.insert("key".into(), json!(spec.name));
    body.insert("required".into(), json!(spec.required));
    body.insert("array".into(), json!(spec.array));
    body.insert("default".into(), spec.default.clone().unwrap_or(Value::Null));
    constraint_body(spec, &mut body);
    Value::Object(body)
}

fn update_body(spec: &AttributeSpec) -> Value {
    let mut body = Map::new();
    if spec.kind == AttributeKind::Relationship {
        body.insert("onDelete".into(), json!("setNull"));
        return Value::Object(body);
    }
    body.insert("required".into(), json!(spec.required));
    body.insert("default".into(), spec.default.clone().unwrap_or(Value::Null));
    constraint_body(spec, &mut body);
    Value::Object(body)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get_table(&self, table: &TableId) -> BackendResult<Option<TableInfo>> {
        match self
            .send_json::<TableWire>(self.request(Method::GET, &self.table_path(table)))
            .await
        {
            Ok(wire) => Ok(Some(wire.into_info())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_table(
        &self,
        table: &TableId,
        name: &str,
        permissions: &[PermissionRule],
    ) -> BackendResult<TableInfo> {
        let path = format!("/databases/{}/collections", self.config.database_id);
        let body = json!({
            "collectionId": table.as_str(),
            "name": name,
            "permissions": permissions.iter().map(PermissionRule::to_backend_string).collect::<Vec<_>>(),
            "documentSecurity": false,
        });
        debug!("creating table {table}");
        let wire: TableWire = self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(wire.into_info())
    }

    async fn list_attributes(&self, table: &TableId) -> BackendResult<Vec<RemoteAttribute>> {
        let path = format!("{}/attributes", self.table_path(table));
        let list: AttributeListWire = self.send_json(self.request(Method::GET, &path)).await?;
        list.attributes
            .into_iter()
            .map(AttributeWire::into_remote)
            .collect()
    }

    async fn get_attribute(&self, table: &TableId, name: &str) -> BackendResult<RemoteAttribute> {
        let path = format!("{}/attributes/{name}", self.table_path(table));
        let wire: AttributeWire = self.send_json(self.request(Method::GET, &path)).await?;
        wire.into_remote()
    }

    async fn create_attribute(
        &self,
        table: &TableId,
        spec: &AttributeSpec,
    ) -> BackendResult<RemoteAttribute> {
        let path = format!(
            "{}/attributes/{}",
            self.table_path(table),
            attribute_endpoint(spec.kind)
        );
        let wire: AttributeWire = self
            .send_json(self.request(Method::POST, &path).json(&create_body(spec)))
            .await?;
        wire.into_remote()
    }

    async fn update_attribute(
        &self,
        table: &TableId,
        spec: &AttributeSpec,
    ) -> BackendResult<RemoteAttribute> {
        let path = if spec.kind == AttributeKind::Relationship {
            format!("{}/attributes/{}/relationship", self.table_path(table), spec.name)
        } else {
            format!(
                "{}/attributes/{}/{}",
                self.table_path(table),
                attribute_endpoint(spec.kind),
                spec.name
            )
        };
        let wire: AttributeWire = self
            .send_json(self.request(Method::PATCH, &path).json(&update_body(spec)))
            .await?;
        wire.into_remote()
    }

    async fn delete_attribute(&self, table: &TableId, name: &str) -> BackendResult<()> {
        let path = format!("{}/attributes/{name}", self.table_path(table));
        self.send_empty(self.request(Method::DELETE, &path)).await
    }

    // Permissions are stored as one list on the table, so single-rule
    // changes are read-modify-write.

    async fn grant_permission(&self, table: &TableId, rule: &PermissionRule) -> BackendResult<()> {
        let info = self.require_table(table).await?;
        if info.permissions.contains(rule) {
            return Ok(());
        }
        let mut permissions = info.permissions;
        permissions.push(rule.clone());
        self.put_permissions(table, &info.name, &permissions).await
    }

    async fn revoke_permission(
        &self,
        table: &TableId,
        rule: &PermissionRule,
    ) -> BackendResult<()> {
        let info = self.require_table(table).await?;
        if !info.permissions.contains(rule) {
            return Ok(());
        }
        let permissions: Vec<PermissionRule> = info
            .permissions
            .into_iter()
            .filter(|p| p != rule)
            .collect();
        self.put_permissions(table, &info.name, &permissions).await
    }

    async fn create_document(
        &self,
        table: &TableId,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> BackendResult<Document> {
        let path = format!("{}/documents", self.table_path(table));
        let body = json!({ "documentId": id.as_str(), "data": data });
        self.send_json(self.request(Method::POST, &path).json(&body))
            .await
    }

    async fn get_document(&self, table: &TableId, id: &DocumentId) -> BackendResult<Document> {
        let path = format!("{}/documents/{id}", self.table_path(table));
        self.send_json(self.request(Method::GET, &path)).await
    }

    async fn update_document(
        &self,
        table: &TableId,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> BackendResult<Document> {
        let path = format!("{}/documents/{id}", self.table_path(table));
        self.send_json(self.request(Method::PATCH, &path).json(&json!({ "data": data })))
            .await
    }

    async fn delete_document(&self, table: &TableId, id: &DocumentId) -> BackendResult<()> {
        let path = format!("{}/documents/{id}", self.table_path(table));
        self.send_empty(self.request(Method::DELETE, &path)).await
    }

    async fn list_documents(
        &self,
        table: &TableId,
        queries: &[Query],
    ) -> BackendResult<DocumentList> {
        let mut path = format!("{}/documents", self.table_path(table));
        for (i, query) in queries.iter().enumerate() {
            path.push(if i == 0 { '?' } else { '&' });
            path.push_str("queries%5B%5D=");
            path.push_str(&urlencoding::encode(&query.to_backend_string()));
        }
        self.send_json(self.request(Method::GET, &path)).await
    }
}
