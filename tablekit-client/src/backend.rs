//! The backend seam.

use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tablekit_types::{
    AttributeSpec, Document, DocumentId, DocumentList, PermissionRule, Query, RemoteAttribute,
    TableId,
};

/// Table metadata relevant to reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub permissions: Vec<PermissionRule>,
}

/// Operations consumed from the remote document backend.
///
/// Attribute creation is asynchronous on the backend side: `create_attribute`
/// returns while the attribute is still `processing`, and callers poll
/// `get_attribute` until it reports `available`.
#[async_trait]
pub trait Backend: Send + Sync {
    // ── Tables ──

    /// Returns `None` when the table does not exist.
    async fn get_table(&self, table: &TableId) -> BackendResult<Option<TableInfo>>;

    async fn create_table(
        &self,
        table: &TableId,
        name: &str,
        permissions: &[PermissionRule],
    ) -> BackendResult<TableInfo>;

    // ── Attributes ──

    async fn list_attributes(&self, table: &TableId) -> BackendResult<Vec<RemoteAttribute>>;

    async fn get_attribute(&self, table: &TableId, name: &str) -> BackendResult<RemoteAttribute>;

    async fn create_attribute(
        &self,
        table: &TableId,
        spec: &AttributeSpec,
    ) -> BackendResult<RemoteAttribute>;

    async fn update_attribute(
        &self,
        table: &TableId,
        spec: &AttributeSpec,
    ) -> BackendResult<RemoteAttribute>;

    async fn delete_attribute(&self, table: &TableId, name: &str) -> BackendResult<()>;

    // ── Permissions ──

    async fn list_permissions(&self, table: &TableId) -> BackendResult<Vec<PermissionRule>> {
        self.get_table(table)
            .await?
            .map(|info| info.permissions)
            .ok_or_else(|| BackendError::NotFound(format!("table {table}")))
    }

    async fn grant_permission(&self, table: &TableId, rule: &PermissionRule) -> BackendResult<()>;

    async fn revoke_permission(&self, table: &TableId, rule: &PermissionRule)
        -> BackendResult<()>;

    // ── Documents ──

    async fn create_document(
        &self,
        table: &TableId,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> BackendResult<Document>;

    async fn get_document(&self, table: &TableId, id: &DocumentId) -> BackendResult<Document>;

    async fn update_document(
        &self,
        table: &TableId,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> BackendResult<Document>;

    async fn delete_document(&self, table: &TableId, id: &DocumentId) -> BackendResult<()>;

    async fn list_documents(&self, table: &TableId, queries: &[Query])
        -> BackendResult<DocumentList>;

    /// Creates a batch of documents, reporting success or failure per record
    /// in input order. The default issues one create per record.
    async fn create_documents(
        &self,
        table: &TableId,
        records: &[(DocumentId, Map<String, Value>)],
    ) -> Vec<BackendResult<Document>> {
        let mut results = Vec::with_capacity(records.len());
        for (id, data) in records {
            results.push(self.create_document(table, id, data).await);
        }
        results
    }
}
