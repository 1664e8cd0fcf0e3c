//! Documents as returned by the backend.

use crate::ids::{DocumentId, TableId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document. Backend metadata (`$createdAt`, `$tableId`, ...)
/// stays in `data` alongside user fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: DocumentId,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Parses a backend payload; `None` when it carries no `$id`.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Table the document belongs to, when the payload says so.
    pub fn table_id(&self) -> Option<TableId> {
        self.data
            .get("$tableId")
            .or_else(|| self.data.get("$collectionId"))
            .and_then(Value::as_str)
            .map(TableId::from)
    }

    /// User fields only, without `$`-prefixed metadata.
    pub fn fields(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter(|(k, _)| !k.starts_with('$'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// One page of a document listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentList {
    pub total: u64,
    #[serde(alias = "rows")]
    pub documents: Vec<Document>,
}

impl DocumentList {
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.iter().any(|d| &d.id == id)
    }
}
