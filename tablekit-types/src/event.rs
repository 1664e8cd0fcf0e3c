//! Realtime change events.
//!
//! The push channel tags each message with a list of qualified event names
//! such as `databases.main.collections.messages.documents.42.update`, often
//! several names for the same action (wildcard and concrete forms). This
//! module collapses them into one typed `RealtimeEvent` with a deduplicated
//! set of `EventKind`s.

use crate::document::Document;
use crate::error::{TypesError, TypesResult};
use crate::ids::{DocumentId, TableId};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [Self::Create, Self::Update, Self::Delete];

    /// Reads the action from the last segment of a qualified event name.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name.rsplit('.').next()? {
            "create" => Some(Self::Create),
            "update" | "upsert" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A document mutation observed on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub table_id: TableId,
    pub document_id: DocumentId,
    pub kinds: BTreeSet<EventKind>,
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn new(
        table_id: impl Into<TableId>,
        document_id: impl Into<DocumentId>,
        kinds: impl IntoIterator<Item = EventKind>,
        payload: Value,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            document_id: document_id.into(),
            kinds: kinds.into_iter().collect(),
            payload,
        }
    }

    /// Builds an event from the raw `events` list and payload of a push
    /// message. Concrete ids in the event names win over `*`; the payload's
    /// `$id` / `$tableId` fill in whatever the names leave out.
    pub fn from_raw(events: &[String], payload: Value) -> TypesResult<Self> {
        let mut table_id: Option<String> = None;
        let mut document_id: Option<String> = None;
        let mut kinds = BTreeSet::new();

        for name in events {
            let segments: Vec<&str> = name.split('.').collect();
            let mut saw_document = false;
            for pair in segments.windows(2) {
                match pair[0] {
                    "collections" | "tables" if pair[1] != "*" => {
                        table_id.get_or_insert_with(|| pair[1].to_string());
                    }
                    "documents" | "rows" => {
                        saw_document = true;
                        if pair[1] != "*" && EventKind::from_event_name(pair[1]).is_none() {
                            document_id.get_or_insert_with(|| pair[1].to_string());
                        }
                    }
                    _ => {}
                }
            }
            if saw_document {
                if let Some(kind) = EventKind::from_event_name(name) {
                    kinds.insert(kind);
                }
            }
        }

        if kinds.is_empty() {
            return Err(TypesError::InvalidEvent(format!(
                "no document event in {events:?}"
            )));
        }

        let payload_str = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
        let table_id = table_id
            .or_else(|| payload_str("$tableId"))
            .or_else(|| payload_str("$collectionId"))
            .ok_or_else(|| TypesError::InvalidEvent("event names no table".to_string()))?;
        let document_id = document_id
            .or_else(|| payload_str("$id"))
            .ok_or_else(|| TypesError::InvalidEvent("event names no document".to_string()))?;

        Ok(Self {
            table_id: TableId::new(table_id),
            document_id: DocumentId::new(document_id),
            kinds,
            payload,
        })
    }

    pub fn has_kind(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// One typed change per kind carried by this event, in
    /// create/update/delete order.
    pub fn changes(&self) -> Vec<DocumentEvent> {
        self.kinds
            .iter()
            .map(|kind| DocumentEvent {
                table_id: self.table_id.clone(),
                document_id: self.document_id.clone(),
                change: self.change_for(*kind),
            })
            .collect()
    }

    fn change_for(&self, kind: EventKind) -> DocumentChange {
        if kind == EventKind::Delete {
            return DocumentChange::Deleted(self.document_id.clone());
        }
        let doc = Document::from_value(self.payload.clone()).unwrap_or_else(|| {
            let data = self.payload.as_object().cloned().unwrap_or_default();
            Document::new(self.document_id.clone(), data)
        });
        match kind {
            EventKind::Create => DocumentChange::Created(doc),
            _ => DocumentChange::Updated(doc),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    Created(Document),
    Updated(Document),
    Deleted(DocumentId),
}

impl DocumentChange {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Created(_) => EventKind::Create,
            Self::Updated(_) => EventKind::Update,
            Self::Deleted(_) => EventKind::Delete,
        }
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::Created(doc) | Self::Updated(doc) => Some(doc),
            Self::Deleted(_) => None,
        }
    }
}

/// What a listener receives: one change to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEvent {
    pub table_id: TableId,
    pub document_id: DocumentId,
    pub change: DocumentChange,
}

impl DocumentEvent {
    pub fn kind(&self) -> EventKind {
        self.change.kind()
    }
}
