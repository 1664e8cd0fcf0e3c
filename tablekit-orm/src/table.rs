//! Per-table operations.
//!
//! Reads go through the cache with single-flight fetches. Writes are
//! validated against the declared attributes before any network call and
//! invalidate the table's cached reads before they return.

use crate::error::{OrmError, OrmResult};
use crate::orm::OrmInner;
use crate::schema::TableSchema;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tablekit_cache::{CacheValue, Fingerprint};
use tablekit_client::BackendError;
use tablekit_import::{coerce_to, ImportSummary, Record, RecordSink, RecordSource, SourceImporter};
use tablekit_realtime::SubscriptionHandle;
use tablekit_types::attribute::validate_record;
use tablekit_types::{Document, DocumentEvent, DocumentId, DocumentList, EventKind, Query, TableId};
use tracing::debug;

/// Handle for one reconciled table. Holds the owning [`crate::Orm`]'s
/// context, so it stays valid as long as it is kept.
#[derive(Clone)]
pub struct Table {
    orm: Arc<OrmInner>,
    schema: Arc<TableSchema>,
}

impl Table {
    pub(crate) fn new(orm: Arc<OrmInner>, schema: Arc<TableSchema>) -> Self {
        Self { orm, schema }
    }

    pub fn id(&self) -> &TableId {
        &self.schema.id
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    // ── writes ──

    /// Creates a document under a fresh id.
    pub async fn create(&self, data: Map<String, Value>) -> OrmResult<Document> {
        self.create_with_id(DocumentId::unique(), data).await
    }

    pub async fn create_with_id(
        &self,
        id: DocumentId,
        data: Map<String, Value>,
    ) -> OrmResult<Document> {
        self.orm.ensure_open()?;
        self.validate(&data, false)?;
        let result = self
            .orm
            .backend
            .create_document(self.id(), &id, &data)
            .await;
        // Anything but a rejection may have been committed.
        if !matches!(result, Err(BackendError::Validation(_))) {
            self.invalidate();
        }
        result.map_err(|e| OrmError::from_document(self.id(), &id, e))
    }

    /// Applies a partial update. Required attributes may be omitted.
    pub async fn update(&self, id: &DocumentId, data: Map<String, Value>) -> OrmResult<Document> {
        self.orm.ensure_open()?;
        self.validate(&data, true)?;
        let result = self
            .orm
            .backend
            .update_document(self.id(), id, &data)
            .await;
        if !matches!(result, Err(BackendError::Validation(_))) {
            self.invalidate();
        }
        result.map_err(|e| OrmError::from_document(self.id(), id, e))
    }

    pub async fn delete(&self, id: &DocumentId) -> OrmResult<()> {
        self.orm.ensure_open()?;
        let result = self.orm.backend.delete_document(self.id(), id).await;
        // A not-found answer means any cached copy is stale as well.
        self.invalidate();
        result.map_err(|e| OrmError::from_document(self.id(), id, e))
    }

    fn validate(&self, data: &Map<String, Value>, partial: bool) -> OrmResult<()> {
        validate_record(&self.schema.attributes, data, partial).map_err(|e| {
            OrmError::Validation {
                table: self.id().clone(),
                reason: e.to_string(),
            }
        })
    }

    fn invalidate(&self) {
        let removed = self.orm.cache.invalidate_table(self.id());
        debug!(table = %self.id(), removed, "write invalidated cached reads");
    }

    // ── reads ──

    pub async fn get(&self, id: &DocumentId) -> OrmResult<Document> {
        self.orm.ensure_open()?;
        let fp = Fingerprint::for_document(self.id(), id);
        let (backend, table) = (&self.orm.backend, self.id());
        let value = self
            .orm
            .cache
            .get_or_fetch(&fp, None, || async move {
                backend
                    .get_document(table, id)
                    .await
                    .map(CacheValue::Document)
            })
            .await
            .map_err(|e| OrmError::from_document(self.id(), id, e))?;
        value.into_document().ok_or_else(|| OrmError::NotFound {
            table: self.id().clone(),
            id: id.clone(),
        })
    }

    pub async fn all(&self) -> OrmResult<DocumentList> {
        self.query(&[]).await
    }

    pub async fn query(&self, queries: &[Query]) -> OrmResult<DocumentList> {
        self.orm.ensure_open()?;
        let fp = Fingerprint::for_query(self.id(), queries);
        let (backend, table) = (&self.orm.backend, self.id());
        let value = self
            .orm
            .cache
            .get_or_fetch(&fp, None, || async move {
                backend
                    .list_documents(table, queries)
                    .await
                    .map(CacheValue::List)
            })
            .await
            .map_err(|e| match e {
                BackendError::Validation(reason) => OrmError::Validation {
                    table: self.id().clone(),
                    reason,
                },
                other => OrmError::Backend(other),
            })?;
        Ok(value.into_list().unwrap_or_default())
    }

    // ── listeners ──

    /// Calls `callback` for every change to any document of the table.
    pub fn listen_to_documents<F>(&self, callback: F) -> OrmResult<SubscriptionHandle>
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        self.listen_to_documents_filtered(&[], callback)
    }

    /// Like [`Table::listen_to_documents`], restricted to `kinds`.
    pub fn listen_to_documents_filtered<F>(
        &self,
        kinds: &[EventKind],
        callback: F,
    ) -> OrmResult<SubscriptionHandle>
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        self.orm.ensure_open()?;
        Ok(self.orm.bus.subscribe(self.id(), None, kinds, callback))
    }

    pub fn listen_to_document<F>(&self, id: &DocumentId, callback: F) -> OrmResult<SubscriptionHandle>
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        self.orm.ensure_open()?;
        Ok(self.orm.bus.subscribe(self.id(), Some(id), &[], callback))
    }

    // ── import ──

    /// Creates one document per source record, in batches of
    /// `import_batch_size`. Records that fail are listed in the summary;
    /// the rest are still created. A record's `$id` becomes its document
    /// id.
    pub async fn import(&self, source: &dyn RecordSource) -> OrmResult<ImportSummary> {
        self.orm.ensure_open()?;
        let importer = SourceImporter::new(
            TableSink {
                table: self.clone(),
            },
            self.orm.config.import_batch_size,
        );
        Ok(importer.import(source).await)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", self.id())
            .field("attributes", &self.schema.attributes.len())
            .finish()
    }
}

struct TableSink {
    table: Table,
}

impl TableSink {
    /// Splits off the document id and shapes values after the declared
    /// attributes.
    fn prepare(&self, mut record: Record) -> (DocumentId, Map<String, Value>) {
        let id = match record.remove("$id") {
            Some(Value::String(s)) if !s.is_empty() => DocumentId::new(s),
            _ => DocumentId::unique(),
        };
        let data = record
            .into_iter()
            .filter(|(k, _)| !k.starts_with('$'))
            .map(|(k, v)| {
                let v = match self.table.schema.attribute_named(&k) {
                    Some(spec) => coerce_to(spec, v),
                    None => v,
                };
                (k, v)
            })
            .collect();
        (id, data)
    }
}

#[async_trait]
impl RecordSink for TableSink {
    async fn create_batch(&self, records: Vec<Record>) -> Vec<Result<(), String>> {
        let mut results: Vec<Option<Result<(), String>>> = vec![None; records.len()];
        let mut slots = Vec::new();
        let mut batch = Vec::new();

        for (slot, record) in records.into_iter().enumerate() {
            let (id, data) = self.prepare(record);
            match self.table.validate(&data, false) {
                Ok(()) => {
                    slots.push(slot);
                    batch.push((id, data));
                }
                Err(e) => results[slot] = Some(Err(e.to_string())),
            }
        }

        if !batch.is_empty() {
            let created = self
                .table
                .orm
                .backend
                .create_documents(self.table.id(), &batch)
                .await;
            for (pos, slot) in slots.into_iter().enumerate() {
                results[slot] = Some(match created.get(pos) {
                    Some(Ok(_)) => Ok(()),
                    Some(Err(e)) => Err(e.to_string()),
                    None => Err("backend returned no result".to_string()),
                });
            }
            self.table.invalidate();
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err("record was not processed".to_string())))
            .collect()
    }
}
