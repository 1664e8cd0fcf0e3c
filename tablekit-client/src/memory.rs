//! In-process backend.
//!
//! Behaves like the remote backend closely enough to exercise the
//! reconciliation engine and the table API without a server: attributes
//! stay `processing` for a configurable number of status polls, documents
//! are checked against available attributes, and failures can be injected
//! per attribute, permission rule or document field value. Every call is
//! logged so tests can count network round-trips.

use crate::backend::{Backend, TableInfo};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tablekit_types::{
    AttributeSpec, AttributeStatus, Document, DocumentId, DocumentList, PermissionRule, Query,
    RemoteAttribute, TableId,
};

struct MemoryAttribute {
    remote: RemoteAttribute,
    polls_remaining: u32,
}

struct MemoryTable {
    name: String,
    permissions: Vec<PermissionRule>,
    attributes: Vec<MemoryAttribute>,
    documents: BTreeMap<DocumentId, Document>,
}

#[derive(Default)]
struct State {
    tables: HashMap<TableId, MemoryTable>,
    calls: Vec<String>,
    provisioning_polls: u32,
    failing_attributes: HashSet<String>,
    rejected_attributes: HashSet<String>,
    rejected_permissions: HashSet<PermissionRule>,
    rejected_values: Vec<(String, Value)>,
    read_latency: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attributes report `processing` for this many status polls after a
    /// create or update.
    pub fn with_provisioning_polls(self, polls: u32) -> Self {
        self.lock().provisioning_polls = polls;
        self
    }

    /// Delays every document read, widening race windows in tests.
    pub fn with_read_latency(self, latency: Duration) -> Self {
        self.lock().read_latency = Some(latency);
        self
    }

    /// The named attribute is accepted but ends up `failed`.
    pub fn fail_attribute(&self, name: &str) {
        self.lock().failing_attributes.insert(name.to_string());
    }

    /// Clears an injected attribute failure so a retry can succeed.
    pub fn heal_attribute(&self, name: &str) {
        let mut state = self.lock();
        state.failing_attributes.remove(name);
        state.rejected_attributes.remove(name);
    }

    /// Create/update requests for the named attribute are refused outright.
    pub fn reject_attribute(&self, name: &str) {
        self.lock().rejected_attributes.insert(name.to_string());
    }

    pub fn reject_permission(&self, rule: PermissionRule) {
        self.lock().rejected_permissions.insert(rule);
    }

    /// Document writes whose `field` equals `value` fail validation.
    pub fn reject_documents_where(&self, field: &str, value: Value) {
        self.lock().rejected_values.push((field.to_string(), value));
    }

    /// Seeds a table with already-available attributes.
    pub fn seed_table(
        &self,
        table: &TableId,
        attributes: Vec<AttributeSpec>,
        permissions: Vec<PermissionRule>,
    ) {
        self.lock().tables.insert(
            table.clone(),
            MemoryTable {
                name: table.to_string(),
                permissions,
                attributes: attributes
                    .into_iter()
                    .map(|spec| MemoryAttribute {
                        remote: RemoteAttribute::available(spec),
                        polls_remaining: 0,
                    })
                    .collect(),
                documents: BTreeMap::new(),
            },
        );
    }

    /// Overrides the status of an existing attribute.
    pub fn set_attribute_status(&self, table: &TableId, name: &str, status: AttributeStatus) {
        let mut state = self.lock();
        if let Some(attr) = state
            .tables
            .get_mut(table)
            .and_then(|t| t.attributes.iter_mut().find(|a| a.remote.name() == name))
        {
            attr.remote.status = status;
            attr.polls_remaining = 0;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of logged calls whose name starts with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn document_count(&self, table: &TableId) -> usize {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.documents.len())
            .unwrap_or(0)
    }

    fn record(state: &mut State, call: String) {
        state.calls.push(call);
    }

    async fn read_delay(&self) {
        let latency = self.lock().read_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn table_mut<'a>(state: &'a mut State, table: &TableId) -> BackendResult<&'a mut MemoryTable> {
        state
            .tables
            .get_mut(table)
            .ok_or_else(|| BackendError::NotFound(format!("table {table}")))
    }

    /// Puts an existing attribute into `deleting`; it disappears after
    /// `polls` further status polls.
    pub fn mark_deleting(&self, table: &TableId, name: &str, polls: u32) {
        let mut state = self.lock();
        if let Some(attr) = state
            .tables
            .get_mut(table)
            .and_then(|t| t.attributes.iter_mut().find(|a| a.remote.name() == name))
        {
            attr.remote.status = AttributeStatus::Deleting;
            attr.polls_remaining = polls;
        }
    }

    fn write_attribute(
        &self,
        call: &str,
        table: &TableId,
        spec: &AttributeSpec,
        create: bool,
    ) -> BackendResult<RemoteAttribute> {
        let mut state = self.lock();
        Self::record(&mut state, format!("{call} {table}.{}", spec.name));
        if state.rejected_attributes.contains(&spec.name) {
            return Err(BackendError::Validation(format!(
                "attribute {} rejected",
                spec.name
            )));
        }
        let polls = state.provisioning_polls;
        let fails = state.failing_attributes.contains(&spec.name);
        let t = Self::table_mut(&mut state, table)?;
        let existing = t.attributes.iter().position(|a| a.remote.name() == spec.name);

        let status = if polls == 0 {
            if fails {
                AttributeStatus::Failed
            } else {
                AttributeStatus::Available
            }
        } else {
            AttributeStatus::Processing
        };
        let attr = MemoryAttribute {
            remote: RemoteAttribute {
                spec: spec.clone(),
                status,
                error: None,
            },
            polls_remaining: polls,
        };

        match (existing, create) {
            (Some(_), true) => Err(BackendError::Conflict(format!(
                "attribute {} already exists",
                spec.name
            ))),
            (None, false) => Err(BackendError::NotFound(format!("attribute {}", spec.name))),
            (Some(i), false) => {
                if t.attributes[i].remote.kind() != spec.kind {
                    return Err(BackendError::Validation("attribute kind mismatch".into()));
                }
                t.attributes[i] = attr;
                Ok(t.attributes[i].remote.clone())
            }
            (None, true) => {
                t.attributes.push(attr);
                Ok(t.attributes[t.attributes.len() - 1].remote.clone())
            }
        }
    }

    fn check_document(state: &State, table: &MemoryTable, data: &Map<String, Value>) -> BackendResult<()> {
        for (key, value) in data {
            if key.starts_with('$') {
                continue;
            }
            let attr = table
                .attributes
                .iter()
                .find(|a| a.remote.name() == key)
                .ok_or_else(|| BackendError::Validation(format!("Unknown attribute: \"{key}\"")))?;
            if attr.remote.status != AttributeStatus::Available {
                return Err(BackendError::Validation(format!(
                    "attribute \"{key}\" is not available"
                )));
            }
            if state
                .rejected_values
                .iter()
                .any(|(field, rejected)| field == key && rejected == value)
            {
                return Err(BackendError::Validation(format!(
                    "Invalid document structure: attribute \"{key}\" has invalid value"
                )));
            }
        }
        Ok(())
    }
}

fn matches_filters(doc: &Document, queries: &[Query]) -> bool {
    queries.iter().all(|q| match q {
        Query::Equal(attr, values) => doc.get(attr).is_some_and(|v| values.contains(v)),
        Query::NotEqual(attr, values) => doc.get(attr).is_none_or(|v| !values.contains(v)),
        Query::IsNull(attr) => doc.get(attr).is_none_or(Value::is_null),
        Query::IsNotNull(attr) => doc.get(attr).is_some_and(|v| !v.is_null()),
        _ => true,
    })
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_table(&self, table: &TableId) -> BackendResult<Option<TableInfo>> {
        let mut state = self.lock();
        Self::record(&mut state, format!("get_table {table}"));
        Ok(state.tables.get(table).map(|t| TableInfo {
            id: table.clone(),
            name: t.name.clone(),
            permissions: t.permissions.clone(),
        }))
    }

    async fn create_table(
        &self,
        table: &TableId,
        name: &str,
        permissions: &[PermissionRule],
    ) -> BackendResult<TableInfo> {
        let mut state = self.lock();
        Self::record(&mut state, format!("create_table {table}"));
        if state.tables.contains_key(table) {
            return Err(BackendError::Conflict(format!("table {table} already exists")));
        }
        state.tables.insert(
            table.clone(),
            MemoryTable {
                name: name.to_string(),
                permissions: permissions.to_vec(),
                attributes: Vec::new(),
                documents: BTreeMap::new(),
            },
        );
        Ok(TableInfo {
            id: table.clone(),
            name: name.to_string(),
            permissions: permissions.to_vec(),
        })
    }

    async fn list_attributes(&self, table: &TableId) -> BackendResult<Vec<RemoteAttribute>> {
        let mut state = self.lock();
        Self::record(&mut state, format!("list_attributes {table}"));
        let t = Self::table_mut(&mut state, table)?;
        Ok(t.attributes.iter().map(|a| a.remote.clone()).collect())
    }

    async fn get_attribute(&self, table: &TableId, name: &str) -> BackendResult<RemoteAttribute> {
        let mut state = self.lock();
        Self::record(&mut state, format!("get_attribute {table}.{name}"));
        let fails = state.failing_attributes.contains(name);
        let t = Self::table_mut(&mut state, table)?;
        let index = t
            .attributes
            .iter()
            .position(|a| a.remote.name() == name)
            .ok_or_else(|| BackendError::NotFound(format!("attribute {name}")))?;

        let attr = &mut t.attributes[index];
        if attr.remote.status == AttributeStatus::Deleting {
            if attr.polls_remaining == 0 {
                t.attributes.remove(index);
                return Err(BackendError::NotFound(format!("attribute {name}")));
            }
            attr.polls_remaining -= 1;
        }
        if attr.remote.status == AttributeStatus::Processing {
            if attr.polls_remaining > 0 {
                attr.polls_remaining -= 1;
            }
            if attr.polls_remaining == 0 {
                if fails {
                    attr.remote.status = AttributeStatus::Failed;
                    attr.remote.error = Some("provisioning failed".to_string());
                } else {
                    attr.remote.status = AttributeStatus::Available;
                }
            }
        }
        Ok(attr.remote.clone())
    }

    async fn create_attribute(
        &self,
        table: &TableId,
        spec: &AttributeSpec,
    ) -> BackendResult<RemoteAttribute> {
        self.write_attribute("create_attribute", table, spec, true)
    }

    async fn update_attribute(
        &self,
        table: &TableId,
        spec: &AttributeSpec,
    ) -> BackendResult<RemoteAttribute> {
        self.write_attribute("update_attribute", table, spec, false)
    }

    async fn delete_attribute(&self, table: &TableId, name: &str) -> BackendResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("delete_attribute {table}.{name}"));
        let t = Self::table_mut(&mut state, table)?;
        let before = t.attributes.len();
        t.attributes.retain(|a| a.remote.name() != name);
        if t.attributes.len() == before {
            return Err(BackendError::NotFound(format!("attribute {name}")));
        }
        Ok(())
    }

    async fn grant_permission(&self, table: &TableId, rule: &PermissionRule) -> BackendResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("grant_permission {table} {rule}"));
        if state.rejected_permissions.contains(rule) {
            return Err(BackendError::Validation(format!("role {} is invalid", rule.role)));
        }
        let t = Self::table_mut(&mut state, table)?;
        if !t.permissions.contains(rule) {
            t.permissions.push(rule.clone());
        }
        Ok(())
    }

    async fn revoke_permission(
        &self,
        table: &TableId,
        rule: &PermissionRule,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("revoke_permission {table} {rule}"));
        if state.rejected_permissions.contains(rule) {
            return Err(BackendError::Validation(format!("role {} is invalid", rule.role)));
        }
        let t = Self::table_mut(&mut state, table)?;
        t.permissions.retain(|p| p != rule);
        Ok(())
    }

    async fn create_document(
        &self,
        table: &TableId,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> BackendResult<Document> {
        let mut state = self.lock();
        Self::record(&mut state, format!("create_document {table}/{id}"));
        {
            let t = state
                .tables
                .get(table)
                .ok_or_else(|| BackendError::NotFound(format!("table {table}")))?;
            Self::check_document(&state, t, data)?;
            if t.documents.contains_key(id) {
                return Err(BackendError::Conflict(format!("document {id} already exists")));
            }
        }
        let mut body = data.clone();
        body.insert("$tableId".into(), Value::from(table.as_str()));
        let doc = Document::new(id.clone(), body);
        Self::table_mut(&mut state, table)?
            .documents
            .insert(id.clone(), doc.clone());
        Ok(doc)
    }

    async fn get_document(&self, table: &TableId, id: &DocumentId) -> BackendResult<Document> {
        self.record_call(format!("get_document {table}/{id}"));
        self.read_delay().await;
        let state = self.lock();
        state
            .tables
            .get(table)
            .and_then(|t| t.documents.get(id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("document {id}")))
    }

    async fn update_document(
        &self,
        table: &TableId,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> BackendResult<Document> {
        let mut state = self.lock();
        Self::record(&mut state, format!("update_document {table}/{id}"));
        {
            let t = state
                .tables
                .get(table)
                .ok_or_else(|| BackendError::NotFound(format!("table {table}")))?;
            Self::check_document(&state, t, data)?;
        }
        let t = Self::table_mut(&mut state, table)?;
        let doc = t
            .documents
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(format!("document {id}")))?;
        for (k, v) in data {
            doc.data.insert(k.clone(), v.clone());
        }
        Ok(doc.clone())
    }

    async fn delete_document(&self, table: &TableId, id: &DocumentId) -> BackendResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("delete_document {table}/{id}"));
        Self::table_mut(&mut state, table)?
            .documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("document {id}")))
    }

    async fn list_documents(
        &self,
        table: &TableId,
        queries: &[Query],
    ) -> BackendResult<DocumentList> {
        self.record_call(format!("list_documents {table}"));
        self.read_delay().await;
        let state = self.lock();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| BackendError::NotFound(format!("table {table}")))?;

        let mut documents: Vec<Document> = t
            .documents
            .values()
            .filter(|d| matches_filters(d, queries))
            .cloned()
            .collect();
        let total = documents.len() as u64;

        let mut offset = 0usize;
        let mut limit = usize::MAX;
        for q in queries {
            match q {
                Query::OrderAsc(attr) | Query::OrderDesc(attr) => {
                    let key = |d: &Document| d.get(attr).map(Value::to_string).unwrap_or_default();
                    documents.sort_by_key(key);
                    if matches!(q, Query::OrderDesc(_)) {
                        documents.reverse();
                    }
                }
                Query::Limit(n) => limit = *n as usize,
                Query::Offset(n) => offset = *n as usize,
                _ => {}
            }
        }
        let documents = documents.into_iter().skip(offset).take(limit).collect();
        Ok(DocumentList { total, documents })
    }
}

impl MemoryBackend {
    fn record_call(&self, call: String) {
        self.lock().calls.push(call);
    }
}
