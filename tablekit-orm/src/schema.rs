//! Declared schema.
//!
//! JSON form, tables in order:
//!
//! ```json
//! {
//!   "tables": [{
//!     "id": "posts",
//!     "name": "Posts",
//!     "attributes": {
//!       "title": { "kind": "string", "size": 255, "required": true },
//!       "status": { "kind": "enum", "elements": ["draft", "live"], "default": "draft" }
//!     },
//!     "permissions": [{ "role": "any", "actions": ["read"] }]
//!   }]
//! }
//! ```
//!
//! A bare array of tables is accepted too, and `tableName` may stand in for
//! `id`.

use crate::error::{OrmError, OrmResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tablekit_import::{infer_schema, RecordSource};
use tablekit_types::{AttributeSpec, PermissionAction, PermissionRule, TableId};

/// Upper bound on records read when inferring attributes from a source.
const INFERENCE_SAMPLE: usize = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub id: TableId,
    pub name: String,
    pub attributes: Vec<AttributeSpec>,
    pub permissions: Vec<PermissionRule>,
}

impl TableSchema {
    pub fn new(id: impl Into<TableId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            attributes: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn attribute(mut self, spec: AttributeSpec) -> Self {
        self.attributes.push(spec);
        self
    }

    /// Grants `role` each of `actions`, one rule per action.
    pub fn permission(mut self, role: &str, actions: &[PermissionAction]) -> Self {
        for rule in PermissionRule::for_actions(role, actions) {
            if !self.permissions.contains(&rule) {
                self.permissions.push(rule);
            }
        }
        self
    }

    /// Declares a table shaped after an import source: the source's own
    /// column declarations when it has them, otherwise attributes inferred
    /// from up to the first thousand parseable records.
    pub fn inferred(id: impl Into<TableId>, source: &dyn RecordSource) -> Self {
        let attributes = source.declared_schema().unwrap_or_else(|| {
            let sample: Vec<_> = source
                .records()
                .filter_map(Result::ok)
                .take(INFERENCE_SAMPLE)
                .collect();
            infer_schema(&sample)
        });
        Self {
            attributes,
            ..Self::new(id)
        }
    }

    pub fn attribute_named(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseSchema {
    tables: Vec<TableSchema>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDatabase {
    Wrapped { tables: Vec<RawTable> },
    Bare(Vec<RawTable>),
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(alias = "tableName")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    permissions: Vec<RawPermission>,
}

#[derive(Deserialize)]
struct RawPermission {
    role: String,
    actions: Vec<PermissionAction>,
}

impl DatabaseSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    pub fn from_json(json: &str) -> OrmResult<Self> {
        let raw: RawDatabase = serde_json::from_str(json)
            .map_err(|e| OrmError::Config(format!("schema declaration: {e}")))?;
        let raw_tables = match raw {
            RawDatabase::Wrapped { tables } | RawDatabase::Bare(tables) => tables,
        };

        let mut schema = Self::new();
        for raw in raw_tables {
            let mut table = TableSchema::new(raw.id.as_str());
            if let Some(name) = raw.name {
                table.name = name;
            }
            for (name, body) in raw.attributes {
                let mut body = match body {
                    Value::Object(map) => map,
                    other => {
                        return Err(OrmError::Config(format!(
                            "{}.{name}: expected an object, found {other}",
                            raw.id
                        )));
                    }
                };
                body.insert("name".into(), Value::String(name.clone()));
                let spec: AttributeSpec = serde_json::from_value(Value::Object(body))
                    .map_err(|e| OrmError::Config(format!("{}.{name}: {e}", raw.id)))?;
                table.attributes.push(spec);
            }
            for permission in raw.permissions {
                table = table.permission(&permission.role, &permission.actions);
            }
            schema.tables.push(table);
        }
        schema.check()?;
        Ok(schema)
    }

    /// Rejects declarations that name the same table twice.
    pub fn check(&self) -> OrmResult<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(&table.id) {
                return Err(OrmError::Config(format!(
                    "table {} declared more than once",
                    table.id
                )));
            }
        }
        Ok(())
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn get(&self, id: &TableId) -> Option<&TableSchema> {
        self.tables.iter().find(|t| &t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
