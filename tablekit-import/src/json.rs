//! Structured exports.
//!
//! Accepts a top-level array of objects, an object wrapping that array
//! under `documents` or `rows` (the backend's own list format), a single
//! object, or newline-delimited JSON. Backend metadata keys (`$`-prefixed)
//! are dropped except `$id`, which the sink may use as the document id.

use crate::error::{ImportError, ImportResult};
use crate::source::{Record, RecordSource};
use serde_json::Value;
use std::path::Path;

enum Layout {
    Items(Vec<Value>),
    Lines(String),
}

pub struct JsonExportSource {
    layout: Layout,
}

impl JsonExportSource {
    pub fn new(text: impl Into<String>) -> ImportResult<Self> {
        let text = text.into();
        let layout = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => Layout::Items(items),
            Ok(Value::Object(mut map)) => {
                match map.remove("documents").or_else(|| map.remove("rows")) {
                    Some(Value::Array(items)) => Layout::Items(items),
                    Some(other) => {
                        return Err(ImportError::UnsupportedSource(format!(
                            "expected an array of records, found {}",
                            kind_of(&other)
                        )));
                    }
                    None => Layout::Items(vec![Value::Object(map)]),
                }
            }
            Ok(other) => {
                return Err(ImportError::UnsupportedSource(format!(
                    "expected an array or object, found {}",
                    kind_of(&other)
                )));
            }
            // More than one top-level value: newline-delimited records.
            Err(_) if text.trim_start().starts_with('{') => Layout::Lines(text),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { layout })
    }

    pub fn from_path(path: impl AsRef<Path>) -> ImportResult<Self> {
        Self::new(std::fs::read_to_string(path)?)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn to_record(index: usize, value: Value) -> ImportResult<Record> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(k, _)| !k.starts_with('$') || k == "$id")
            .collect()),
        other => Err(ImportError::parse(
            index,
            format!("expected an object, found {}", kind_of(&other)),
        )),
    }
}

impl RecordSource for JsonExportSource {
    fn records(&self) -> Box<dyn Iterator<Item = ImportResult<Record>> + Send + '_> {
        match &self.layout {
            Layout::Items(items) => Box::new(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| to_record(i, v.clone())),
            ),
            Layout::Lines(text) => Box::new(
                text.lines()
                    .filter(|line| !line.trim().is_empty())
                    .enumerate()
                    .map(|(i, line)| {
                        serde_json::from_str::<Value>(line)
                            .map_err(|e| ImportError::parse(i, e.to_string()))
                            .and_then(|v| to_record(i, v))
                    }),
            ),
        }
    }
}
