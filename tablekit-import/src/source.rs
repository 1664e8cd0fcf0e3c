//! The source abstraction.

use crate::delimited::DelimitedSource;
use crate::error::{ImportError, ImportResult};
use crate::json::JsonExportSource;
use crate::sql::SqlDumpSource;
use serde_json::{Map, Value};
use std::path::Path;
use tablekit_types::AttributeSpec;

/// One normalized row: field name to scalar value.
pub type Record = Map<String, Value>;

pub trait RecordSource: Send + Sync {
    /// Records in source order. Each item is produced on demand; a record
    /// that fails to parse is yielded as an error and iteration continues.
    fn records(&self) -> Box<dyn Iterator<Item = ImportResult<Record>> + Send + '_>;

    /// Column declarations carried by the source itself, if any.
    fn declared_schema(&self) -> Option<Vec<AttributeSpec>> {
        None
    }
}

/// Opens a file as a source, chosen by extension: `.csv`, `.tsv`, `.sql`,
/// `.json`, `.ndjson`/`.jsonl`.
pub fn source_from_path(path: impl AsRef<Path>) -> ImportResult<Box<dyn RecordSource>> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => Ok(Box::new(DelimitedSource::from_path(path)?)),
        "tsv" => Ok(Box::new(DelimitedSource::from_path(path)?.with_delimiter('\t'))),
        "sql" => Ok(Box::new(SqlDumpSource::from_path(path)?)),
        "json" | "ndjson" | "jsonl" => Ok(Box::new(JsonExportSource::from_path(path)?)),
        _ => Err(ImportError::UnsupportedSource(path.display().to_string())),
    }
}
