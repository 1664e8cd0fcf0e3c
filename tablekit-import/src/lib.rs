//! Bulk import into tablekit tables.
//!
//! A [`RecordSource`] turns external data into a lazy stream of flat
//! records (field name to scalar). [`infer_schema`] derives attribute
//! declarations from those records when the target table has none, and
//! [`SourceImporter`] feeds the records to a [`RecordSink`] in bounded
//! batches, collecting per-record failures instead of stopping at the
//! first one.

pub mod delimited;
pub mod error;
pub mod importer;
pub mod infer;
pub mod json;
pub mod source;
pub mod sql;

pub use delimited::DelimitedSource;
pub use error::{ImportError, ImportResult};
pub use importer::{ImportFailure, ImportSummary, RecordSink, SourceImporter};
pub use infer::{coerce_to, infer_scalar, infer_schema, normalize_datetime};
pub use json::JsonExportSource;
pub use source::{source_from_path, Record, RecordSource};
pub use sql::SqlDumpSource;
