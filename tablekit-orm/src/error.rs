//! ORM error types.

use tablekit_client::BackendError;
use tablekit_import::ImportError;
use tablekit_realtime::RealtimeError;
use tablekit_schema::SchemaError;
use tablekit_types::{DocumentId, TableId};
use thiserror::Error;

pub type OrmResult<T> = Result<T, OrmError>;

#[derive(Debug, Error)]
pub enum OrmError {
    #[error("document {id} not found in {table}")]
    NotFound { table: TableId, id: DocumentId },

    /// Rejected locally against the declared schema, or by the backend.
    #[error("invalid document for {table}: {reason}")]
    Validation { table: TableId, reason: String },

    /// Declared, but its reconciliation failed.
    #[error("table {0} was not reconciled")]
    TableNotReconciled(TableId),

    #[error("table {0} is not declared")]
    UnknownTable(TableId),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("import error: {0}")]
    Import(#[from] ImportError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("orm has been shut down")]
    ShutDown,
}

impl OrmError {
    /// Maps a document call's backend error onto the table it concerned.
    pub(crate) fn from_document(table: &TableId, id: &DocumentId, err: BackendError) -> Self {
        match err {
            BackendError::NotFound(_) => Self::NotFound {
                table: table.clone(),
                id: id.clone(),
            },
            BackendError::Validation(reason) => Self::Validation {
                table: table.clone(),
                reason,
            },
            other => Self::Backend(other),
        }
    }

    /// The table a reconciliation or document error concerns, if any.
    pub fn table(&self) -> Option<&TableId> {
        match self {
            Self::NotFound { table, .. }
            | Self::Validation { table, .. }
            | Self::TableNotReconciled(table)
            | Self::UnknownTable(table) => Some(table),
            Self::Schema(e) => Some(e.table()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
