//! Reconciliation error types.

use std::time::Duration;
use tablekit_client::BackendError;
use tablekit_types::TableId;
use thiserror::Error;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that abort reconciliation of one table.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The declaration changes something the backend cannot change in
    /// place (an attribute's kind, a relationship target).
    #[error("schema conflict on {table}.{attribute}: {reason}")]
    SchemaConflict {
        table: TableId,
        attribute: String,
        reason: String,
    },

    #[error("attribute {attribute} declared more than once on {table}")]
    DuplicateAttribute { table: TableId, attribute: String },

    /// The backend rejected the attribute or reported it failed while
    /// provisioning. Retrying resumes from the plan cursor.
    #[error("attribute {table}.{attribute} failed to provision: {reason}")]
    AttributeProvisioningFailed {
        table: TableId,
        attribute: String,
        reason: String,
    },

    #[error("attribute {table}.{attribute} still not available after {waited:?}")]
    ProvisioningTimeout {
        table: TableId,
        attribute: String,
        waited: Duration,
    },

    #[error("backend error on {table} ({target}): {source}")]
    Backend {
        table: TableId,
        target: String,
        source: BackendError,
    },
}

impl SchemaError {
    pub fn table(&self) -> &TableId {
        match self {
            Self::SchemaConflict { table, .. }
            | Self::DuplicateAttribute { table, .. }
            | Self::AttributeProvisioningFailed { table, .. }
            | Self::ProvisioningTimeout { table, .. }
            | Self::Backend { table, .. } => table,
        }
    }

    /// Conflicts need a schema change; everything else can be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::SchemaConflict { .. } | Self::DuplicateAttribute { .. }
        )
    }
}
