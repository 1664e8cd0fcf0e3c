//! Errors raised while parsing or validating shared types.

use thiserror::Error;

pub type TypesResult<T> = Result<T, TypesError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    #[error("invalid permission string: {0}")]
    InvalidPermission(String),

    #[error("unknown attribute kind: {0}")]
    UnknownKind(String),

    #[error("attribute {attribute}: {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("missing required attribute: {0}")]
    MissingRequired(String),

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}
