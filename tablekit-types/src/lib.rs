//! Core types shared by every tablekit crate.
//!
//! Covers the declared side of a schema (`AttributeSpec`, `PermissionRule`),
//! the observed side (`RemoteAttribute`), documents and queries, and the
//! typed realtime events that flow from the backend's push channel.

pub mod attribute;
pub mod document;
pub mod error;
pub mod event;
pub mod ids;
pub mod permission;
pub mod query;

pub use attribute::{AttributeKind, AttributeSpec, AttributeStatus, RemoteAttribute};
pub use document::{Document, DocumentList};
pub use error::{TypesError, TypesResult};
pub use event::{DocumentChange, DocumentEvent, EventKind, RealtimeEvent};
pub use ids::{DocumentId, SubscriptionId, TableId};
pub use permission::{PermissionAction, PermissionRule};
pub use query::Query;
