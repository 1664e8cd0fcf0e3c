//! Backend access for tablekit.
//!
//! Everything the reconciliation engine, cache and table API need from the
//! remote document backend goes through the [`Backend`] trait:
//! - Attribute management (create/update/delete, status polling)
//! - Table-level permissions
//! - Document CRUD, listing with queries, and bulk creation
//!
//! [`HttpBackend`] implements it against the backend's REST API;
//! [`MemoryBackend`] is an in-process stand-in that models attribute
//! provisioning delays and injected failures.

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;

pub use backend::{Backend, TableInfo};
pub use config::BackendConfig;
pub use error::{BackendError, BackendResult};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
