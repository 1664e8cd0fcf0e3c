//! tablekit: a declarative ORM in front of a remote document backend.
//!
//! An [`Orm`] is an explicit context object. It owns one backend client,
//! one [`CacheStore`], one [`RealtimeBus`] and the registry of reconciled
//! tables. Several can coexist in one process.
//!
//! ```text
//! Orm::init(config, backend, transport, schema)
//!   for each declared table:
//!     ensure table -> diff attributes -> migrate -> reconcile permissions
//!   connect realtime (one connection, every table channel)
//!
//! orm.table("posts")?.create(..) / get(..) / query(..) / listen_to_documents(..)
//! ```
//!
//! Writes invalidate the cache before they return; realtime events from
//! the backend invalidate it again when they arrive.

pub mod config;
pub mod error;
pub mod orm;
pub mod schema;
pub mod table;

pub use config::OrmConfig;
pub use error::{OrmError, OrmResult};
pub use orm::{Orm, ReconcileReport, TableReport};
pub use schema::{DatabaseSchema, TableSchema};
pub use table::Table;

pub use tablekit_cache::CacheStore;
pub use tablekit_realtime::{RealtimeBus, SubscriptionHandle};
