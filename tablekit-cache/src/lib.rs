//! Read cache for tablekit.
//!
//! Entries are keyed by [`Fingerprint`] (table plus normalized query) and
//! hold either a single document or a list snapshot. Staleness is purely
//! time-based; correctness against writes comes from explicit invalidation
//! by table or by document, driven by the table API and the realtime bus.

pub mod fingerprint;
pub mod store;

pub use fingerprint::Fingerprint;
pub use store::{CacheStats, CacheStore, CacheValue};
