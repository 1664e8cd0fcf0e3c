//! Realtime change events for tablekit.
//!
//! A [`RealtimeBus`] holds exactly one connection to the backend's push
//! channel, however many listeners are registered. Each incoming event
//! first invalidates the affected [`tablekit_cache::CacheStore`] entries and
//! is then fanned out to every matching subscription, once per event kind
//! it carries. Dropped connections are re-established with exponential
//! backoff; subscriptions survive reconnection.
//!
//! The wire transport is a trait ([`RealtimeTransport`]) so the bus can run
//! against a WebSocket client in production and [`MemoryTransport`] in
//! tests.

pub mod backoff;
pub mod bus;
pub mod error;
pub mod memory;
pub mod message;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use bus::{BusState, RealtimeBus, SubscriptionHandle};
pub use error::{RealtimeError, RealtimeResult};
pub use memory::MemoryTransport;
pub use message::RawRealtimeMessage;
pub use transport::{RealtimeConnection, RealtimeTransport};
