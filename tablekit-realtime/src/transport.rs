//! Transport seam between the bus and the push channel.

use crate::error::RealtimeResult;
use async_trait::async_trait;

/// Opens connections to the backend's realtime endpoint.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Connects subscribed to exactly `channels`. A new channel set always
    /// means a new connection.
    async fn connect(&self, channels: &[String]) -> RealtimeResult<Box<dyn RealtimeConnection>>;
}

/// One open connection.
#[async_trait]
pub trait RealtimeConnection: Send {
    /// Next text frame, or `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<RealtimeResult<String>>;
}
