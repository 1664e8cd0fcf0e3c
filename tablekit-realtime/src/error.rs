use thiserror::Error;

pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// The live connection dropped. Handled internally by reconnecting.
    #[error("realtime transport disconnected")]
    TransportDisconnected,

    /// Reconnection gave up after the backoff policy's attempts ran out.
    #[error("realtime unavailable after {attempts} connection attempts")]
    RealtimeUnavailable { attempts: u32 },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("realtime bus is shut down")]
    Closed,
}
