//! In-process transport.
//!
//! Each `connect` opens a fresh channel pair; frames pushed through the
//! transport go to the most recent connection. Tests use it to feed frames
//! to a bus, drop its connection, and make connection attempts fail.

use crate::error::{RealtimeError, RealtimeResult};
use crate::transport::{RealtimeConnection, RealtimeTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    sender: Option<mpsc::UnboundedSender<String>>,
    channels: Vec<String>,
    connects: usize,
    failures_left: u32,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pushes a raw frame to the live connection. Returns `false` when
    /// nothing is connected.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        let state = self.lock();
        match &state.sender {
            Some(tx) => tx.send(frame.into()).is_ok(),
            None => false,
        }
    }

    /// Pushes an `event` frame with the given qualified event names.
    pub fn send_event(&self, events: &[&str], payload: Value) -> bool {
        let frame = json!({
            "type": "event",
            "data": {
                "events": events,
                "channels": self.channels(),
                "timestamp": 0,
                "payload": payload,
            }
        });
        self.send_frame(frame.to_string())
    }

    /// Closes the live connection as if the network dropped it.
    pub fn drop_connection(&self) {
        self.lock().sender = None;
    }

    /// The next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failures_left = count;
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Channels of the most recent successful connection.
    pub fn channels(&self) -> Vec<String> {
        self.lock().channels.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock()
            .sender
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

struct MemoryConnection {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl RealtimeConnection for MemoryConnection {
    async fn next_frame(&mut self) -> Option<RealtimeResult<String>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl RealtimeTransport for MemoryTransport {
    async fn connect(&self, channels: &[String]) -> RealtimeResult<Box<dyn RealtimeConnection>> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(RealtimeError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.sender = Some(tx);
        state.channels = channels.to_vec();
        state.connects += 1;
        Ok(Box::new(MemoryConnection { rx }))
    }
}
