//! Shared helpers for realtime bus tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tablekit_cache::CacheStore;
use tablekit_realtime::{BackoffPolicy, MemoryTransport, RealtimeBus};
use tablekit_types::{DocumentEvent, EventKind, RealtimeEvent};
use tokio::sync::mpsc;

pub struct Harness {
    pub bus: RealtimeBus,
    pub transport: MemoryTransport,
    pub cache: Arc<CacheStore>,
}

pub fn harness() -> Harness {
    harness_with(BackoffPolicy::fixed(1_000, 30_000, 10))
}

pub fn harness_with(backoff: BackoffPolicy) -> Harness {
    let transport = MemoryTransport::new();
    let cache = Arc::new(CacheStore::default());
    let bus = RealtimeBus::new(Arc::new(transport.clone()), cache.clone(), "main", backoff);
    Harness {
        bus,
        transport,
        cache,
    }
}

pub fn event_name(table: &str, doc: &str, action: &str) -> String {
    format!("databases.main.collections.{table}.documents.{doc}.{action}")
}

pub fn payload(table: &str, doc: &str) -> Value {
    json!({ "$id": doc, "$collectionId": table, "body": "hi" })
}

pub fn event(table: &str, doc: &str, kinds: &[EventKind]) -> RealtimeEvent {
    RealtimeEvent::new(table, doc, kinds.iter().copied(), payload(table, doc))
}

/// Callback that forwards every delivery into a channel.
pub fn forwarder() -> (
    impl Fn(&DocumentEvent) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<DocumentEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |e: &DocumentEvent| {
        let _ = tx.send(e.clone());
    }, rx)
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<DocumentEvent>) -> DocumentEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .expect("channel closed")
}

/// Polls `cond` every 10ms for up to 5s of (simulated) time.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
