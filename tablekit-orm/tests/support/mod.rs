//! Shared fixtures: an `Orm` over the in-memory backend and transport.

#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tablekit_client::MemoryBackend;
use tablekit_orm::{DatabaseSchema, Orm, OrmConfig, ReconcileReport, TableSchema};
use tablekit_realtime::{BackoffPolicy, MemoryTransport};
use tablekit_schema::PollPolicy;
use tablekit_types::{AttributeSpec, DocumentEvent, PermissionAction, TableId};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub struct Harness {
    pub orm: Orm,
    pub report: ReconcileReport,
    pub backend: Arc<MemoryBackend>,
    pub transport: MemoryTransport,
}

pub fn posts_id() -> TableId {
    TableId::new("posts")
}

pub fn users_id() -> TableId {
    TableId::new("users")
}

pub fn config() -> OrmConfig {
    OrmConfig {
        poll: PollPolicy {
            interval_ms: 100,
            timeout_ms: 2_000,
        },
        backoff: BackoffPolicy::fixed(1_000, 30_000, 3),
        ..OrmConfig::default()
    }
}

pub fn posts() -> TableSchema {
    TableSchema::new("posts")
        .named("Posts")
        .attribute(AttributeSpec::string("title", 255).required())
        .attribute(AttributeSpec::string("body", 10_000))
        .attribute(AttributeSpec::integer("views").range(Some(0.0), None))
        .attribute(AttributeSpec::enumeration("status", ["draft", "live"]).default_value(json!("draft")))
        .permission("any", &[PermissionAction::Read])
        .permission("users", &[PermissionAction::Create, PermissionAction::Update])
}

pub fn users() -> TableSchema {
    TableSchema::new("users")
        .attribute(AttributeSpec::string("name", 100).required())
        .permission("users", &[PermissionAction::Read])
}

pub fn schema() -> DatabaseSchema {
    DatabaseSchema::new().table(posts()).table(users())
}

pub async fn harness() -> Harness {
    harness_with(MemoryBackend::new(), schema(), config()).await
}

/// Routes library logs to the test output; filter with `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn harness_with(
    backend: MemoryBackend,
    schema: DatabaseSchema,
    config: OrmConfig,
) -> Harness {
    init_logging();
    let backend = Arc::new(backend);
    let transport = MemoryTransport::new();
    let (orm, report) = Orm::init(config, backend.clone(), Arc::new(transport.clone()), schema)
        .await
        .expect("init");
    Harness {
        orm,
        report,
        backend,
        transport,
    }
}

pub fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn event_name(table: &str, doc: &str, action: &str) -> String {
    format!("databases.main.collections.{table}.documents.{doc}.{action}")
}

/// Callback that forwards every delivery into a channel.
pub fn forwarder() -> (
    impl Fn(&DocumentEvent) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<DocumentEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |e: &DocumentEvent| {
            let _ = tx.send(e.clone());
        },
        rx,
    )
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<DocumentEvent>) -> DocumentEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .expect("channel closed")
}

/// Lets the bus task drain whatever is queued.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
