//! Shared helpers for schema reconciliation tests.

#![allow(dead_code)]

use std::sync::Arc;
use tablekit_client::MemoryBackend;
use tablekit_schema::PollPolicy;
use tablekit_types::{AttributeSpec, PermissionRule, TableId};

pub fn table() -> TableId {
    TableId::new("posts")
}

/// Memory backend holding `posts` with the given live attributes.
pub fn backend_with(attributes: Vec<AttributeSpec>) -> Arc<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend.seed_table(&table(), attributes, Vec::new());
    Arc::new(backend)
}

pub fn backend_with_permissions(rules: Vec<PermissionRule>) -> Arc<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend.seed_table(&table(), Vec::new(), rules);
    Arc::new(backend)
}

/// Ten checks, 100ms apart.
pub fn quick_poll() -> PollPolicy {
    PollPolicy {
        interval_ms: 100,
        timeout_ms: 1_000,
    }
}

pub fn post_schema() -> Vec<AttributeSpec> {
    vec![
        AttributeSpec::string("title", 255).required(),
        AttributeSpec::string("body", 10_000),
        AttributeSpec::integer("views").range(Some(0.0), None),
        AttributeSpec::enumeration("status", ["draft", "published"]),
    ]
}
