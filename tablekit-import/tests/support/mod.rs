#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use tablekit_import::{Record, RecordSink};

/// Sink that rejects records whose `n` field is in `reject` and remembers
/// every batch it was handed.
#[derive(Default)]
pub struct RecordingSink {
    pub reject: HashSet<i64>,
    pub batches: Mutex<Vec<Vec<Record>>>,
    /// Drop the last result of each batch, as a misbehaving bulk API might.
    pub short_results: bool,
}

impl RecordingSink {
    pub fn rejecting(values: &[i64]) -> Self {
        Self {
            reject: values.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect()
    }

    pub fn created(&self) -> Vec<i64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter_map(|r| r.get("n").and_then(Value::as_i64))
            .filter(|n| !self.reject.contains(n))
            .collect()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn create_batch(&self, records: Vec<Record>) -> Vec<Result<(), String>> {
        let mut results: Vec<Result<(), String>> = records
            .iter()
            .map(|r| match r.get("n").and_then(Value::as_i64) {
                Some(n) if self.reject.contains(&n) => Err(format!("record {n} is invalid")),
                _ => Ok(()),
            })
            .collect();
        if self.short_results {
            results.pop();
        }
        self.batches.lock().unwrap().push(records);
        results
    }
}

pub fn numbered(count: i64) -> Vec<Result<Record, String>> {
    (0..count)
        .map(|n| {
            let mut record = Record::new();
            record.insert("n".into(), json!(n));
            record.insert("title".into(), json!(format!("row {n}")));
            Ok(record)
        })
        .collect()
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}
