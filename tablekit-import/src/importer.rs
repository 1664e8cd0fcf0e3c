//! Batched import.

use crate::source::{Record, RecordSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where imported records go. Implementations create one document per
/// record and report each record's outcome in input order.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn create_batch(&self, records: Vec<Record>) -> Vec<Result<(), String>>;
}

#[async_trait]
impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    async fn create_batch(&self, records: Vec<Record>) -> Vec<Result<(), String>> {
        (**self).create_batch(records).await
    }
}

/// One record that was not imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// Position in the source, 0-based.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: usize,
    pub failed: usize,
    pub failures: Vec<ImportFailure>,
    pub batches: usize,
}

impl ImportSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    fn fail(&mut self, index: usize, reason: String) {
        self.failed += 1;
        self.failures.push(ImportFailure { index, reason });
    }
}

pub struct SourceImporter<S> {
    sink: S,
    batch_size: usize,
}

impl<S: RecordSink> SourceImporter<S> {
    pub const MIN_BATCH: usize = 25;
    pub const MAX_BATCH: usize = 100;
    pub const DEFAULT_BATCH: usize = 50;

    /// `batch_size` is clamped to `MIN_BATCH..=MAX_BATCH`.
    pub fn new(sink: S, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.clamp(Self::MIN_BATCH, Self::MAX_BATCH),
        }
    }

    pub fn with_default_batch(sink: S) -> Self {
        Self::new(sink, Self::DEFAULT_BATCH)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn import(&self, source: &dyn RecordSource) -> ImportSummary {
        self.import_records(source.records().map(|r| r.map_err(|e| e.to_string())))
            .await
    }

    /// Imports already-parsed records. Items that are `Err` count as
    /// failures at their position without reaching the sink.
    pub async fn import_records<I>(&self, records: I) -> ImportSummary
    where
        I: IntoIterator<Item = Result<Record, String>>,
    {
        let mut summary = ImportSummary::default();
        let mut batch: Vec<(usize, Record)> = Vec::with_capacity(self.batch_size);

        for (index, record) in records.into_iter().enumerate() {
            match record {
                Ok(record) => batch.push((index, record)),
                Err(reason) => {
                    warn!(index, "skipping unparseable record: {reason}");
                    summary.fail(index, reason);
                }
            }
            if batch.len() == self.batch_size {
                self.flush(&mut batch, &mut summary).await;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &mut summary).await;
        }

        summary.failures.sort_by_key(|f| f.index);
        info!(
            created = summary.created,
            failed = summary.failed,
            batches = summary.batches,
            "import finished"
        );
        summary
    }

    async fn flush(&self, batch: &mut Vec<(usize, Record)>, summary: &mut ImportSummary) {
        let (indices, records): (Vec<usize>, Vec<Record>) = batch.drain(..).unzip();
        let first = indices.first().copied().unwrap_or_default();
        debug!(first, size = indices.len(), "sending import batch");

        let results = self.sink.create_batch(records).await;
        summary.batches += 1;

        let mut batch_failures = 0;
        for (pos, index) in indices.iter().enumerate() {
            match results.get(pos) {
                Some(Ok(())) => summary.created += 1,
                Some(Err(reason)) => {
                    batch_failures += 1;
                    summary.fail(*index, reason.clone());
                }
                None => {
                    batch_failures += 1;
                    summary.fail(*index, "no result reported for record".to_string());
                }
            }
        }
        if batch_failures > 0 {
            warn!(
                first,
                failed = batch_failures,
                size = indices.len(),
                "import batch had failures"
            );
        }
    }
}
