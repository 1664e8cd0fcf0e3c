//! Migration executor.
//!
//! Attribute changes are not instantaneous on the backend: a freshly
//! created attribute reports `processing` until it has been provisioned and
//! cannot be queried before then. Every create and update is therefore
//! followed by a bounded readiness poll.
//!
//! Operations on different attributes run concurrently (up to
//! `max_concurrency` attribute groups at a time); operations on the same
//! attribute run in plan order. Deletes run last, one at a time, and only
//! once every create and update has completed.

use crate::error::{SchemaError, SchemaResult};
use crate::plan::{DiffOperation, MigrationPlan};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tablekit_client::{Backend, BackendError};
use tablekit_types::{AttributeStatus, TableId};
use tracing::{debug, info, warn};

/// Bounded readiness polling: check every `interval_ms`, give up after
/// `timeout_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            timeout_ms: 30_000,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Number of status checks before timing out (at least one).
    pub fn max_attempts(&self) -> u32 {
        let interval = self.interval_ms.max(1);
        (self.timeout_ms.div_ceil(interval)).max(1) as u32
    }
}

/// What a call to [`MigrationExecutor::apply`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// Operations skipped because an earlier run already applied them.
    pub skipped: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub struct MigrationExecutor {
    backend: Arc<dyn Backend>,
    poll: PollPolicy,
    max_concurrency: usize,
}

impl MigrationExecutor {
    pub fn new(backend: Arc<dyn Backend>, poll: PollPolicy) -> Self {
        Self {
            backend,
            poll,
            max_concurrency: 4,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Applies every pending operation of `plan`.
    ///
    /// On failure the operations that did complete stay marked in the plan,
    /// so calling `apply` again with the same plan only issues the rest.
    pub async fn apply(&self, plan: &mut MigrationPlan) -> SchemaResult<MigrationReport> {
        let table = plan.table().clone();
        let mut report = MigrationReport {
            skipped: plan.applied_count(),
            ..MigrationReport::default()
        };
        if plan.is_complete() {
            return Ok(report);
        }

        info!(
            table = %table,
            pending = plan.len() - plan.applied_count(),
            "applying migration plan"
        );

        // Group pending creates/updates by attribute, keeping plan order.
        let mut groups: Vec<Vec<(usize, DiffOperation)>> = Vec::new();
        let mut group_of: std::collections::HashMap<String, usize> = Default::default();
        for index in plan.pending() {
            let op = &plan.operations()[index];
            if op.is_delete() {
                continue;
            }
            let slot = *group_of.entry(op.name().to_string()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push((index, op.clone()));
        }

        let aborted = AtomicBool::new(false);
        let outcomes: Vec<Vec<(usize, SchemaResult<()>)>> = stream::iter(groups)
            .map(|group| self.run_group(&table, group, &aborted))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut first_error: Option<(usize, SchemaError)> = None;
        for (index, result) in outcomes.into_iter().flatten() {
            match result {
                Ok(()) => {
                    plan.mark_applied(index);
                    let op = &plan.operations()[index];
                    match op {
                        DiffOperation::Create(spec) => report.created.push(spec.name.clone()),
                        DiffOperation::Update { spec, .. } => report.updated.push(spec.name.clone()),
                        DiffOperation::Delete { .. } => {}
                    }
                }
                Err(e) => {
                    if first_error.as_ref().is_none_or(|(i, _)| index < *i) {
                        first_error = Some((index, e));
                    }
                }
            }
        }
        if let Some((index, e)) = first_error {
            warn!(
                table = %table,
                index,
                cursor = ?plan.cursor(),
                "migration aborted: {e}"
            );
            return Err(e);
        }

        for index in plan.pending() {
            let DiffOperation::Delete { name } = &plan.operations()[index] else {
                continue;
            };
            let name = name.clone();
            debug!(table = %table, attribute = %name, "deleting attribute");
            match self.backend.delete_attribute(&table, &name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(table = %table, attribute = %name, "attribute already gone");
                }
                Err(source) => {
                    warn!(table = %table, attribute = %name, "delete failed: {source}");
                    return Err(SchemaError::Backend {
                        table,
                        target: name,
                        source,
                    });
                }
            }
            plan.mark_applied(index);
            report.deleted.push(name);
        }

        info!(
            table = %table,
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            "migration plan applied"
        );
        Ok(report)
    }

    async fn run_group(
        &self,
        table: &TableId,
        group: Vec<(usize, DiffOperation)>,
        aborted: &AtomicBool,
    ) -> Vec<(usize, SchemaResult<()>)> {
        let mut results = Vec::with_capacity(group.len());
        for (index, op) in group {
            if aborted.load(Ordering::SeqCst) {
                break;
            }
            let result = self.apply_one(table, &op).await;
            let failed = result.is_err();
            results.push((index, result));
            if failed {
                aborted.store(true, Ordering::SeqCst);
                break;
            }
        }
        results
    }

    async fn apply_one(&self, table: &TableId, op: &DiffOperation) -> SchemaResult<()> {
        let name = op.name();
        let issued = match op {
            DiffOperation::Create(spec) => {
                debug!(table = %table, attribute = %name, kind = %spec.kind, "creating attribute");
                match self.backend.create_attribute(table, spec).await {
                    // Left over from an interrupted run, or an earlier
                    // attribute of the same name on its way out.
                    Err(e) if e.is_conflict() => {
                        debug!(table = %table, attribute = %name, "attribute exists, checking status");
                        match self.backend.get_attribute(table, name).await {
                            Ok(remote) if remote.status == AttributeStatus::Deleting => {
                                self.wait_until_gone(table, name).await?;
                                Some(self.backend.create_attribute(table, spec).await)
                            }
                            Err(e) if e.is_not_found() => {
                                Some(self.backend.create_attribute(table, spec).await)
                            }
                            other => Some(other),
                        }
                    }
                    other => Some(other),
                }
            }
            DiffOperation::Update { spec, .. } => {
                debug!(table = %table, attribute = %name, "updating attribute");
                Some(self.backend.update_attribute(table, spec).await)
            }
            DiffOperation::Delete { .. } => return Ok(()),
        };

        match issued {
            Some(Ok(remote)) if remote.status == AttributeStatus::Available => Ok(()),
            Some(Ok(remote)) if remote.status.is_failure() => Err(provisioning_failed(
                table,
                name,
                remote.error.unwrap_or_else(|| format!("status {:?}", remote.status)),
            )),
            Some(Err(e)) => Err(map_backend_error(table, name, e)),
            _ => self.wait_until_available(table, name).await,
        }
    }

    /// Polls an attribute until it is available, failed, or the policy's
    /// attempts run out.
    pub async fn wait_until_available(&self, table: &TableId, name: &str) -> SchemaResult<()> {
        let attempts = self.poll.max_attempts();
        for attempt in 1..=attempts {
            match self.backend.get_attribute(table, name).await {
                Ok(remote) => match remote.status {
                    AttributeStatus::Available => {
                        debug!(table = %table, attribute = %name, attempt, "attribute available");
                        return Ok(());
                    }
                    AttributeStatus::Failed | AttributeStatus::Stuck => {
                        warn!(table = %table, attribute = %name, "attribute provisioning failed");
                        return Err(provisioning_failed(
                            table,
                            name,
                            remote
                                .error
                                .unwrap_or_else(|| format!("status {:?}", remote.status)),
                        ));
                    }
                    AttributeStatus::Processing | AttributeStatus::Deleting => {}
                },
                // Eventual consistency: a just-created attribute may not be
                // listed yet.
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    return Err(SchemaError::Backend {
                        table: table.clone(),
                        target: name.to_string(),
                        source,
                    });
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.poll.interval()).await;
            }
        }

        warn!(table = %table, attribute = %name, "attribute provisioning timed out");
        Err(SchemaError::ProvisioningTimeout {
            table: table.clone(),
            attribute: name.to_string(),
            waited: self.poll.timeout(),
        })
    }

    /// Polls until a deleting attribute has disappeared, so its name can be
    /// reused.
    pub async fn wait_until_gone(&self, table: &TableId, name: &str) -> SchemaResult<()> {
        debug!(table = %table, attribute = %name, "waiting for previous attribute to be deleted");
        let attempts = self.poll.max_attempts();
        for attempt in 1..=attempts {
            match self.backend.get_attribute(table, name).await {
                Err(e) if e.is_not_found() => {
                    debug!(table = %table, attribute = %name, attempt, "attribute gone");
                    return Ok(());
                }
                Err(source) => {
                    return Err(SchemaError::Backend {
                        table: table.clone(),
                        target: name.to_string(),
                        source,
                    });
                }
                Ok(_) => {}
            }
            if attempt < attempts {
                tokio::time::sleep(self.poll.interval()).await;
            }
        }

        warn!(table = %table, attribute = %name, "attribute deletion timed out");
        Err(SchemaError::ProvisioningTimeout {
            table: table.clone(),
            attribute: name.to_string(),
            waited: self.poll.timeout(),
        })
    }
}

fn provisioning_failed(table: &TableId, name: &str, reason: String) -> SchemaError {
    SchemaError::AttributeProvisioningFailed {
        table: table.clone(),
        attribute: name.to_string(),
        reason,
    }
}

/// Rejections of the request itself count as provisioning failures;
/// transport and server errors stay backend errors.
fn map_backend_error(table: &TableId, name: &str, e: BackendError) -> SchemaError {
    match e {
        BackendError::Validation(reason) | BackendError::Conflict(reason) => {
            provisioning_failed(table, name, reason)
        }
        source => SchemaError::Backend {
            table: table.clone(),
            target: name.to_string(),
            source,
        },
    }
}
