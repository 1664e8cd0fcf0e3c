//! Permission reconciler.
//!
//! Declared and live rules are compared as sets. Removals are applied
//! before additions, so replacing a role's grants never leaves the role
//! with both the old and new set at once. A rejected rule is recorded and
//! the remaining rules are still applied.

use crate::error::{SchemaError, SchemaResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use tablekit_client::Backend;
use tablekit_types::{PermissionRule, TableId};
use thiserror::Error;
use tracing::{debug, warn};

/// Rules to revoke and to grant, in deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPlan {
    pub remove: Vec<PermissionRule>,
    pub add: Vec<PermissionRule>,
}

impl PermissionPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

pub fn plan_permissions(declared: &[PermissionRule], live: &[PermissionRule]) -> PermissionPlan {
    let declared: BTreeSet<&PermissionRule> = declared.iter().collect();
    let live: BTreeSet<&PermissionRule> = live.iter().collect();
    PermissionPlan {
        remove: live.difference(&declared).map(|r| (*r).clone()).collect(),
        add: declared.difference(&live).map(|r| (*r).clone()).collect(),
    }
}

/// A single rule the backend refused to apply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{table}: could not {verb} {rule}: {reason}")]
pub struct PermissionApplyError {
    pub table: TableId,
    pub rule: PermissionRule,
    pub verb: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionReport {
    pub added: Vec<PermissionRule>,
    pub removed: Vec<PermissionRule>,
    pub failures: Vec<PermissionApplyError>,
}

impl PermissionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failures.is_empty()
    }
}

pub struct PermissionReconciler {
    backend: Arc<dyn Backend>,
}

impl PermissionReconciler {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Reads the table's live rules and applies the difference. Fails only
    /// if the live rules cannot be read; per-rule failures go in the report.
    pub async fn reconcile(
        &self,
        table: &TableId,
        declared: &[PermissionRule],
    ) -> SchemaResult<PermissionReport> {
        let live = self
            .backend
            .list_permissions(table)
            .await
            .map_err(|source| SchemaError::Backend {
                table: table.clone(),
                target: "permissions".to_string(),
                source,
            })?;
        Ok(self.apply(table, plan_permissions(declared, &live)).await)
    }

    pub async fn apply(&self, table: &TableId, plan: PermissionPlan) -> PermissionReport {
        let mut report = PermissionReport::default();
        if plan.is_empty() {
            debug!(table = %table, "permissions already converged");
            return report;
        }

        for rule in plan.remove {
            match self.backend.revoke_permission(table, &rule).await {
                Ok(()) => report.removed.push(rule),
                Err(e) => {
                    warn!(table = %table, rule = %rule, "revoke failed: {e}");
                    report.failures.push(PermissionApplyError {
                        table: table.clone(),
                        rule,
                        verb: "revoke",
                        reason: e.to_string(),
                    });
                }
            }
        }
        for rule in plan.add {
            match self.backend.grant_permission(table, &rule).await {
                Ok(()) => report.added.push(rule),
                Err(e) => {
                    warn!(table = %table, rule = %rule, "grant failed: {e}");
                    report.failures.push(PermissionApplyError {
                        table: table.clone(),
                        rule,
                        verb: "grant",
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}
