//! Schema reconciliation engine.
//!
//! Brings a remote table's attributes and permissions in line with a
//! declared schema:
//! - [`diff_attributes`] compares declared and live attributes into a
//!   [`MigrationPlan`] (creates, then updates, then deletes)
//! - [`MigrationExecutor`] applies a plan, polling each created or updated
//!   attribute until the backend reports it available
//! - [`PermissionReconciler`] diffs and applies table permission rules
//!
//! Reconciliation is idempotent: diffing against a converged remote yields
//! an empty plan and no network writes.

pub mod diff;
pub mod error;
pub mod executor;
pub mod permissions;
pub mod plan;

pub use diff::{diff_attributes, AttributeChange};
pub use error::{SchemaError, SchemaResult};
pub use executor::{MigrationExecutor, MigrationReport, PollPolicy};
pub use permissions::{
    plan_permissions, PermissionApplyError, PermissionPlan, PermissionReconciler,
    PermissionReport,
};
pub use plan::{DiffOperation, MigrationPlan};
