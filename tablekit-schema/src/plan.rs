//! Migration plans.
//!
//! A plan is the ordered operation list for one table plus a record of
//! which operations have been applied, so a run that fails part-way can be
//! retried without re-issuing finished work.

use crate::diff::AttributeChange;
use std::collections::HashMap;
use tablekit_types::{AttributeSpec, TableId};

/// A single schema change on one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOperation {
    Create(AttributeSpec),
    /// `changes` is empty when the update came from merging a create and a
    /// delete of the same name, i.e. the full declaration is re-applied.
    Update {
        spec: AttributeSpec,
        changes: Vec<AttributeChange>,
    },
    Delete {
        name: String,
    },
}

impl DiffOperation {
    pub fn name(&self) -> &str {
        match self {
            Self::Create(spec) | Self::Update { spec, .. } => &spec.name,
            Self::Delete { name } => name,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Create(_) => 0,
            Self::Update { .. } => 1,
            Self::Delete { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    table: TableId,
    operations: Vec<DiffOperation>,
    applied: Vec<bool>,
}

impl MigrationPlan {
    /// Builds a plan, merging any create/delete pair on the same name into
    /// one update and ordering creates before updates before deletes.
    pub fn new(table: TableId, operations: Vec<DiffOperation>) -> Self {
        let mut operations = coalesce(operations);
        operations.sort_by_key(DiffOperation::rank);
        let applied = vec![false; operations.len()];
        Self {
            table,
            operations,
            applied,
        }
    }

    pub fn empty(table: TableId) -> Self {
        Self::new(table, Vec::new())
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    pub fn operations(&self) -> &[DiffOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Index of the last operation in the fully-applied prefix, or `None`
    /// when operation 0 has not been applied yet.
    pub fn cursor(&self) -> Option<usize> {
        self.applied.iter().take_while(|done| **done).count().checked_sub(1)
    }

    pub fn is_applied(&self, index: usize) -> bool {
        self.applied.get(index).copied().unwrap_or(false)
    }

    pub fn mark_applied(&mut self, index: usize) {
        if let Some(slot) = self.applied.get_mut(index) {
            *slot = true;
        }
    }

    /// Indices still to apply, in plan order.
    pub fn pending(&self) -> Vec<usize> {
        self.applied
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.iter().filter(|done| **done).count()
    }

    pub fn is_complete(&self) -> bool {
        self.applied.iter().all(|done| *done)
    }
}

fn coalesce(operations: Vec<DiffOperation>) -> Vec<DiffOperation> {
    let mut creates: HashMap<String, usize> = HashMap::new();
    let mut deletes: HashMap<String, usize> = HashMap::new();
    for (i, op) in operations.iter().enumerate() {
        match op {
            DiffOperation::Create(spec) => {
                creates.insert(spec.name.clone(), i);
            }
            DiffOperation::Delete { name } => {
                deletes.insert(name.clone(), i);
            }
            DiffOperation::Update { .. } => {}
        }
    }

    let dropped: Vec<usize> = creates
        .keys()
        .filter_map(|name| deletes.get(name).copied())
        .collect();
    if dropped.is_empty() {
        return operations;
    }

    operations
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, op)| match op {
            DiffOperation::Create(spec) if deletes.contains_key(&spec.name) => {
                DiffOperation::Update {
                    spec,
                    changes: Vec::new(),
                }
            }
            other => other,
        })
        .collect()
}
