//! Attribute differ.

use crate::error::{SchemaError, SchemaResult};
use crate::plan::{DiffOperation, MigrationPlan};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tablekit_types::{AttributeKind, AttributeSpec, AttributeStatus, RemoteAttribute, TableId};

/// One field that differs between a declared and a live attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeChange {
    Required { from: bool, to: bool },
    Array { from: bool, to: bool },
    Default { from: Option<Value>, to: Option<Value> },
    Size { from: Option<u32>, to: Option<u32> },
    Min { from: Option<f64>, to: Option<f64> },
    Max { from: Option<f64>, to: Option<f64> },
    Elements { from: Vec<String>, to: Vec<String> },
}

/// Compares declared attributes with the table's live attributes.
///
/// Names only declared (or live but being deleted) become creates, names
/// only live become deletes, and names on both sides with differing
/// constraints become updates. A kind change cannot be applied in place and
/// is reported as [`SchemaError::SchemaConflict`].
pub fn diff_attributes(
    table: &TableId,
    declared: &[AttributeSpec],
    remote: &[RemoteAttribute],
) -> SchemaResult<MigrationPlan> {
    let mut seen = BTreeSet::new();
    for spec in declared {
        if !seen.insert(spec.name.as_str()) {
            return Err(SchemaError::DuplicateAttribute {
                table: table.clone(),
                attribute: spec.name.clone(),
            });
        }
    }

    let live: HashMap<&str, &RemoteAttribute> = remote.iter().map(|r| (r.name(), r)).collect();
    let mut operations = Vec::new();

    for spec in declared {
        let Some(current) = live.get(spec.name.as_str()) else {
            operations.push(DiffOperation::Create(spec.clone()));
            continue;
        };
        // The live attribute is going away; the executor waits for it and
        // creates the declared one in its place.
        if current.status == AttributeStatus::Deleting {
            operations.push(DiffOperation::Create(spec.clone()));
            continue;
        }

        if current.status.is_failure() {
            return Err(conflict(
                table,
                spec,
                format!(
                    "live attribute is {:?}{}; remove it before redeclaring",
                    current.status,
                    current
                        .error
                        .as_deref()
                        .map(|e| format!(" ({e})"))
                        .unwrap_or_default()
                ),
            ));
        }
        if current.kind() != spec.kind {
            return Err(conflict(
                table,
                spec,
                format!("kind change {} -> {} is not supported", current.kind(), spec.kind),
            ));
        }
        if spec.kind == AttributeKind::Relationship
            && spec.related_table.is_some()
            && current.spec.related_table != spec.related_table
        {
            return Err(conflict(
                table,
                spec,
                "relationship target cannot be changed".to_string(),
            ));
        }

        let changes = compare_specs(spec, &current.spec);
        if !changes.is_empty() {
            operations.push(DiffOperation::Update {
                spec: spec.clone(),
                changes,
            });
        }
    }

    for attr in remote {
        if seen.contains(attr.name()) || attr.status == AttributeStatus::Deleting {
            continue;
        }
        operations.push(DiffOperation::Delete {
            name: attr.name().to_string(),
        });
    }

    Ok(MigrationPlan::new(table.clone(), operations))
}

fn conflict(table: &TableId, spec: &AttributeSpec, reason: String) -> SchemaError {
    SchemaError::SchemaConflict {
        table: table.clone(),
        attribute: spec.name.clone(),
        reason,
    }
}

/// Lists the fields that differ. Size and range are compared only when the
/// declaration sets them, since the backend fills in its own bounds.
fn compare_specs(declared: &AttributeSpec, live: &AttributeSpec) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    if declared.required != live.required {
        changes.push(AttributeChange::Required {
            from: live.required,
            to: declared.required,
        });
    }
    if declared.array != live.array {
        changes.push(AttributeChange::Array {
            from: live.array,
            to: declared.array,
        });
    }
    if !defaults_equal(declared.default.as_ref(), live.default.as_ref()) {
        changes.push(AttributeChange::Default {
            from: live.default.clone(),
            to: declared.default.clone(),
        });
    }
    if declared.size.is_some() && declared.size != live.size {
        changes.push(AttributeChange::Size {
            from: live.size,
            to: declared.size,
        });
    }
    if declared.min.is_some() && declared.min != live.min {
        changes.push(AttributeChange::Min {
            from: live.min,
            to: declared.min,
        });
    }
    if declared.max.is_some() && declared.max != live.max {
        changes.push(AttributeChange::Max {
            from: live.max,
            to: declared.max,
        });
    }
    if declared.kind == AttributeKind::Enum {
        let want: BTreeSet<&String> = declared.elements.iter().collect();
        let have: BTreeSet<&String> = live.elements.iter().collect();
        if want != have {
            changes.push(AttributeChange::Elements {
                from: live.elements.clone(),
                to: declared.elements.clone(),
            });
        }
    }

    changes
}

/// `None` and `null` are the same default; numbers compare by value so a
/// float default of `0` matches a live `0.0`.
fn defaults_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => true,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_treat_null_as_absent() {
        assert!(defaults_equal(None, Some(&Value::Null)));
        assert!(defaults_equal(Some(&json!(0)), Some(&json!(0.0))));
        assert!(!defaults_equal(Some(&json!("a")), None));
    }

    #[test]
    fn unset_size_is_not_compared() {
        let declared = AttributeSpec::new("n", AttributeKind::Integer);
        let live = AttributeSpec::integer("n").range(Some(i64::MIN as f64), Some(i64::MAX as f64));
        assert!(compare_specs(&declared, &live).is_empty());
    }

    #[test]
    fn enum_elements_compare_as_sets() {
        let declared = AttributeSpec::enumeration("s", ["b", "a"]);
        let live = AttributeSpec::enumeration("s", ["a", "b"]);
        assert!(compare_specs(&declared, &live).is_empty());
    }
}
