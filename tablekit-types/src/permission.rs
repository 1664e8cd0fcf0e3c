//! Role-based table permissions.
//!
//! On the wire a rule is rendered as `action("role")`, e.g. `read("any")`
//! or `update("team:editors")`.

use crate::error::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Create,
    Read,
    Update,
    Delete,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for PermissionAction {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(TypesError::InvalidPermission(other.to_string())),
        }
    }
}

/// A single grant of one action to one role on a table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionRule {
    pub role: String,
    pub action: PermissionAction,
}

impl PermissionRule {
    pub fn new(role: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            role: role.into(),
            action,
        }
    }

    /// Expands a `{role, actions}` declaration into one rule per action.
    pub fn for_actions(role: &str, actions: &[PermissionAction]) -> Vec<Self> {
        actions.iter().map(|a| Self::new(role, *a)).collect()
    }

    pub fn to_backend_string(&self) -> String {
        format!("{}(\"{}\")", self.action.as_str(), self.role)
    }

    pub fn parse(s: &str) -> TypesResult<Self> {
        let s = s.trim();
        let open = s
            .find('(')
            .ok_or_else(|| TypesError::InvalidPermission(s.to_string()))?;
        if !s.ends_with(')') {
            return Err(TypesError::InvalidPermission(s.to_string()));
        }
        let action: PermissionAction = s[..open]
            .parse()
            .map_err(|_| TypesError::InvalidPermission(s.to_string()))?;
        let role = s[open + 1..s.len() - 1].trim().trim_matches('"');
        if role.is_empty() {
            return Err(TypesError::InvalidPermission(s.to_string()));
        }
        Ok(Self::new(role, action))
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_backend_string())
    }
}
