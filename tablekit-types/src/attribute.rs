//! Attribute declarations and the backend's view of them.

use crate::error::{TypesError, TypesResult};
use crate::ids::TableId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Value kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Integer,
    Float,
    Boolean,
    Enum,
    Datetime,
    Relationship,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Enum => "enum",
            Self::Datetime => "datetime",
            Self::Relationship => "relationship",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "float" | "double" => Ok(Self::Float),
            "boolean" | "bool" => Ok(Self::Boolean),
            "enum" => Ok(Self::Enum),
            "datetime" => Ok(Self::Datetime),
            "relationship" => Ok(Self::Relationship),
            other => Err(TypesError::UnknownKind(other.to_string())),
        }
    }
}

/// A declared attribute. Identity is `name` within its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Maximum length for string attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values for enum attributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_table: Option<TableId>,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            array: false,
            default: None,
            size: None,
            min: None,
            max: None,
            elements: Vec::new(),
            related_table: None,
        }
    }

    pub fn string(name: impl Into<String>, size: u32) -> Self {
        Self::new(name, AttributeKind::String).size(size)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Datetime)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = Self::new(name, AttributeKind::Enum);
        spec.elements = elements.into_iter().map(Into::into).collect();
        spec
    }

    pub fn relationship(name: impl Into<String>, related: impl Into<TableId>) -> Self {
        let mut spec = Self::new(name, AttributeKind::Relationship);
        spec.related_table = Some(related.into());
        spec
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Checks a single field value against this declaration.
    ///
    /// `null` is accepted for optional attributes only.
    pub fn validate_value(&self, value: &Value) -> TypesResult<()> {
        if value.is_null() {
            if self.required {
                return Err(self.invalid("must not be null"));
            }
            return Ok(());
        }

        if self.array {
            let items = value
                .as_array()
                .ok_or_else(|| self.invalid("expected an array"))?;
            for item in items {
                self.validate_scalar(item)?;
            }
            Ok(())
        } else {
            self.validate_scalar(value)
        }
    }

    fn validate_scalar(&self, value: &Value) -> TypesResult<()> {
        match self.kind {
            AttributeKind::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.invalid("expected a string"))?;
                if let Some(size) = self.size {
                    if s.chars().count() > size as usize {
                        return Err(self.invalid(&format!("longer than {size} characters")));
                    }
                }
                Ok(())
            }
            AttributeKind::Integer => {
                if !(value.is_i64() || value.is_u64()) {
                    return Err(self.invalid("expected an integer"));
                }
                self.check_range(value.as_f64().unwrap_or_default())
            }
            AttributeKind::Float => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| self.invalid("expected a number"))?;
                self.check_range(n)
            }
            AttributeKind::Boolean => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(self.invalid("expected a boolean"))
                }
            }
            AttributeKind::Enum => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.invalid("expected an enum string"))?;
                if self.elements.iter().any(|e| e == s) {
                    Ok(())
                } else {
                    Err(self.invalid(&format!("'{s}' is not one of {:?}", self.elements)))
                }
            }
            AttributeKind::Datetime => {
                let s = value
                    .as_str()
                    .ok_or_else(|| self.invalid("expected a datetime string"))?;
                if is_datetime(s) {
                    Ok(())
                } else {
                    Err(self.invalid(&format!("'{s}' is not a valid datetime")))
                }
            }
            AttributeKind::Relationship => match value {
                Value::String(_) => Ok(()),
                Value::Object(map) if map.contains_key("$id") => Ok(()),
                _ => Err(self.invalid("expected a document id or document")),
            },
        }
    }

    fn check_range(&self, n: f64) -> TypesResult<()> {
        if let Some(min) = self.min {
            if n < min {
                return Err(self.invalid(&format!("{n} is below minimum {min}")));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(self.invalid(&format!("{n} is above maximum {max}")));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> TypesError {
        TypesError::InvalidValue {
            attribute: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Returns true if `s` parses as an RFC 3339 timestamp or a naive
/// `YYYY-MM-DD[THH:MM:SS[.fff]]` value.
pub fn is_datetime(s: &str) -> bool {
    if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
        return true;
    }
    if chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
    {
        return true;
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Validates a document body against a table's declared attributes.
///
/// With `partial` set (updates), missing required attributes are allowed.
/// Keys starting with `$` are backend metadata and are ignored.
pub fn validate_record(
    specs: &[AttributeSpec],
    data: &Map<String, Value>,
    partial: bool,
) -> TypesResult<()> {
    for (key, value) in data {
        if key.starts_with('$') {
            continue;
        }
        let spec = specs
            .iter()
            .find(|s| &s.name == key)
            .ok_or_else(|| TypesError::UnknownAttribute(key.clone()))?;
        spec.validate_value(value)?;
    }

    if !partial {
        for spec in specs.iter().filter(|s| s.required) {
            match data.get(&spec.name) {
                Some(v) if !v.is_null() => {}
                _ => return Err(TypesError::MissingRequired(spec.name.clone())),
            }
        }
    }
    Ok(())
}

/// Provisioning state of an attribute as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeStatus {
    Available,
    Processing,
    Deleting,
    Stuck,
    Failed,
}

impl AttributeStatus {
    /// Maps a backend status string. Unknown values are treated as still
    /// processing so the poller keeps waiting rather than guessing.
    pub fn from_backend(s: &str) -> Self {
        match s {
            "available" => Self::Available,
            "deleting" => Self::Deleting,
            "stuck" => Self::Stuck,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Stuck)
    }
}

/// An attribute as it currently exists on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAttribute {
    pub spec: AttributeSpec,
    pub status: AttributeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteAttribute {
    pub fn available(spec: AttributeSpec) -> Self {
        Self {
            spec,
            status: AttributeStatus::Available,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> AttributeKind {
        self.spec.kind
    }
}
