//! Query clauses understood by the document listing endpoint.

use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Equal(String, Vec<Value>),
    NotEqual(String, Vec<Value>),
    LessThan(String, Value),
    LessThanEqual(String, Value),
    GreaterThan(String, Value),
    GreaterThanEqual(String, Value),
    Search(String, String),
    Contains(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    Select(Vec<String>),
    OrderAsc(String),
    OrderDesc(String),
    Limit(u32),
    Offset(u32),
    CursorAfter(String),
    CursorBefore(String),
}

impl Query {
    pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::Equal(attribute.to_string(), vec![value.into()])
    }

    /// Filters can be applied in any order without changing the result;
    /// ordering, paging and projection clauses cannot be reordered.
    pub fn is_filter(&self) -> bool {
        !matches!(
            self,
            Self::Select(_)
                | Self::OrderAsc(_)
                | Self::OrderDesc(_)
                | Self::Limit(_)
                | Self::Offset(_)
                | Self::CursorAfter(_)
                | Self::CursorBefore(_)
        )
    }

    pub fn to_json(&self) -> Value {
        let (method, attribute, values): (&str, Option<&str>, Vec<Value>) = match self {
            Self::Equal(a, v) => ("equal", Some(a.as_str()), v.clone()),
            Self::NotEqual(a, v) => ("notEqual", Some(a.as_str()), v.clone()),
            Self::LessThan(a, v) => ("lessThan", Some(a.as_str()), vec![v.clone()]),
            Self::LessThanEqual(a, v) => ("lessThanEqual", Some(a.as_str()), vec![v.clone()]),
            Self::GreaterThan(a, v) => ("greaterThan", Some(a.as_str()), vec![v.clone()]),
            Self::GreaterThanEqual(a, v) => ("greaterThanEqual", Some(a.as_str()), vec![v.clone()]),
            Self::Search(a, s) => ("search", Some(a.as_str()), vec![Value::from(s.clone())]),
            Self::Contains(a, v) => ("contains", Some(a.as_str()), v.clone()),
            Self::IsNull(a) => ("isNull", Some(a.as_str()), Vec::new()),
            Self::IsNotNull(a) => ("isNotNull", Some(a.as_str()), Vec::new()),
            Self::Select(attrs) => ("select", None, attrs.iter().cloned().map(Value::from).collect()),
            Self::OrderAsc(a) => ("orderAsc", Some(a.as_str()), Vec::new()),
            Self::OrderDesc(a) => ("orderDesc", Some(a.as_str()), Vec::new()),
            Self::Limit(n) => ("limit", None, vec![Value::from(*n)]),
            Self::Offset(n) => ("offset", None, vec![Value::from(*n)]),
            Self::CursorAfter(id) => ("cursorAfter", None, vec![Value::from(id.clone())]),
            Self::CursorBefore(id) => ("cursorBefore", None, vec![Value::from(id.clone())]),
        };

        let mut obj = json!({ "method": method });
        if let Some(attribute) = attribute {
            obj["attribute"] = Value::from(attribute);
        }
        if !values.is_empty() {
            obj["values"] = Value::from(values);
        }
        obj
    }

    /// Wire form sent as a `queries[]` parameter.
    pub fn to_backend_string(&self) -> String {
        self.to_json().to_string()
    }
}
