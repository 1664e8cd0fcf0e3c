//! Scalar and schema inference.

use crate::source::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};
use tablekit_types::{AttributeKind, AttributeSpec};

/// Parses an untyped text cell into the narrowest JSON scalar.
///
/// Empty cells are `null`. Numbers with leading zeros (`007`, postal codes)
/// stay strings.
pub fn infer_scalar(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if s.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    let digits = s.strip_prefix('-').unwrap_or(s);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if !leading_zero {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
            if s.chars().all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
                return Value::Number(n);
            }
        }
    }
    Value::String(s.to_string())
}

/// Rewrites a timestamp into RFC 3339 UTC. Accepts RFC 3339, naive
/// `YYYY-MM-DD HH:MM:SS[.f]` / `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC) and
/// bare dates. Returns `None` for anything else.
pub fn normalize_datetime(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    let naive = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(
        naive
            .and_utc()
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

#[derive(Default)]
struct FieldStats {
    name: String,
    non_null: usize,
    array: bool,
    ints: usize,
    floats: usize,
    bools: usize,
    datetimes: usize,
    strings: usize,
    max_len: usize,
}

impl FieldStats {
    fn observe(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                self.array = true;
                self.non_null += 1;
                for item in items {
                    self.observe_scalar(item);
                }
            }
            other => {
                self.non_null += 1;
                self.observe_scalar(other);
            }
        }
    }

    fn observe_scalar(&mut self, value: &Value) {
        match value {
            Value::Bool(_) => self.bools += 1,
            Value::Number(n) if n.is_i64() || n.is_u64() => self.ints += 1,
            Value::Number(_) => self.floats += 1,
            Value::String(s) => {
                if normalize_datetime(s).is_some() {
                    self.datetimes += 1;
                } else {
                    self.strings += 1;
                }
                self.max_len = self.max_len.max(s.chars().count());
            }
            Value::Null => {}
            // Nested objects are stored as their JSON text.
            other => {
                self.strings += 1;
                self.max_len = self.max_len.max(other.to_string().len());
            }
        }
    }

    fn into_spec(self, total: usize) -> AttributeSpec {
        let observed = self.ints + self.floats + self.bools + self.datetimes + self.strings;
        let only = |n: usize| n > 0 && n == observed;

        let mut spec = if only(self.bools) {
            AttributeSpec::boolean(&self.name)
        } else if only(self.ints) {
            AttributeSpec::integer(&self.name)
        } else if self.floats > 0 && self.ints + self.floats == observed {
            AttributeSpec::float(&self.name)
        } else if only(self.datetimes) {
            AttributeSpec::datetime(&self.name)
        } else {
            AttributeSpec::string(&self.name, string_size(self.max_len))
        };
        spec.required = total > 0 && self.non_null == total && !self.array;
        spec.array = self.array;
        spec
    }
}

/// Smallest power of two that fits, never below 255.
fn string_size(max_len: usize) -> u32 {
    let size = max_len.max(1).next_power_of_two().max(255);
    u32::try_from(size).unwrap_or(u32::MAX)
}

/// Derives one attribute per field seen in `records`, in first-seen order.
///
/// A field is required only if every record has a non-null value for it.
/// Mixed integer and float values widen to float; any other mix falls back
/// to string.
pub fn infer_schema(records: &[Record]) -> Vec<AttributeSpec> {
    let mut fields: Vec<FieldStats> = Vec::new();
    for record in records {
        for (key, value) in record {
            if key.starts_with('$') {
                continue;
            }
            let slot = match fields.iter().position(|f| &f.name == key) {
                Some(i) => i,
                None => {
                    fields.push(FieldStats {
                        name: key.clone(),
                        ..FieldStats::default()
                    });
                    fields.len() - 1
                }
            };
            fields[slot].observe(value);
        }
    }
    fields
        .into_iter()
        .map(|f| f.into_spec(records.len()))
        .collect()
}

/// Coerces a parsed value toward a declared kind where the conversion is
/// unambiguous: datetimes to RFC 3339, `0`/`1` to booleans, scalars to
/// their text for string columns.
pub fn coerce_to(spec: &AttributeSpec, value: Value) -> Value {
    match (spec.kind, value) {
        (AttributeKind::Datetime, Value::String(s)) => {
            Value::String(normalize_datetime(&s).unwrap_or(s))
        }
        (AttributeKind::Boolean, Value::Number(n)) => {
            match n.as_i64() {
                Some(0) => Value::Bool(false),
                Some(1) => Value::Bool(true),
                _ => Value::Number(n),
            }
        }
        (AttributeKind::String, v @ (Value::Number(_) | Value::Bool(_))) => {
            Value::String(v.to_string())
        }
        (_, v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars() {
        assert_eq!(infer_scalar(""), Value::Null);
        assert_eq!(infer_scalar("42"), json!(42));
        assert_eq!(infer_scalar("-3.5"), json!(-3.5));
        assert_eq!(infer_scalar("TRUE"), json!(true));
        assert_eq!(infer_scalar("007"), json!("007"));
        assert_eq!(infer_scalar("0.25"), json!(0.25));
        assert_eq!(infer_scalar("inf"), json!("inf"));
        assert_eq!(infer_scalar(" hello "), json!("hello"));
    }

    #[test]
    fn datetimes_normalize_to_utc() {
        assert_eq!(
            normalize_datetime("2024-03-01 12:30:00").as_deref(),
            Some("2024-03-01T12:30:00.000Z")
        );
        assert_eq!(
            normalize_datetime("2024-03-01T14:30:00+02:00").as_deref(),
            Some("2024-03-01T12:30:00.000Z")
        );
        assert_eq!(
            normalize_datetime("2024-03-01").as_deref(),
            Some("2024-03-01T00:00:00.000Z")
        );
        assert_eq!(normalize_datetime("March 1st"), None);
    }

    #[test]
    fn string_sizes_round_up() {
        assert_eq!(string_size(0), 255);
        assert_eq!(string_size(300), 512);
    }
}
