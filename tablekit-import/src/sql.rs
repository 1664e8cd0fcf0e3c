//! SQL dumps.
//!
//! Reads `INSERT INTO ... VALUES (...), (...);` statements as records and
//! `CREATE TABLE` statements as column declarations. Other statements are
//! skipped. Quoted values stay strings; bare values are typed like text
//! cells. When a `CREATE TABLE` declares a column, its values are coerced
//! toward that kind (`TINYINT(1)` 0/1 to booleans, timestamps to RFC 3339).

use crate::error::{ImportError, ImportResult};
use crate::infer::{coerce_to, infer_scalar};
use crate::source::{Record, RecordSource};
use regex_lite::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tablekit_types::AttributeSpec;
use tracing::debug;

pub struct SqlDumpSource {
    sql: String,
    table: Option<String>,
    tables: HashMap<String, Vec<AttributeSpec>>,
    insert_re: Regex,
}

impl SqlDumpSource {
    pub fn new(sql: impl Into<String>) -> ImportResult<Self> {
        let sql = sql.into();
        let create_re = Regex::new(
            r#"(?is)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?[`"\[]?(\w+)[`"\]]?\s*\((.*?)\)\s*[^,;()]*;"#,
        )
        .map_err(|e| ImportError::UnsupportedSource(format!("regex error: {e}")))?;
        let insert_re = Regex::new(
            r#"(?is)INSERT\s+INTO\s+[`"\[]?(\w+)[`"\]]?\s*(?:\(([^)]*)\))?\s*VALUES\s*"#,
        )
        .map_err(|e| ImportError::UnsupportedSource(format!("regex error: {e}")))?;

        let mut tables = HashMap::new();
        for cap in create_re.captures_iter(&sql) {
            let (Some(name), Some(body)) = (cap.get(1), cap.get(2)) else {
                continue;
            };
            let columns = parse_columns(body.as_str());
            debug!(table = name.as_str(), columns = columns.len(), "read CREATE TABLE");
            tables.insert(name.as_str().to_string(), columns);
        }

        Ok(Self {
            sql,
            table: None,
            tables,
            insert_re,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> ImportResult<Self> {
        Self::new(std::fs::read_to_string(path)?)
    }

    /// Restricts the source to one table of a multi-table dump.
    pub fn for_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Tables that have a `CREATE TABLE` statement in the dump.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    fn columns_of(&self, table: &str) -> Option<&Vec<AttributeSpec>> {
        self.tables.get(table)
    }
}

impl RecordSource for SqlDumpSource {
    fn records(&self) -> Box<dyn Iterator<Item = ImportResult<Record>> + Send + '_> {
        // Statement headers are located up front; their value tuples are
        // parsed only as the iterator reaches them.
        let statements: Vec<(Vec<String>, Option<&Vec<AttributeSpec>>, usize)> = self
            .insert_re
            .captures_iter(&self.sql)
            .filter_map(|cap| {
                let table = cap.get(1)?.as_str();
                if self.table.as_deref().is_some_and(|t| t != table) {
                    return None;
                }
                let declared = self.columns_of(table);
                let names: Vec<String> = match cap.get(2) {
                    Some(list) => list
                        .as_str()
                        .split(',')
                        .map(|c| unquote_ident(c.trim()))
                        .collect(),
                    None => declared
                        .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
                        .unwrap_or_default(),
                };
                Some((names, declared, cap.get(0)?.end()))
            })
            .collect();

        let mut index = 0usize;
        Box::new(
            statements
                .into_iter()
                .flat_map(move |(names, declared, offset)| {
                    parse_tuples(&self.sql[offset..])
                        .into_iter()
                        .map(|tuple| {
                            let i = index;
                            index += 1;
                            build_record(i, &names, declared, tuple)
                        })
                        .collect::<Vec<_>>()
                }),
        )
    }

    fn declared_schema(&self) -> Option<Vec<AttributeSpec>> {
        match &self.table {
            Some(table) => self.tables.get(table).cloned(),
            None if self.tables.len() == 1 => self.tables.values().next().cloned(),
            None => None,
        }
    }
}

fn build_record(
    index: usize,
    names: &[String],
    declared: Option<&Vec<AttributeSpec>>,
    tuple: Result<Vec<Value>, String>,
) -> ImportResult<Record> {
    let values = tuple.map_err(|reason| ImportError::parse(index, reason))?;
    let names: Vec<String> = if names.is_empty() {
        (1..=values.len()).map(|i| format!("column_{i}")).collect()
    } else {
        names.to_vec()
    };
    if values.len() != names.len() {
        return Err(ImportError::parse(
            index,
            format!("{} values for {} columns", values.len(), names.len()),
        ));
    }

    let mut record = Record::new();
    for (name, value) in names.into_iter().zip(values) {
        let value = match declared.and_then(|cols| cols.iter().find(|c| c.name == name)) {
            Some(spec) => coerce_to(spec, value),
            None => value,
        };
        record.insert(name, value);
    }
    Ok(record)
}

fn unquote_ident(s: &str) -> String {
    s.trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'))
        .to_string()
}

/// Splits on commas that are not nested in parentheses or quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_columns(body: &str) -> Vec<AttributeSpec> {
    let constraint = |w: &str| {
        matches!(
            w.to_ascii_uppercase().as_str(),
            "PRIMARY" | "CONSTRAINT" | "KEY" | "UNIQUE" | "INDEX" | "FOREIGN" | "CHECK" | "FULLTEXT"
        )
    };

    split_top_level(body)
        .into_iter()
        .filter_map(|def| {
            let def = def.trim();
            let mut words = def.split_whitespace();
            let name = words.next()?;
            if constraint(name) {
                return None;
            }
            let ty = words.next().unwrap_or("TEXT");
            let mut spec = column_spec(&unquote_ident(name), ty, def);
            let upper = def.to_ascii_uppercase();
            spec.required = upper.contains("NOT NULL") && !upper.contains("DEFAULT");
            Some(spec)
        })
        .collect()
}

fn column_spec(name: &str, ty: &str, def: &str) -> AttributeSpec {
    let upper = ty.to_ascii_uppercase();
    let (base, arg) = match upper.split_once('(') {
        Some((base, rest)) => (base.to_string(), rest.trim_end_matches(')').to_string()),
        None => (upper.clone(), String::new()),
    };

    match base.as_str() {
        "VARCHAR" | "CHAR" | "NVARCHAR" | "NCHAR" | "CHARACTER" => {
            AttributeSpec::string(name, arg.trim().parse().unwrap_or(255))
        }
        "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "CLOB" => AttributeSpec::string(name, 65_535),
        "TINYINT" if arg.trim() == "1" => AttributeSpec::boolean(name),
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL" => {
            AttributeSpec::integer(name)
        }
        "DOUBLE" | "FLOAT" | "REAL" | "DECIMAL" | "NUMERIC" => AttributeSpec::float(name),
        "BOOL" | "BOOLEAN" | "BIT" => AttributeSpec::boolean(name),
        "DATE" | "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" => AttributeSpec::datetime(name),
        "ENUM" => {
            let open = def.find('(').map(|i| i + 1).unwrap_or(0);
            let close = def.rfind(')').unwrap_or(def.len());
            let elements: Vec<String> = split_top_level(&def[open..close.max(open)])
                .into_iter()
                .map(|e| e.trim().trim_matches('\'').to_string())
                .filter(|e| !e.is_empty())
                .collect();
            AttributeSpec::enumeration(name, elements)
        }
        _ => AttributeSpec::string(name, 255),
    }
}

/// Parses `(v, v, ...), (v, ...)` up to the terminating `;`. Every
/// delimiter involved is ASCII, so scanning bytes keeps UTF-8 intact.
fn parse_tuples(s: &str) -> Vec<Result<Vec<Value>, String>> {
    let bytes = s.as_bytes();
    let mut tuples = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b';' => break,
            b'(' => {
                i += 1;
                let mut values = Vec::new();
                let mut closed = false;
                while i < bytes.len() {
                    i = skip_whitespace(bytes, i);
                    if i >= bytes.len() {
                        break;
                    }
                    if bytes[i] == b'\'' {
                        let (text, next) = read_quoted(bytes, i + 1);
                        values.push(Value::String(text));
                        i = next;
                    } else {
                        let start = i;
                        while i < bytes.len() && bytes[i] != b',' && bytes[i] != b')' {
                            i += 1;
                        }
                        values.push(infer_scalar(&String::from_utf8_lossy(&bytes[start..i])));
                    }
                    i = skip_whitespace(bytes, i);
                    match bytes.get(i) {
                        Some(b',') => i += 1,
                        Some(b')') => {
                            i += 1;
                            closed = true;
                            break;
                        }
                        _ => break,
                    }
                }
                if closed {
                    tuples.push(Ok(values));
                } else {
                    tuples.push(Err("unterminated value tuple".to_string()));
                    break;
                }
            }
            _ => i += 1,
        }
    }
    tuples
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Reads a single-quoted SQL string starting after the opening quote.
/// Handles `''` and backslash escapes. Returns the text and the index after
/// the closing quote.
fn read_quoted(bytes: &[u8], mut i: usize) -> (String, usize) {
    let mut out: Vec<u8> = Vec::new();
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                out.push(match bytes[i + 1] {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'r' => b'\r',
                    b'0' => 0,
                    other => other,
                });
                i += 2;
            }
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => {
                out.push(b'\'');
                i += 2;
            }
            b'\'' => return (String::from_utf8_lossy(&out).into_owned(), i + 1),
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    (String::from_utf8_lossy(&out).into_owned(), i)
}
