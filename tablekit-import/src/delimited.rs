//! Delimited text (CSV, TSV and friends).
//!
//! Parsing is done by the `csv` crate in flexible mode. The first non-blank
//! row is the header; short rows are padded with nulls and long rows are
//! per-record errors. Cells are typed with [`infer_scalar`].

use crate::error::{ImportError, ImportResult};
use crate::infer::infer_scalar;
use crate::source::{Record, RecordSource};
use std::path::Path;

pub struct DelimitedSource {
    text: String,
    delimiter: u8,
}

impl DelimitedSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delimiter: b',',
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> ImportResult<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    /// Non-ASCII delimiters are not supported and leave the comma in place.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        if let Ok(d) = u8::try_from(delimiter) {
            self.delimiter = d;
        }
        self
    }

    /// Column names from the header row, made unique.
    pub fn headers(&self) -> Vec<String> {
        match self.rows().next() {
            Some(Ok(cells)) => header_names(cells),
            _ => Vec::new(),
        }
    }

    /// Raw cells per row. Blank rows are skipped; rows may differ in length.
    fn rows(&self) -> impl Iterator<Item = Result<Vec<String>, csv::Error>> + Send + '_ {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(self.text.as_bytes())
            .into_records()
            .map(|row| row.map(|record| record.iter().map(str::to_string).collect::<Vec<_>>()))
            .filter(|row| !matches!(row, Ok(cells) if cells.iter().all(|c| c.trim().is_empty())))
    }
}

fn header_names(cells: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(cells.len());
    for (i, cell) in cells.into_iter().enumerate() {
        let base = match cell.trim() {
            "" => format!("column_{}", i + 1),
            name => name.to_string(),
        };
        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        names.push(name);
    }
    names
}

impl RecordSource for DelimitedSource {
    fn records(&self) -> Box<dyn Iterator<Item = ImportResult<Record>> + Send + '_> {
        let mut rows = self.rows();
        let headers = match rows.next() {
            Some(Ok(cells)) => header_names(cells),
            Some(Err(e)) => {
                return Box::new(std::iter::once(Err(ImportError::parse(0, e.to_string()))));
            }
            None => return Box::new(std::iter::empty()),
        };

        Box::new(rows.enumerate().map(move |(index, row)| {
            let cells = row.map_err(|e| ImportError::parse(index, e.to_string()))?;
            if cells.len() > headers.len() {
                return Err(ImportError::parse(
                    index,
                    format!("{} fields, header has {}", cells.len(), headers.len()),
                ));
            }
            let mut record = Record::new();
            for (i, name) in headers.iter().enumerate() {
                let value = cells
                    .get(i)
                    .map(|c| infer_scalar(c))
                    .unwrap_or(serde_json::Value::Null);
                record.insert(name.clone(), value);
            }
            Ok(record)
        }))
    }
}
