//! Cache keys.

use sha2::{Digest, Sha256};
use std::fmt;
use tablekit_types::{DocumentId, Query, TableId};

/// Stable key derived from a table and a read's parameters.
///
/// Filters are order-insensitive (`a = 1 AND b = 2` is the same read as
/// `b = 2 AND a = 1`), so they are sorted before hashing. Ordering, paging,
/// cursor and projection clauses keep their relative order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    table: TableId,
    digest: String,
}

impl Fingerprint {
    pub fn for_query(table: &TableId, queries: &[Query]) -> Self {
        let mut filters: Vec<String> = queries
            .iter()
            .filter(|q| q.is_filter())
            .map(Query::to_backend_string)
            .collect();
        filters.sort();
        filters.dedup();

        let positional = queries
            .iter()
            .filter(|q| !q.is_filter())
            .map(Query::to_backend_string);

        let mut key = format!("list\n{table}");
        for part in filters.into_iter().chain(positional) {
            key.push('\n');
            key.push_str(&part);
        }
        Self::hashed(table, &key)
    }

    pub fn for_document(table: &TableId, id: &DocumentId) -> Self {
        Self::hashed(table, &format!("doc\n{table}\n{id}"))
    }

    fn hashed(table: &TableId, key: &str) -> Self {
        Self {
            table: table.clone(),
            digest: hex::encode(Sha256::digest(key.as_bytes())),
        }
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, &self.digest[..12])
    }
}
