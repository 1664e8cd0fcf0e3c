//! The cache store.
//!
//! Two std mutexes, never held across an await. `state` owns the entries,
//! the per-table generations and the counters. `inflight` maps each
//! fingerprint that is currently being fetched to a watch slot the fetching
//! caller publishes its result into, so concurrent misses on one
//! fingerprint share a single fetch (and its error) while unrelated
//! fingerprints proceed freely.

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tablekit_types::{Document, DocumentId, DocumentList, TableId};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// A cached read result.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Document(Document),
    List(DocumentList),
}

impl CacheValue {
    /// Whether the snapshot includes the given document.
    pub fn contains(&self, id: &DocumentId) -> bool {
        match self {
            Self::Document(doc) => &doc.id == id,
            Self::List(list) => list.contains(id),
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::List(_) => None,
        }
    }

    pub fn into_list(self) -> Option<DocumentList> {
        match self {
            Self::List(list) => Some(list),
            Self::Document(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend fetches issued through `get_or_fetch`.
    pub fetches: u64,
    /// Entries removed by invalidation (not by expiry).
    pub invalidations: u64,
}

struct CacheEntry {
    value: CacheValue,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<Fingerprint, CacheEntry>,
    generations: HashMap<TableId, u64>,
    /// Bumped by `clear`, which invalidates every table at once.
    epoch: u64,
    stats: CacheStats,
}

impl State {
    fn generation(&self, table: &TableId) -> u64 {
        self.epoch + self.generations.get(table).copied().unwrap_or(0)
    }

    fn bump(&mut self, table: &TableId) {
        *self.generations.entry(table.clone()).or_insert(0) += 1;
    }

    fn lookup(&mut self, fp: &Fingerprint) -> Option<CacheValue> {
        let now = Instant::now();
        match self.entries.get(fp) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(fp);
                None
            }
            None => None,
        }
    }
}

/// Where an in-flight fetch publishes its outcome.
type FetchSlot<E> = watch::Sender<Option<Result<CacheValue, E>>>;

type ErasedSlot = Arc<dyn Any + Send + Sync>;

enum Join<E> {
    Lead(Arc<FetchSlot<E>>),
    Follow(watch::Receiver<Option<Result<CacheValue, E>>>),
    /// Another caller is fetching this fingerprint with a different error
    /// type; fetch independently.
    Unshared,
}

/// Unregisters the leader's slot when its fetch ends or is dropped.
struct FlightGuard<'a> {
    store: &'a CacheStore,
    fp: &'a Fingerprint,
    slot: ErasedSlot,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.store.inflight();
        if inflight
            .get(self.fp)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            inflight.remove(self.fp);
        }
    }
}

pub struct CacheStore {
    state: Mutex<State>,
    inflight: Mutex<HashMap<Fingerprint, ErasedSlot>>,
    default_ttl: Duration,
}

impl CacheStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            inflight: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the cached value if present and younger than its TTL.
    pub fn get(&self, fp: &Fingerprint) -> Option<CacheValue> {
        let mut state = self.lock();
        let found = state.lookup(fp);
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    /// Stores or overwrites an entry. `None` uses the store's default TTL.
    pub fn set(&self, fp: Fingerprint, value: CacheValue, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.lock().entries.insert(fp, entry);
    }

    /// Drops every entry for `table`. Returns the number removed.
    pub fn invalidate_table(&self, table: &TableId) -> usize {
        let mut state = self.lock();
        state.bump(table);
        let before = state.entries.len();
        state.entries.retain(|fp, _| fp.table() != table);
        let removed = before - state.entries.len();
        state.stats.invalidations += removed as u64;
        if removed > 0 {
            debug!(table = %table, removed, "invalidated table cache");
        }
        removed
    }

    /// Drops only the entries of `table` whose snapshot includes `id`.
    pub fn invalidate_document(&self, table: &TableId, id: &DocumentId) -> usize {
        let mut state = self.lock();
        state.bump(table);
        let before = state.entries.len();
        state
            .entries
            .retain(|fp, entry| fp.table() != table || !entry.value.contains(id));
        let removed = before - state.entries.len();
        state.stats.invalidations += removed as u64;
        if removed > 0 {
            debug!(table = %table, document = %id, removed, "invalidated document cache");
        }
        removed
    }

    /// Returns the cached value or runs `fetch` to produce it.
    ///
    /// At most one fetch per fingerprint is in flight. Concurrent callers
    /// wait for it and receive its outcome, error included. If the fetching
    /// caller is dropped before finishing, a waiter takes over. A result
    /// whose table was invalidated while the fetch ran is returned but not
    /// cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        fp: &Fingerprint,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<CacheValue, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let slot = loop {
            if let Some(value) = self.get(fp) {
                return Ok(value);
            }
            match self.join_flight::<E>(fp) {
                Join::Lead(slot) => break Some(slot),
                Join::Unshared => break None,
                Join::Follow(mut rx) => {
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|done| (*done).clone());
                    if let Some(result) = outcome {
                        return result;
                    }
                    debug!(fingerprint = %fp, "in-flight fetch abandoned, retrying");
                }
            }
        };

        let Some(slot) = slot else {
            return self.fetch_and_store(fp, ttl, fetch).await;
        };
        let _flight = FlightGuard {
            store: self,
            fp,
            slot: slot.clone(),
        };
        let cached = self.lock().lookup(fp);
        let result = match cached {
            Some(value) => Ok(value),
            None => self.fetch_and_store(fp, ttl, fetch).await,
        };
        slot.send_replace(Some(result.clone()));
        result
    }

    async fn fetch_and_store<F, Fut, E>(
        &self,
        fp: &Fingerprint,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<CacheValue, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, E>>,
    {
        let generation = {
            let mut state = self.lock();
            state.stats.fetches += 1;
            state.generation(fp.table())
        };
        debug!(fingerprint = %fp, "cache miss, fetching");
        let result = fetch().await;
        if let Ok(value) = &result {
            self.store_fetched(fp, generation, ttl, value);
        }
        result
    }

    fn store_fetched(
        &self,
        fp: &Fingerprint,
        generation: u64,
        ttl: Option<Duration>,
        value: &CacheValue,
    ) {
        let mut state = self.lock();
        if state.generation(fp.table()) != generation {
            debug!(fingerprint = %fp, "table invalidated during fetch, not caching");
            return;
        }
        state.entries.insert(
            fp.clone(),
            CacheEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<Fingerprint, ErasedSlot>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribes to the fingerprint's running fetch, or registers the
    /// caller as the one to run it.
    fn join_flight<E>(&self, fp: &Fingerprint) -> Join<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let mut inflight = self.inflight();
        if let Some(existing) = inflight.get(fp) {
            return match existing.downcast_ref::<FetchSlot<E>>() {
                Some(slot) => Join::Follow(slot.subscribe()),
                None => Join::Unshared,
            };
        }
        let slot: Arc<FetchSlot<E>> = Arc::new(watch::channel(None).0);
        inflight.insert(fp.clone(), slot.clone());
        Join::Lead(slot)
    }

    /// Removes expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_fresh(now));
        before - state.entries.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
