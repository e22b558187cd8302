//! Bounded, expire-after-write cache shared by the context, replay and
//! uniqueness stores.
//!
//! - Size bound: least-recently-used entry goes first.
//! - TTL: measured from the last write, never extended by reads. Checked
//!   lazily on access; [`ExpiringCache::cleanup`] sweeps on demand.
//! - Removal listener: receives ownership of every removed value together
//!   with its [`RemovalCause`]. It runs after the internal lock is released.
//!
//! Every operation takes one short critical section, so `get`, `insert`,
//! `insert_unless` and `invalidate` are atomic per key.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::SharedClock;

// ---------------------------------------------------------------------------
// Removal causes and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Pushed out by the size bound.
    Size,
    /// TTL elapsed since the last write.
    Expired,
    /// Invalidated or cleared by a caller.
    Explicit,
    /// Overwritten by a newer value under the same key.
    Replaced,
}

impl RemovalCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size-eviction",
            Self::Expired => "expired",
            Self::Explicit => "explicit",
            Self::Replaced => "replaced",
        }
    }

    /// Removed by the cache itself rather than by a caller.
    pub fn was_evicted(&self) -> bool {
        matches!(self, Self::Size | Self::Expired)
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub size: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

pub type RemovalListener<K, V> = Box<dyn Fn(K, V, RemovalCause) + Send + Sync>;

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct Entry<V> {
    value: V,
    written_at: DateTime<Utc>,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct ExpiringCache<K: Hash + Eq, V> {
    name: &'static str,
    ttl: Duration,
    clock: SharedClock,
    inner: Mutex<Inner<K, V>>,
    listener: Option<RemovalListener<K, V>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, max_size: usize, ttl: Duration, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            clock,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            listener: None,
        }
    }

    pub fn with_removal_listener(
        mut self,
        listener: impl Fn(K, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, written_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - written_at).to_std() {
            Ok(age) => age >= self.ttl,
            // written in the future relative to `now`: clock stepped back
            Err(_) => false,
        }
    }

    fn notify(&self, removed: Vec<(K, V, RemovalCause)>) {
        match &self.listener {
            Some(listener) => {
                for (key, value, cause) in removed {
                    listener(key, value, cause);
                }
            }
            None => drop(removed),
        }
    }

    /// Live value for `key`. An expired entry is removed and reported.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let mut removed = Vec::new();
        let found = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let live = inner
                .entries
                .peek(key)
                .map(|e| !self.is_expired(e.written_at, now));
            match live {
                Some(true) => {
                    inner.hits += 1;
                    inner.entries.get(key).map(|e| e.value.clone())
                }
                Some(false) => {
                    inner.misses += 1;
                    if let Some((k, e)) = inner.entries.pop_entry(key) {
                        inner.evictions += 1;
                        removed.push((k, e.value, RemovalCause::Expired));
                    }
                    None
                }
                None => {
                    inner.misses += 1;
                    None
                }
            }
        };
        self.notify(removed);
        found
    }

    /// Store `value`, replacing any previous entry for `key`.
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut removed = Vec::new();
        {
            let mut guard = self.inner.lock();
            self.store(&mut guard, key, value, now, &mut removed);
        }
        self.notify(removed);
    }

    /// Store `value` unless a live entry exists for which `conflicts`
    /// returns true; in that case nothing is written and the existing value
    /// is returned. The check and the write happen under one lock. A
    /// conflict counts as a hit, an admitted write as a miss.
    pub fn insert_unless<F>(&self, key: K, value: V, conflicts: F) -> Result<(), V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.admit(key, value, conflicts, true)
    }

    /// [`insert_unless`](Self::insert_unless) for callers that already
    /// recorded the lookup through [`get`](Self::get). Leaves hit and miss
    /// counters alone.
    pub fn write_unless<F>(&self, key: K, value: V, conflicts: F) -> Result<(), V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.admit(key, value, conflicts, false)
    }

    fn admit<F>(&self, key: K, value: V, conflicts: F, counted: bool) -> Result<(), V>
    where
        F: FnOnce(&V) -> bool,
    {
        let now = self.clock.now();
        let mut removed = Vec::new();
        let outcome = {
            let mut guard = self.inner.lock();
            let existing = guard
                .entries
                .peek(&key)
                .filter(|e| !self.is_expired(e.written_at, now))
                .map(|e| e.value.clone());
            match existing {
                Some(current) if conflicts(&current) => {
                    if counted {
                        guard.hits += 1;
                    }
                    Err(current)
                }
                _ => {
                    if counted {
                        guard.misses += 1;
                    }
                    self.store(&mut guard, key, value, now, &mut removed);
                    Ok(())
                }
            }
        };
        self.notify(removed);
        outcome
    }

    fn store(
        &self,
        inner: &mut Inner<K, V>,
        key: K,
        value: V,
        now: DateTime<Utc>,
        removed: &mut Vec<(K, V, RemovalCause)>,
    ) {
        // pop first so `push` only ever returns a size eviction
        if let Some((k, old)) = inner.entries.pop_entry(&key) {
            let cause = if self.is_expired(old.written_at, now) {
                inner.evictions += 1;
                RemovalCause::Expired
            } else {
                RemovalCause::Replaced
            };
            removed.push((k, old.value, cause));
        }
        let entry = Entry {
            value,
            written_at: now,
        };
        if let Some((k, evicted)) = inner.entries.push(key, entry) {
            inner.evictions += 1;
            removed.push((k, evicted.value, RemovalCause::Size));
        }
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let popped = self.inner.lock().entries.pop_entry(key);
        match popped {
            Some((k, e)) => {
                self.notify(vec![(k, e.value, RemovalCause::Explicit)]);
                true
            }
            None => false,
        }
    }

    /// Remove everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut removed = Vec::new();
        {
            let mut inner = self.inner.lock();
            while let Some((k, e)) = inner.entries.pop_lru() {
                removed.push((k, e.value, RemovalCause::Explicit));
            }
        }
        let count = removed.len();
        self.notify(removed);
        count
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut removed = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let stale: Vec<K> = inner
                .entries
                .iter()
                .filter(|(_, e)| self.is_expired(e.written_at, now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                if let Some((k, e)) = inner.entries.pop_entry(&key) {
                    inner.evictions += 1;
                    removed.push((k, e.value, RemovalCause::Expired));
                }
            }
        }
        let count = removed.len();
        self.notify(removed);
        count
    }

    /// Entry count, including entries that expired but were not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            name: self.name,
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            ttl_secs: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            evictions: inner.evictions,
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for ExpiringCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
