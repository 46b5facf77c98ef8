use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::dedup::DedupCache;
use super::error::CacheError;

/// Writes between two sweeps of expired entries.
pub const DEFAULT_SWEEP_EVERY: usize = 1024;

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    /// A TTL too large to represent as an `Instant` means no expiry.
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    available: AtomicBool,
    writes: AtomicUsize,
    sweep_every: AtomicUsize,
}

/// In-memory [`DedupCache`] with lazy TTL expiry.
///
/// Expired entries read as absent. They are dropped on the next write to
/// them, by a sweep that runs every [`DEFAULT_SWEEP_EVERY`] writes, or all at
/// once with [`purge_expired`](Self::purge_expired). Cloning creates another
/// handle to the same cache.
#[derive(Clone)]
pub struct InMemoryDedupCache {
    inner: Arc<Inner>,
}

impl Default for InMemoryDedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDedupCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
                writes: AtomicUsize::new(0),
                sweep_every: AtomicUsize::new(DEFAULT_SWEEP_EVERY),
            }),
        }
    }

    /// Sweep expired entries every `writes` writes (at least 1).
    pub fn with_sweep_every(self, writes: usize) -> Self {
        self.inner.sweep_every.store(writes.max(1), Ordering::SeqCst);
        self
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Remaining time to live of a live key. `None` if absent or without TTL.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.inner.entries.read().ok()?;
        let now = Instant::now();
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .read()
            .map(|entries| entries.values().filter(|entry| entry.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.inner.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| entry.is_live(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory cache switched off".into()))
        }
    }

    fn raw_len(&self) -> usize {
        self.inner.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Count one write and sweep if it is due. Called with the write lock held.
    fn note_write(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let every = self.inner.sweep_every.load(Ordering::Relaxed);
        let writes = self.inner.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % every == 0 {
            entries.retain(|_, entry| entry.is_live(now));
        }
    }

    fn live(&self, key: &str) -> Result<Option<Entry>, CacheError> {
        self.ensure_available()?;
        let entries = self
            .inner
            .entries
            .read()
            .map_err(|_| CacheError::LockPoisoned("read"))?;
        let now = Instant::now();
        Ok(entries.get(key).filter(|entry| entry.is_live(now)).cloned())
    }
}

impl DedupCache for InMemoryDedupCache {
    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key)?.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live(key)?.map(|entry| entry.value))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_available()?;
        let entry = Entry::new(value, ttl);
        let mut entries = self
            .inner
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("set"))?;
        entries.insert(key.to_string(), entry);
        self.note_write(&mut entries, Instant::now());
        Ok(())
    }

    fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.ensure_available()?;
        let fresh = Entry::new("1", None);
        let mut entries = self
            .inner
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("incr"))?;
        let now = Instant::now();
        match entries.get_mut(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => {
                let current: i64 = entry
                    .value
                    .trim()
                    .parse()
                    .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| CacheError::NotAnInteger(key.to_string()))?;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(key.to_string(), fresh);
                self.note_write(&mut entries, now);
                Ok(1)
            }
        }
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let entry = Entry::new(value, ttl);
        let mut entries = self
            .inner
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("set_if_absent"))?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), entry);
        self.note_write(&mut entries, now);
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let mut entries = self
            .inner
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("delete"))?;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }
}
