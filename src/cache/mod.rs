//! Result cache: recently computed quantities keyed by variable name and
//! context fingerprint.
//!
//! The cache enforces two budgets after every insertion: a resident-byte
//! budget and an entry-count budget, both by least-recently-used eviction.
//! Lookup is blind on the variable name; the caller decides whether a
//! stored entry is semantically valid for the live context by testing its
//! [`Fingerprint`] (the pipeline uses exact-subset matching).
//!
//! A disabled variant always misses and ignores insertions, so the
//! resolution pipeline runs one code path whether or not caching is on.

use std::sync::Arc;

use lru::LruCache;

use crate::QuantArray;
use crate::context::Fingerprint;

/// Hit/miss/eviction counters, reported by [`ResultCache::stats`].
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Lookups that returned a valid entry
    pub hits: u64,
    /// Lookups that found no valid entry
    pub misses: u64,
    /// Successful insertions
    pub insertions: u64,
    /// Entries dropped to satisfy a budget
    pub evictions: u64,
    /// Insertions rejected because the entry alone exceeded the byte budget
    pub rejected: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VarKey {
    var: String,
    fp: Fingerprint,
}

struct CachedQuant {
    value: Arc<QuantArray>,
    nbytes: usize,
}

/// LRU cache of computed quantities with byte and count budgets.
pub struct LruResultCache {
    entries: LruCache<VarKey, CachedQuant>,
    max_bytes: usize,
    max_entries: usize,
    total_bytes: usize,
    stats: CacheStats,
}

impl LruResultCache {
    fn new(max_bytes: usize, max_entries: usize) -> Self {
        LruResultCache {
            entries: LruCache::unbounded(),
            max_bytes,
            max_entries,
            total_bytes: 0,
            stats: CacheStats::default(),
        }
    }

    fn get_where(
        &mut self,
        var: &str,
        valid: impl Fn(&Fingerprint) -> bool,
    ) -> Option<Arc<QuantArray>> {
        // iter() walks most- to least-recently-used; the first valid entry
        // under this name wins and is promoted.
        let found = self
            .entries
            .iter()
            .find(|(key, _)| key.var == var && valid(&key.fp))
            .map(|(key, _)| key.clone());
        match found {
            Some(key) => {
                self.stats.hits += 1;
                self.entries.get(&key).map(|e| e.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn put(&mut self, var: &str, fp: Fingerprint, value: Arc<QuantArray>) {
        let nbytes = value.len() * std::mem::size_of::<f64>();
        if nbytes > self.max_bytes {
            log::debug!(
                "not caching '{var}': {nbytes} bytes exceeds the whole budget of {} bytes",
                self.max_bytes
            );
            self.stats.rejected += 1;
            return;
        }
        let key = VarKey {
            var: var.to_string(),
            fp,
        };
        if let Some(old) = self.entries.put(key, CachedQuant { value, nbytes }) {
            self.total_bytes -= old.nbytes;
        }
        self.total_bytes += nbytes;
        self.stats.insertions += 1;
        while self.total_bytes > self.max_bytes || self.entries.len() > self.max_entries {
            match self.entries.pop_lru() {
                Some((dropped, entry)) => {
                    self.total_bytes -= entry.nbytes;
                    self.stats.evictions += 1;
                    log::debug!("evicted cached '{}' ({} bytes)", dropped.var, entry.nbytes);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

/// Cache of computed quantities, or a no-op stand-in when caching is off.
pub enum ResultCache {
    /// Live LRU cache.
    Enabled(LruResultCache),
    /// Always misses; insertions are dropped.
    Disabled,
}

impl ResultCache {
    /// Create an enabled cache with a byte budget given in MB and an
    /// entry-count budget.
    pub fn new(max_mb: f64, max_entries: usize) -> Self {
        let max_bytes = (max_mb * 1024.0 * 1024.0) as usize;
        ResultCache::Enabled(LruResultCache::new(max_bytes, max_entries))
    }

    /// Create the no-op variant.
    pub fn disabled() -> Self {
        ResultCache::Disabled
    }

    /// Whether this is the no-op variant.
    pub fn is_disabled(&self) -> bool {
        matches!(self, ResultCache::Disabled)
    }

    /// Blind lookup under `var`: returns the most-recently-used entry whose
    /// stored fingerprint satisfies `valid`, promoting it. The validity
    /// predicate is the caller's; the cache itself never interprets
    /// fingerprints.
    pub fn get_where(
        &mut self,
        var: &str,
        valid: impl Fn(&Fingerprint) -> bool,
    ) -> Option<Arc<QuantArray>> {
        match self {
            ResultCache::Enabled(c) => c.get_where(var, valid),
            ResultCache::Disabled => None,
        }
    }

    /// Insert (or overwrite) an entry, then evict least-recently-used
    /// entries until both budgets hold. An entry alone larger than the
    /// byte budget is rejected outright.
    pub fn put(&mut self, var: &str, fp: Fingerprint, value: Arc<QuantArray>) {
        if let ResultCache::Enabled(c) = self {
            c.put(var, fp, value);
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        if let ResultCache::Enabled(c) = self {
            c.clear();
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        match self {
            ResultCache::Enabled(c) => c.entries.len(),
            ResultCache::Disabled => 0,
        }
    }

    /// Whether no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes held by resident entries.
    pub fn resident_bytes(&self) -> usize {
        match self {
            ResultCache::Enabled(c) => c.total_bytes,
            ResultCache::Disabled => 0,
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        match self {
            ResultCache::Enabled(c) => c.stats.clone(),
            ResultCache::Disabled => CacheStats::default(),
        }
    }
}
