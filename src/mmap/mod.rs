//! Memmap pool: a bounded set of open memory-mapped file regions.
//!
//! Mappings are keyed by (path, offset, shape, element type, mode).
//! Repeated acquires with an equal key return a view over the same
//! underlying mapping and mark it most-recently-used; entries beyond the
//! configured capacity are evicted in LRU order, and a bulk invalidation
//! drops everything (invoked on snapshot change unless mappings are
//! configured to persist).
//!
//! Mapping offsets need not be page-aligned: the pool maps from the
//! containing page boundary and remembers the in-page delta.

mod fdlimit;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;
use memmap2::{Mmap, MmapMut, MmapOptions};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use smallvec::SmallVec;

use crate::QuantArray;
use crate::error::{QuantError, Result};

/// Element type of an on-disk array region (little-endian).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    /// 32-bit IEEE float
    F32,
    /// 64-bit IEEE float
    F64,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

/// Mapping mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapMode {
    /// Read-only mapping
    Read,
    /// Read-write mapping
    ReadWrite,
}

/// Identity of a mapped file region.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MmapKey {
    /// Absolute file path
    pub path: PathBuf,
    /// Byte offset of the region within the file
    pub offset: u64,
    /// Array shape of the region
    pub shape: SmallVec<[usize; 4]>,
    /// Element type
    pub dtype: Dtype,
    /// Mapping mode
    pub mode: MapMode,
}

impl MmapKey {
    /// Total size of the region in bytes.
    pub fn nbytes(&self) -> usize {
        self.shape.iter().product::<usize>() * self.dtype.size()
    }
}

#[derive(Debug)]
enum Backing {
    Ro(Mmap),
    Rw(MmapMut),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Ro(m) => m,
            Backing::Rw(m) => m,
        }
    }
}

/// One live OS-backed mapping, exclusively owned by the pool. Callers hold
/// a transient shared view for the duration of a resolution call; the pool
/// alone controls entry lifetime through eviction.
#[derive(Debug)]
pub struct MappedRegion {
    backing: Backing,
    delta: usize,
    nbytes: usize,
    shape: SmallVec<[usize; 4]>,
    dtype: Dtype,
}

impl MappedRegion {
    /// Raw bytes of the region.
    pub fn bytes(&self) -> &[u8] {
        &self.backing.bytes()[self.delta..self.delta + self.nbytes]
    }

    /// Array shape of the region.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Decode the region into an owned array. Data is stored column-major
    /// (first axis fastest) and widens losslessly to f64.
    pub fn to_array(&self) -> Result<QuantArray> {
        let bytes = self.bytes();
        let data: Vec<f64> = match self.dtype {
            Dtype::F32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            Dtype::F64 => bytes
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
        };
        let arr = ArrayD::from_shape_vec(IxDyn(&self.shape).f(), data)?;
        Ok(arr)
    }
}

/// Pool capacity policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MmapCapacity {
    /// No pooling: every acquire opens and the mapping is dropped with the
    /// returned view. Safe but slow.
    Disabled,
    /// Keep up to this many most-recently-used mappings open.
    Bounded(usize),
    /// Never evict. Every handle is still tracked for bulk invalidation,
    /// and fd exhaustion triggers one attempt to raise the process limit.
    Unbounded,
}

/// Open/hit/eviction counters, reported by [`MmapPool::stats`].
#[derive(Clone, Debug, Default)]
pub struct MmapPoolStats {
    /// Mappings opened (pool misses and untracked opens)
    pub opens: u64,
    /// Acquires served from a live entry
    pub hits: u64,
    /// Entries dropped to satisfy the capacity bound
    pub evictions: u64,
    /// Bulk invalidations performed
    pub invalidations: u64,
}

/// LRU pool of open memory-mapped file regions.
pub struct MmapPool {
    capacity: MmapCapacity,
    entries: LruCache<MmapKey, Arc<MappedRegion>>,
    stats: MmapPoolStats,
}

impl MmapPool {
    /// Create a pool with the given capacity policy.
    pub fn new(capacity: MmapCapacity) -> Self {
        MmapPool {
            capacity,
            entries: LruCache::unbounded(),
            stats: MmapPoolStats::default(),
        }
    }

    /// The configured capacity policy.
    pub fn capacity(&self) -> MmapCapacity {
        self.capacity
    }

    /// Acquire a mapping for `key`, reusing a live entry when one exists.
    ///
    /// With `track = false` (or a `Disabled` pool) the mapping is opened
    /// unmanaged: it never enters the pool and closes when the returned
    /// view drops. File-open failures propagate unchanged.
    pub fn acquire(&mut self, key: &MmapKey, track: bool) -> Result<Arc<MappedRegion>> {
        if !track || self.capacity == MmapCapacity::Disabled {
            self.stats.opens += 1;
            return Ok(Arc::new(open_region(key)?));
        }
        if let Some(region) = self.entries.get(key) {
            self.stats.hits += 1;
            return Ok(region.clone());
        }
        let region = Arc::new(self.open_tracked(key)?);
        self.stats.opens += 1;
        self.entries.put(key.clone(), region.clone());
        if let MmapCapacity::Bounded(max) = self.capacity {
            while self.entries.len() > max.max(1) {
                if let Some((dropped, _)) = self.entries.pop_lru() {
                    self.stats.evictions += 1;
                    log::debug!("evicted mapping of '{}'", dropped.path.display());
                }
            }
        }
        Ok(region)
    }

    /// Close and drop every entry.
    pub fn invalidate_all(&mut self) {
        let n = self.entries.len();
        self.entries.clear();
        self.stats.invalidations += 1;
        if n > 0 {
            log::debug!("dropped {n} pooled mappings");
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> MmapPoolStats {
        self.stats.clone()
    }

    fn open_tracked(&mut self, key: &MmapKey) -> Result<MappedRegion> {
        match open_region(key) {
            Ok(region) => Ok(region),
            Err(QuantError::FileAccess { path, source })
                if self.capacity == MmapCapacity::Unbounded
                    && fdlimit::is_fd_exhausted(&source) =>
            {
                // one retry after raising the soft limit; a second
                // exhaustion is fatal
                fdlimit::raise_nofile_limit()?;
                match open_region(key) {
                    Ok(region) => Ok(region),
                    Err(QuantError::FileAccess { source, .. })
                        if fdlimit::is_fd_exhausted(&source) =>
                    {
                        Err(QuantError::ResourceExhausted(format!(
                            "open-file limit reached while mapping '{}'",
                            path.display()
                        )))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn open_region(key: &MmapKey) -> Result<MappedRegion> {
    let file_access = |source: std::io::Error| QuantError::FileAccess {
        path: key.path.clone(),
        source,
    };
    let writable = key.mode == MapMode::ReadWrite;
    let file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(&key.path)
        .map_err(file_access)?;

    // map from the containing page boundary; the requested offset need not
    // be page-aligned
    let page = fdlimit::page_size();
    let aligned = key.offset - (key.offset % page);
    let delta = (key.offset - aligned) as usize;
    let len = delta + key.nbytes();

    let mut opts = MmapOptions::new();
    opts.offset(aligned).len(len);
    // SAFETY: the mapping is private to this process and read through
    // immutable views only; files are snapshot outputs not mutated while
    // mapped.
    let backing = unsafe {
        if writable {
            Backing::Rw(opts.map_mut(&file).map_err(file_access)?)
        } else {
            Backing::Ro(opts.map(&file).map_err(file_access)?)
        }
    };
    Ok(MappedRegion {
        backing,
        delta,
        nbytes: key.nbytes(),
        shape: key.shape.clone(),
        dtype: key.dtype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::io::Write;

    fn write_f32_file(dir: &tempfile::TempDir, name: &str, values: &[f32]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for v in values {
            f.write_all(&v.to_le_bytes()).unwrap();
        }
        path
    }

    fn key(path: PathBuf, offset: u64, n: usize) -> MmapKey {
        MmapKey {
            path,
            offset,
            shape: smallvec![n],
            dtype: Dtype::F32,
            mode: MapMode::Read,
        }
    }

    #[test]
    fn same_key_reuses_one_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_f32_file(&dir, "a.snap", &[1.0, 2.0, 3.0, 4.0]);
        let mut pool = MmapPool::new(MmapCapacity::Bounded(4));

        let k = key(path, 0, 4);
        let first = pool.acquire(&k, true).unwrap();
        let second = pool.acquire(&k, true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats().opens, 1);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn capacity_plus_one_evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = MmapPool::new(MmapCapacity::Bounded(2));
        let keys: Vec<MmapKey> = (0..3)
            .map(|i| {
                let path = write_f32_file(&dir, &format!("f{i}.snap"), &[i as f32; 4]);
                key(path, 0, 4)
            })
            .collect();

        pool.acquire(&keys[0], true).unwrap();
        pool.acquire(&keys[1], true).unwrap();
        // touch keys[0] so keys[1] is now least recently used
        pool.acquire(&keys[0], true).unwrap();
        pool.acquire(&keys[2], true).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().evictions, 1);
        // keys[0] and keys[2] survive: acquiring them again is a hit
        let hits_before = pool.stats().hits;
        pool.acquire(&keys[0], true).unwrap();
        pool.acquire(&keys[2], true).unwrap();
        assert_eq!(pool.stats().hits, hits_before + 2);
        // keys[1] was evicted: acquiring it opens again
        let opens_before = pool.stats().opens;
        pool.acquire(&keys[1], true).unwrap();
        assert_eq!(pool.stats().opens, opens_before + 1);
    }

    #[test]
    fn untracked_acquire_never_enters_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_f32_file(&dir, "a.snap", &[0.5; 8]);
        let mut pool = MmapPool::new(MmapCapacity::Bounded(4));
        pool.acquire(&key(path, 0, 8), false).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn disabled_pool_opens_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_f32_file(&dir, "a.snap", &[0.5; 8]);
        let mut pool = MmapPool::new(MmapCapacity::Disabled);
        let k = key(path, 0, 8);
        pool.acquire(&k, true).unwrap();
        pool.acquire(&k, true).unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.stats().opens, 2);
    }

    #[test]
    fn invalidate_all_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = MmapPool::new(MmapCapacity::Unbounded);
        for i in 0..3 {
            let path = write_f32_file(&dir, &format!("f{i}.snap"), &[0.0; 2]);
            pool.acquire(&key(path, 0, 2), true).unwrap();
        }
        assert_eq!(pool.len(), 3);
        pool.invalidate_all();
        assert!(pool.is_empty());
        assert_eq!(pool.stats().invalidations, 1);
    }

    #[test]
    fn missing_file_propagates_the_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = MmapPool::new(MmapCapacity::Bounded(4));
        let k = key(dir.path().join("absent.snap"), 0, 4);
        match pool.acquire(&k, true) {
            Err(QuantError::FileAccess { path, .. }) => {
                assert!(path.ends_with("absent.snap"));
            }
            other => panic!("expected FileAccess, got {other:?}"),
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn region_decodes_column_major() {
        let dir = tempfile::tempdir().unwrap();
        // 2x2 F-order: [ (0,0), (1,0), (0,1), (1,1) ]
        let path = write_f32_file(&dir, "m.snap", &[1.0, 2.0, 3.0, 4.0]);
        let mut pool = MmapPool::new(MmapCapacity::Bounded(4));
        let k = MmapKey {
            path,
            offset: 0,
            shape: smallvec![2, 2],
            dtype: Dtype::F32,
            mode: MapMode::Read,
        };
        let region = pool.acquire(&k, true).unwrap();
        let arr = region.to_array().unwrap();
        assert_eq!(arr[[0, 0]], 1.0);
        assert_eq!(arr[[1, 0]], 2.0);
        assert_eq!(arr[[0, 1]], 3.0);
        assert_eq!(arr[[1, 1]], 4.0);
    }

    #[test]
    fn offset_within_a_page_reads_the_right_block() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let path = write_f32_file(&dir, "o.snap", &values);
        let mut pool = MmapPool::new(MmapCapacity::Bounded(4));
        // second block of 4 floats starts at byte 16
        let region = pool.acquire(&key(path, 16, 4), true).unwrap();
        let arr = region.to_array().unwrap();
        assert_eq!(arr.as_slice_memory_order().unwrap(), &[4.0, 5.0, 6.0, 7.0]);
    }
}
