//! Memoized cosine/sine tables keyed by transform size.

use crate::error::{AnalyzerError, Result};
use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// One period of `cos(2πi/N)` and `sin(2πi/N)` sampled at `N` points.
#[derive(Debug, Default)]
pub struct TrigTable {
    cos: Box<[f32]>,
    sin: Box<[f32]>,
}

impl TrigTable {
    fn build(size: usize) -> Result<Self> {
        let mut cos = Vec::new();
        let mut sin = Vec::new();
        cos.try_reserve_exact(size)
            .map_err(|_| AnalyzerError::Allocation(size))?;
        sin.try_reserve_exact(size)
            .map_err(|_| AnalyzerError::Allocation(size))?;

        let step = core::f64::consts::TAU / size as f64;
        cos.par_extend(
            (0..size)
                .into_par_iter()
                .map(|i| (step * i as f64).cos() as f32),
        );
        sin.par_extend(
            (0..size)
                .into_par_iter()
                .map(|i| (step * i as f64).sin() as f32),
        );

        Ok(Self {
            cos: cos.into_boxed_slice(),
            sin: sin.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cos.is_empty()
    }

    #[inline]
    pub fn cos(&self) -> &[f32] {
        &self.cos
    }

    #[inline]
    pub fn sin(&self) -> &[f32] {
        &self.sin
    }
}

/// Concurrent get-or-create store of [`TrigTable`]s.
///
/// Reads take a shared lock only; the first request for a size builds the
/// table under the write lock so racing callers never compute it twice.
/// Tables are never evicted, the set of distinct transform sizes is tiny.
#[derive(Debug, Default)]
pub struct TrigTableCache {
    entries: RwLock<FxHashMap<usize, Arc<TrigTable>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TrigTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance for callers that do not inject their own cache.
    pub fn shared() -> Arc<TrigTableCache> {
        static INSTANCE: OnceLock<Arc<TrigTableCache>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(|| Arc::new(TrigTableCache::new())))
    }

    pub fn get(&self, size: usize) -> Result<Arc<TrigTable>> {
        if size == 0 {
            return Err(AnalyzerError::InvalidTransformSize(size));
        }

        if let Some(existing) = self.entries.read().get(&size) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(existing));
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&size) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(existing));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match TrigTable::build(size) {
            Ok(table) => {
                debug!("[trig] built tables for size {size}");
                let table = Arc::new(table);
                entries.insert(size, Arc::clone(&table));
                Ok(table)
            }
            Err(err) => {
                warn!("[trig] {err}; serving empty tables for size {size}");
                Ok(Arc::new(TrigTable::default()))
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rejects_zero_size() {
        let cache = TrigTableCache::new();
        assert_eq!(
            cache.get(0).unwrap_err(),
            AnalyzerError::InvalidTransformSize(0)
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn quarter_period_values_match_unit_circle() {
        let cache = TrigTableCache::new();
        let table = cache.get(8).unwrap();
        assert_eq!(table.len(), 8);
        assert!((table.cos()[0] - 1.0).abs() < 1e-6);
        assert!(table.cos()[2].abs() < 1e-6);
        assert!((table.sin()[2] - 1.0).abs() < 1e-6);
        assert!((table.cos()[4] + 1.0).abs() < 1e-6);
        assert!((table.sin()[6] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn repeated_requests_hit_the_cache() {
        let cache = TrigTableCache::new();
        let first = cache.get(512).unwrap();
        let second = cache.get(512).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn concurrent_population_builds_each_size_once() {
        let cache = TrigTableCache::new();
        thread::scope(|scope| {
            for worker in 0..8 {
                let cache = &cache;
                scope.spawn(move || {
                    let size = 64 << (worker % 4);
                    cache.get(size).unwrap();
                });
            }
        });
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.misses(), 4);
        assert_eq!(cache.hits(), 4);
    }
}
