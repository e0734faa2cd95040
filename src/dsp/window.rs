//! Window function coefficient tables.

use super::trig::{TrigTable, TrigTableCache};
use crate::error::{AnalyzerError, Result};
use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

pub const KAISER_BETA: f64 = 5.0;
const BESSEL_TERM_EPSILON: f64 = 1.0e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    Kaiser,
}

impl WindowKind {
    pub const ALL: [WindowKind; 5] = [
        WindowKind::Hann,
        WindowKind::Hamming,
        WindowKind::Blackman,
        WindowKind::Bartlett,
        WindowKind::Kaiser,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowKind::Hann => "hann",
            WindowKind::Hamming => "hamming",
            WindowKind::Blackman => "blackman",
            WindowKind::Bartlett => "bartlett",
            WindowKind::Kaiser => "kaiser",
        }
    }

    fn index(self) -> usize {
        match self {
            WindowKind::Hann => 0,
            WindowKind::Hamming => 1,
            WindowKind::Blackman => 2,
            WindowKind::Bartlett => 3,
            WindowKind::Kaiser => 4,
        }
    }

    /// Weight for sample `i` of a `size`-point window; `size` must be at least 2.
    fn coefficient(self, i: usize, size: usize, trig: &TrigTable) -> f32 {
        let span = (size - 1) as f64;
        let n = i as f64;
        match self {
            WindowKind::Hann => 0.5 * (1.0 - trig.cos()[i]),
            WindowKind::Hamming => 0.54 - 0.46 * trig.cos()[i],
            WindowKind::Blackman => {
                let phase = 2.0 * core::f64::consts::TAU * n / span;
                0.42 - 0.5 * trig.cos()[i] + 0.08 * phase.cos() as f32
            }
            WindowKind::Bartlett => {
                let half = span / 2.0;
                ((2.0 / span) * (half - (n - half).abs())) as f32
            }
            WindowKind::Kaiser => {
                let ratio = 2.0 * n / span - 1.0;
                let inside = (1.0 - ratio * ratio).max(0.0).sqrt();
                (bessel_i0(KAISER_BETA * inside) / bessel_i0(KAISER_BETA)) as f32
            }
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowKind {
    type Err = AnalyzerError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        WindowKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| AnalyzerError::UnsupportedWindow(value.to_owned()))
    }
}

/// Modified Bessel function of the first kind, order zero, by power series.
pub fn bessel_i0(x: f64) -> f64 {
    let quarter_sq = x * x / 4.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= quarter_sq / (k * k);
        if term < BESSEL_TERM_EPSILON {
            break;
        }
        sum += term;
        k += 1.0;
    }
    sum
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct WindowKey {
    kind: WindowKind,
    len: usize,
}

/// Generates window tables once per `(size, kind)` and hands out shared copies.
#[derive(Debug)]
pub struct WindowCache {
    trig: Arc<TrigTableCache>,
    entries: RwLock<FxHashMap<WindowKey, Arc<[f32]>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl WindowCache {
    pub fn new(trig: Arc<TrigTableCache>) -> Self {
        Self {
            trig,
            entries: RwLock::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn generate(&self, size: usize, kind: WindowKind) -> Arc<[f32]> {
        if size == 0 {
            return Arc::from([]);
        }

        let key = WindowKey { kind, len: size };
        if let Some(existing) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(existing);
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(existing);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match self.compute(size, kind) {
            Ok(table) => {
                debug!("[window] generated {kind} table of {size} points");
                let table: Arc<[f32]> = Arc::from(table);
                entries.insert(key, Arc::clone(&table));
                table
            }
            Err(err) => {
                // Not cached: a later request may succeed.
                error!("[window] {kind} generation failed: {err}; using silence");
                Arc::from(vec![0.0; size])
            }
        }
    }

    fn compute(&self, size: usize, kind: WindowKind) -> Result<Vec<f32>> {
        if size == 1 {
            return Ok(vec![1.0]);
        }

        let trig = self.trig.get(size)?;
        if trig.len() != size {
            return Err(AnalyzerError::Allocation(size));
        }

        let mut coefficients = Vec::new();
        coefficients
            .try_reserve_exact(size)
            .map_err(|_| AnalyzerError::Allocation(size))?;
        (0..size)
            .into_par_iter()
            .map(|i| kind.coefficient(i, size, &trig))
            .collect_into_vec(&mut coefficients);
        Ok(coefficients)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Every supported window for one fixed transform size.
#[derive(Debug, Clone)]
pub struct WindowBank {
    size: usize,
    tables: [Arc<[f32]>; 5],
}

impl WindowBank {
    pub fn new(cache: &WindowCache, size: usize) -> Self {
        Self {
            size,
            tables: WindowKind::ALL.map(|kind| cache.generate(size, kind)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, kind: WindowKind) -> Arc<[f32]> {
        Arc::clone(&self.tables[kind.index()])
    }
}
