//! Sample accumulation and windowing into the complex working buffer.

use super::pool::{BufferPool, PooledBuffer};
use super::window::{WindowBank, WindowKind};
use rayon::prelude::*;
use rustfft::num_complex::Complex32;
use std::fmt;
use std::sync::Arc;

/// Samples multiplied per unrolled block; wide enough for AVX f32 lanes.
const LANES: usize = 8;

pub const DEFAULT_PARALLEL_WINDOW_THRESHOLD: usize = 4096;

/// Fills an `N`-point complex buffer with windowed samples and hands every
/// completed window off as a pooled copy.
///
/// The working buffer is owned exclusively by this accumulator; completed
/// windows are snapshotted into buffers borrowed from the pool so the
/// transform stage never aliases it.
pub struct SampleAccumulator {
    buffer: Vec<Complex32>,
    sample_count: usize,
    bank: WindowBank,
    kind: WindowKind,
    window: Arc<[f32]>,
    pool: Arc<BufferPool>,
    parallel_threshold: usize,
}

impl SampleAccumulator {
    pub fn new(bank: WindowBank, kind: WindowKind, pool: Arc<BufferPool>) -> Self {
        Self::with_parallel_threshold(bank, kind, pool, DEFAULT_PARALLEL_WINDOW_THRESHOLD)
    }

    pub fn with_parallel_threshold(
        bank: WindowBank,
        kind: WindowKind,
        pool: Arc<BufferPool>,
        parallel_threshold: usize,
    ) -> Self {
        let size = bank.size();
        Self {
            buffer: vec![Complex32::default(); size],
            sample_count: 0,
            window: bank.get(kind),
            bank,
            kind,
            pool,
            parallel_threshold: parallel_threshold.max(LANES),
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn window_kind(&self) -> WindowKind {
        self.kind
    }

    /// Windows `samples` into the buffer, calling `on_window` with a copy of
    /// every window that fills up. Returns the number of completed windows.
    pub fn push_samples<F>(&mut self, samples: &[f32], mut on_window: F) -> usize
    where
        F: FnMut(PooledBuffer),
    {
        let size = self.buffer.len();
        if size == 0 {
            return 0;
        }

        let mut completed = 0;
        let mut remaining = samples;
        while !remaining.is_empty() {
            let offset = self.sample_count;
            let take = (size - offset).min(remaining.len());
            let (head, tail) = remaining.split_at(take);

            let target = &mut self.buffer[offset..offset + take];
            let weights = &self.window[offset..offset + take];
            if take > self.parallel_threshold {
                window_parallel(target, head, weights, self.parallel_threshold);
            } else {
                window_into(target, head, weights);
            }

            self.sample_count += take;
            remaining = tail;

            if self.sample_count == size {
                let mut snapshot = self.pool.acquire(size);
                snapshot.copy_from_slice(&self.buffer);
                self.reset_state();
                on_window(snapshot);
                completed += 1;
            }
        }
        completed
    }

    /// Discards the partially filled window.
    pub fn reset_state(&mut self) {
        self.buffer.fill(Complex32::default());
        self.sample_count = 0;
    }

    /// Switches the active window; partial accumulation is discarded.
    /// Returns `false` if `kind` was already active.
    pub fn set_window(&mut self, kind: WindowKind) -> bool {
        if kind == self.kind {
            return false;
        }
        self.kind = kind;
        self.window = self.bank.get(kind);
        self.reset_state();
        true
    }
}

impl fmt::Debug for SampleAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleAccumulator")
            .field("size", &self.buffer.len())
            .field("sample_count", &self.sample_count)
            .field("window", &self.kind)
            .finish()
    }
}

/// `target[i] = samples[i] * window[i] + 0i`.
fn window_into(target: &mut [Complex32], samples: &[f32], window: &[f32]) {
    debug_assert_eq!(target.len(), samples.len());
    debug_assert_eq!(target.len(), window.len());

    let mut target_blocks = target.chunks_exact_mut(LANES);
    let mut sample_blocks = samples.chunks_exact(LANES);
    let mut weight_blocks = window.chunks_exact(LANES);
    for ((dst, src), weights) in (&mut target_blocks)
        .zip(&mut sample_blocks)
        .zip(&mut weight_blocks)
    {
        let mut products = [0.0f32; LANES];
        for lane in 0..LANES {
            products[lane] = src[lane] * weights[lane];
        }
        for lane in 0..LANES {
            dst[lane] = Complex32::new(products[lane], 0.0);
        }
    }

    for ((dst, &src), &weight) in target_blocks
        .into_remainder()
        .iter_mut()
        .zip(sample_blocks.remainder())
        .zip(weight_blocks.remainder())
    {
        *dst = Complex32::new(src * weight, 0.0);
    }
}

/// Splits the range into disjoint sub-ranges windowed on the rayon pool.
fn window_parallel(target: &mut [Complex32], samples: &[f32], window: &[f32], split: usize) {
    target
        .par_chunks_mut(split)
        .zip(samples.par_chunks(split))
        .zip(window.par_chunks(split))
        .for_each(|((dst, src), weights)| window_into(dst, src, weights));
}
