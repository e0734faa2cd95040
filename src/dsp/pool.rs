//! Size-keyed pool of complex scratch/result buffers.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use rustfft::num_complex::Complex32;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const DEFAULT_MAX_IDLE_PER_SIZE: usize = 16;

/// Borrow/return pool for `Vec<Complex32>` buffers.
///
/// Buffers handed out by [`BufferPool::acquire`] go back to the pool when the
/// [`PooledBuffer`] guard drops, including during unwinding.
pub struct BufferPool {
    idle: Mutex<FxHashMap<usize, Vec<Vec<Complex32>>>>,
    max_idle_per_size: usize,
    closed: AtomicBool,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Self::with_max_idle(DEFAULT_MAX_IDLE_PER_SIZE)
    }

    pub fn with_max_idle(max_idle_per_size: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(FxHashMap::default()),
            max_idle_per_size,
            closed: AtomicBool::new(false),
        })
    }

    /// Borrow a buffer of exactly `len` elements. Contents are unspecified.
    pub fn acquire(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let recycled = self.idle.lock().get_mut(&len).and_then(Vec::pop);
        let buffer = recycled.unwrap_or_else(|| vec![Complex32::default(); len]);
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buffer: Vec<Complex32>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        let slot = idle.entry(buffer.len()).or_default();
        if slot.len() < self.max_idle_per_size {
            slot.push(buffer);
        }
    }

    /// Number of idle buffers of `len` elements.
    pub fn idle_count(&self, len: usize) -> usize {
        self.idle.lock().get(&len).map_or(0, Vec::len)
    }

    /// Drop every idle buffer and stop accepting returns.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.idle.lock().clear();
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idle = self.idle.lock();
        f.debug_struct("BufferPool")
            .field("sizes", &idle.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Scoped loan from a [`BufferPool`].
pub struct PooledBuffer {
    buffer: Option<Vec<Complex32>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [Complex32];

    fn deref(&self) -> &Self::Target {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}
