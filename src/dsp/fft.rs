//! Power-of-two complex FFT.

use super::pool::BufferPool;
use crate::error::{AnalyzerError, Result};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Forward transform of a fixed power-of-two size.
///
/// The planned transform is immutable, so one engine can serve any number of
/// concurrent invocations; each call borrows its own scratch space.
#[derive(Clone)]
pub struct FftEngine {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    scratch: Arc<BufferPool>,
}

impl FftEngine {
    pub fn new(size: usize) -> Result<Self> {
        if !size.is_power_of_two() {
            return Err(AnalyzerError::InvalidTransformSize(size));
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        Ok(Self {
            size,
            fft,
            scratch: BufferPool::new(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of spectrum bins up to and including Nyquist.
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// In-place forward DFT in natural (not bit-reversed) order.
    pub fn transform(&self, buffer: &mut [Complex32]) -> Result<()> {
        if buffer.len() != self.size {
            return Err(AnalyzerError::LengthMismatch {
                expected: self.size,
                actual: buffer.len(),
            });
        }

        let mut scratch = self.scratch.acquire(self.fft.get_inplace_scratch_len());
        self.fft.process_with_scratch(buffer, &mut scratch);
        Ok(())
    }
}

impl fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftEngine").field("size", &self.size).finish()
    }
}
