//! Analyzer configuration and the live gain knobs.

use crate::dsp::accumulator::DEFAULT_PARALLEL_WINDOW_THRESHOLD;
use crate::dsp::scale::FrequencyScale;
use crate::dsp::spectrum::{DEFAULT_PARALLEL_BIN_THRESHOLD, GainProvider};
use crate::dsp::window::WindowKind;
use crate::error::{AnalyzerError, Result};
use crate::pipeline::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::pipeline::supervisor::DEFAULT_SHUTDOWN_TIMEOUT;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 1 << 16;
pub const MAX_CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_MIN_DB: f32 = -90.0;
pub const DEFAULT_MAX_DB: f32 = 0.0;
pub const DEFAULT_AMPLIFICATION: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    pub min_db: f32,
    pub max_db: f32,
    pub amplification: f32,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
            amplification: DEFAULT_AMPLIFICATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Transform size; must be a power of two.
    pub fft_size: usize,
    pub window: WindowKind,
    pub scale: FrequencyScale,
    /// Capacity of each drop-oldest pipeline channel.
    pub channel_capacity: usize,
    /// Window writes longer than this are split across the rayon pool.
    pub parallel_window_threshold: usize,
    /// Spectra wider than this are converted on the rayon pool.
    pub parallel_bin_threshold: usize,
    pub shutdown_timeout_ms: u64,
    pub gain: GainConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            window: WindowKind::default(),
            scale: FrequencyScale::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            parallel_window_threshold: DEFAULT_PARALLEL_WINDOW_THRESHOLD,
            parallel_bin_threshold: DEFAULT_PARALLEL_BIN_THRESHOLD,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            gain: GainConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Reads a JSON configuration; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading analyzer config {}", path.display()))?;
        let config: AnalyzerConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing analyzer config {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Clamps tunables into their supported ranges. The FFT size is left alone
    /// so an invalid size still surfaces through [`validate`](Self::validate).
    pub fn normalize(&mut self) {
        self.channel_capacity = self.channel_capacity.clamp(1, MAX_CHANNEL_CAPACITY);
        self.parallel_window_threshold = self.parallel_window_threshold.max(1);
        self.parallel_bin_threshold = self.parallel_bin_threshold.max(1);
        if self.shutdown_timeout_ms == 0 {
            self.shutdown_timeout_ms = DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64;
        }
        if !self.gain.amplification.is_finite() || self.gain.amplification <= 0.0 {
            self.gain.amplification = DEFAULT_AMPLIFICATION;
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(AnalyzerError::InvalidTransformSize(self.fft_size));
        }
        if self.channel_capacity == 0 {
            return Err(AnalyzerError::InvalidCapacity);
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Lock-free [`GainProvider`] whose knobs can be changed while the pipeline runs.
#[derive(Debug)]
pub struct GainSettings {
    min_db: AtomicU32,
    max_db: AtomicU32,
    amplification: AtomicU32,
}

impl GainSettings {
    pub fn new(config: GainConfig) -> Self {
        Self {
            min_db: AtomicU32::new(config.min_db.to_bits()),
            max_db: AtomicU32::new(config.max_db.to_bits()),
            amplification: AtomicU32::new(config.amplification.to_bits()),
        }
    }

    pub fn set_min_db(&self, value: f32) {
        self.min_db.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_max_db(&self, value: f32) {
        self.max_db.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_amplification(&self, value: f32) {
        self.amplification.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GainConfig {
        GainConfig {
            min_db: self.min_db(),
            max_db: self.max_db(),
            amplification: self.amplification(),
        }
    }
}

impl Default for GainSettings {
    fn default() -> Self {
        Self::new(GainConfig::default())
    }
}

impl GainProvider for GainSettings {
    fn min_db(&self) -> f32 {
        f32::from_bits(self.min_db.load(Ordering::Relaxed))
    }

    fn max_db(&self) -> f32 {
        f32::from_bits(self.max_db.load(Ordering::Relaxed))
    }

    fn amplification(&self) -> f32 {
        f32::from_bits(self.amplification.load(Ordering::Relaxed))
    }
}
