//! Complex FFT bins to normalized, perceptually scaled magnitudes.

use super::scale::{FrequencyMapping, FrequencyScale};
use crate::error::{AnalyzerError, Result};
use rayon::prelude::*;
use rustfft::num_complex::Complex32;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Natural log to decibel conversion factor: 10 / ln(10).
const LN_TO_DB: f32 = 10.0 * core::f32::consts::LOG10_E;
const MIN_DB_RANGE: f32 = 1.0e-6;
const SNAP_TO_ZERO: f32 = 1.0e-6;
const LOWEST_MAPPED_HZ: f32 = 1.0;

pub const DEFAULT_PARALLEL_BIN_THRESHOLD: usize = 256;

/// Live source of the three gain knobs, sampled on every conversion.
pub trait GainProvider: Send + Sync {
    fn min_db(&self) -> f32;
    fn max_db(&self) -> f32;
    fn amplification(&self) -> f32;
}

/// Gain knobs frozen for the duration of one conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumParameters {
    pub min_db: f32,
    pub db_range: f32,
    pub amplification: f32,
}

impl SpectrumParameters {
    pub fn new(min_db: f32, max_db: f32, amplification: f32) -> Self {
        let db_range = max_db - min_db;
        Self {
            min_db,
            db_range: if db_range.is_finite() {
                db_range.max(MIN_DB_RANGE)
            } else {
                MIN_DB_RANGE
            },
            amplification: if amplification.is_finite() {
                amplification
            } else {
                1.0
            },
        }
    }

    pub fn from_provider(gain: &dyn GainProvider) -> Self {
        Self::new(gain.min_db(), gain.max_db(), gain.amplification())
    }

    /// Maps a squared magnitude to `[0, 1]` and applies the amplification exponent.
    #[inline]
    pub fn normalize(&self, power: f32) -> f32 {
        let db = power.ln() * LN_TO_DB;
        let norm = ((db - self.min_db) / self.db_range).clamp(0.0, 1.0);
        if !norm.is_finite() || norm < SNAP_TO_ZERO {
            return 0.0;
        }
        norm.powf(self.amplification)
    }
}

pub struct SpectrumConverter {
    gain: Arc<dyn GainProvider>,
    parallel_threshold: usize,
}

impl SpectrumConverter {
    pub fn new(gain: Arc<dyn GainProvider>) -> Self {
        Self::with_parallel_threshold(gain, DEFAULT_PARALLEL_BIN_THRESHOLD)
    }

    pub fn with_parallel_threshold(gain: Arc<dyn GainProvider>, parallel_threshold: usize) -> Self {
        Self {
            gain,
            parallel_threshold,
        }
    }

    /// Converts a full `N`-point FFT into `N / 2 + 1` normalized magnitudes.
    pub fn convert(
        &self,
        fft: &[Complex32],
        sample_rate: f32,
        scale: FrequencyScale,
    ) -> Result<Vec<f32>> {
        if fft.is_empty() {
            return Err(AnalyzerError::EmptyInput);
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(AnalyzerError::InvalidSampleRate(sample_rate));
        }

        let params = SpectrumParameters::from_provider(self.gain.as_ref());
        let bins = fft.len() / 2 + 1;
        let mut output = Vec::new();
        output
            .try_reserve_exact(bins)
            .map_err(|_| AnalyzerError::Allocation(bins))?;
        output.resize(bins, 0.0);

        let spectrum = &fft[..bins];
        match scale.mapping() {
            None => self.fill(&mut output, |i| {
                let center = spectrum[i].norm_sqr();
                let left = if i > 0 {
                    spectrum[i - 1].norm_sqr()
                } else {
                    center
                };
                let right = spectrum.get(i + 1).map_or(center, |c| c.norm_sqr());
                params.normalize((left + center + right) / 3.0)
            }),
            Some(mapping) => {
                let lookup = MappedAxis::new(mapping, bins, sample_rate);
                self.fill(&mut output, |i| {
                    params.normalize(spectrum[lookup.source_bin(i)].norm_sqr())
                })
            }
        }

        Ok(output)
    }

    /// Like [`convert`](Self::convert), but a failed frame yields an empty spectrum.
    pub fn convert_or_empty(
        &self,
        fft: &[Complex32],
        sample_rate: f32,
        scale: FrequencyScale,
    ) -> Vec<f32> {
        self.convert(fft, sample_rate, scale).unwrap_or_else(|err| {
            warn!("[converter] dropping frame: {err}");
            Vec::new()
        })
    }

    fn fill<F>(&self, output: &mut [f32], value_at: F)
    where
        F: Fn(usize) -> f32 + Sync,
    {
        if output.len() > self.parallel_threshold {
            output
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, slot)| *slot = value_at(i));
        } else {
            for (i, slot) in output.iter_mut().enumerate() {
                *slot = value_at(i);
            }
        }
    }
}

impl fmt::Debug for SpectrumConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumConverter")
            .field("parallel_threshold", &self.parallel_threshold)
            .finish_non_exhaustive()
    }
}

/// Output bin → source FFT bin lookup for a non-linear axis.
///
/// Output bins are spaced evenly in the scale's domain between 1 Hz and
/// Nyquist; each maps back to the nearest FFT bin.
struct MappedAxis {
    mapping: FrequencyMapping,
    bins: usize,
    nyquist: f32,
    domain_min: f32,
    domain_span: f32,
}

impl MappedAxis {
    fn new(mapping: FrequencyMapping, bins: usize, sample_rate: f32) -> Self {
        let nyquist = sample_rate * 0.5;
        let domain_min = (mapping.forward)(LOWEST_MAPPED_HZ);
        let domain_max = (mapping.forward)(nyquist);
        Self {
            mapping,
            bins,
            nyquist,
            domain_min,
            domain_span: domain_max - domain_min,
        }
    }

    fn source_bin(&self, index: usize) -> usize {
        let last = self.bins - 1;
        if last == 0 {
            return 0;
        }
        let t = index as f32 / last as f32;
        let hz = (self.mapping.inverse)(self.domain_min + self.domain_span * t);
        let position = (hz / self.nyquist * last as f32).round();
        if position.is_finite() {
            position.clamp(0.0, last as f32) as usize
        } else {
            0
        }
    }
}

/// FFT bin consulted for each output bin of a `bins`-wide spectrum.
///
/// The linear axis reads bin `i` (plus neighbours) for output `i`.
pub fn source_bins(bins: usize, sample_rate: f32, scale: FrequencyScale) -> Vec<usize> {
    match scale.mapping() {
        Some(mapping) if bins > 0 => {
            let axis = MappedAxis::new(mapping, bins, sample_rate);
            (0..bins).map(|i| axis.source_bin(i)).collect()
        }
        _ => (0..bins).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::fft::FftEngine;
    use crate::dsp::trig::TrigTableCache;
    use crate::dsp::window::{WindowCache, WindowKind};

    struct FixedGain(f32, f32, f32);

    impl GainProvider for FixedGain {
        fn min_db(&self) -> f32 {
            self.0
        }
        fn max_db(&self) -> f32 {
            self.1
        }
        fn amplification(&self) -> f32 {
            self.2
        }
    }

    fn converter(min_db: f32, max_db: f32, amplification: f32) -> SpectrumConverter {
        SpectrumConverter::new(Arc::new(FixedGain(min_db, max_db, amplification)))
    }

    fn db_to_power(db: f32) -> f32 {
        10.0f32.powf(db / 10.0)
    }

    #[test]
    fn db_range_boundaries_normalize_to_zero_and_one() {
        let params = SpectrumParameters::new(-60.0, 0.0, 1.0);
        assert_eq!(params.normalize(db_to_power(-60.0)), 0.0);
        assert_eq!(params.normalize(db_to_power(0.0)), 1.0);
        assert_eq!(params.normalize(db_to_power(20.0)), 1.0);
        assert_eq!(params.normalize(0.0), 0.0);
    }

    #[test]
    fn amplification_exponent_shapes_values() {
        let linear = SpectrumParameters::new(-60.0, 0.0, 1.0);
        let squared = SpectrumParameters::new(-60.0, 0.0, 2.0);
        let power = db_to_power(-30.0);
        let norm = linear.normalize(power);
        assert!((norm - 0.5).abs() < 1e-4);
        assert!((squared.normalize(power) - norm * norm).abs() < 1e-6);
    }

    #[test]
    fn degenerate_range_is_floored() {
        let params = SpectrumParameters::new(-20.0, -40.0, 1.0);
        assert_eq!(params.db_range, MIN_DB_RANGE);
        assert_eq!(params.normalize(db_to_power(-30.0)), 0.0);
        assert_eq!(params.normalize(db_to_power(-10.0)), 1.0);
    }

    #[test]
    fn rejects_invalid_input() {
        let converter = converter(-60.0, 0.0, 1.0);
        assert_eq!(
            converter
                .convert(&[], 48_000.0, FrequencyScale::Linear)
                .unwrap_err(),
            AnalyzerError::EmptyInput
        );
        let fft = vec![Complex32::default(); 8];
        assert_eq!(
            converter
                .convert(&fft, 0.0, FrequencyScale::Mel)
                .unwrap_err(),
            AnalyzerError::InvalidSampleRate(0.0)
        );
        assert!(
            converter
                .convert_or_empty(&fft, -1.0, FrequencyScale::Mel)
                .is_empty()
        );
    }

    #[test]
    fn linear_scale_averages_neighbours() {
        let converter = converter(-60.0, 0.0, 1.0);
        let mut fft = vec![Complex32::default(); 8];
        fft[2] = Complex32::new(db_to_power(0.0).sqrt() * 3f32.sqrt(), 0.0);
        let spectrum = converter
            .convert(&fft, 8.0, FrequencyScale::Linear)
            .unwrap();
        assert_eq!(spectrum.len(), 5);
        assert_eq!(spectrum[0], 0.0);
        assert!((spectrum[1] - 1.0).abs() < 1e-5);
        assert!((spectrum[2] - 1.0).abs() < 1e-5);
        assert!((spectrum[3] - 1.0).abs() < 1e-5);
        assert_eq!(spectrum[4], 0.0);
    }

    #[test]
    fn logarithmic_lookup_is_monotonic() {
        for scale in FrequencyScale::ALL {
            let lookup = source_bins(513, 48_000.0, scale);
            assert_eq!(lookup.len(), 513);
            assert!(
                lookup.windows(2).all(|pair| pair[0] <= pair[1]),
                "{scale} lookup is not monotonic"
            );
            assert_eq!(lookup[512], 512);
        }
        let log = source_bins(513, 48_000.0, FrequencyScale::Logarithmic);
        assert_eq!(log[0], 0);
    }

    #[test]
    fn parallel_and_sequential_paths_agree() {
        let gain: Arc<dyn GainProvider> = Arc::new(FixedGain(-90.0, 0.0, 1.5));
        let sequential = SpectrumConverter::with_parallel_threshold(Arc::clone(&gain), usize::MAX);
        let parallel = SpectrumConverter::with_parallel_threshold(gain, 0);
        let fft: Vec<Complex32> = (0..1024)
            .map(|i| Complex32::new((i as f32 * 0.37).sin(), (i as f32 * 0.11).cos()))
            .collect();
        for scale in FrequencyScale::ALL {
            assert_eq!(
                sequential.convert(&fft, 44_100.0, scale).unwrap(),
                parallel.convert(&fft, 44_100.0, scale).unwrap()
            );
        }
    }

    #[test]
    fn pure_tone_peaks_at_its_bin() {
        let size = 1024;
        let sample_rate = 48_000.0;
        let target_bin = 100;

        let windows = WindowCache::new(Arc::new(TrigTableCache::new()));
        let window = windows.generate(size, WindowKind::Hann);
        let mut buffer: Vec<Complex32> = (0..size)
            .map(|n| {
                let cycle = ((target_bin * n) % size) as f32 / size as f32;
                let sample = (core::f32::consts::TAU * cycle).sin();
                Complex32::new(sample * window[n], 0.0)
            })
            .collect();
        FftEngine::new(size).unwrap().transform(&mut buffer).unwrap();

        let spectrum = converter(-40.0, 60.0, 1.0)
            .convert(&buffer, sample_rate, FrequencyScale::Linear)
            .unwrap();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap();
        assert!(peak.abs_diff(target_bin) <= 1, "peak at {peak}");
        assert!(spectrum[peak] > 0.5);
        let far: f32 = spectrum[..target_bin - 10]
            .iter()
            .chain(&spectrum[target_bin + 10..])
            .copied()
            .fold(0.0, f32::max);
        assert!(far < 0.05, "leakage {far}");
    }
}
