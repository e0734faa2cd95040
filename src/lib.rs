//! Real-time spectrum analysis of loopback audio.
//!
//! Capture callbacks hand interleaved PCM to a [`CaptureAdapter`] (or mono
//! samples straight to [`SpectrumAnalyzer::add_samples`]); windowed FFT
//! frames come back as normalized [`SpectralData`] through
//! [`SpectrumAnalyzer::current_spectrum`], callbacks or async streams.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod pipeline;
pub mod util;

pub use audio::{CaptureAdapter, SampleFormat};
pub use config::{AnalyzerConfig, GainConfig, GainSettings};
pub use dsp::{FrequencyScale, GainProvider, WindowKind};
pub use error::{AnalyzerError, Result};
pub use pipeline::{
    Admission, CancelToken, Dispatcher, PipelineStats, RejectReason, SpectralData,
    SpectrumAnalyzer, SubscriptionId,
};
