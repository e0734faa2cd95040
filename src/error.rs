//! Error type shared by the analysis pipeline.

use thiserror::Error;

pub type Result<T, E = AnalyzerError> = std::result::Result<T, E>;

/// Failures surfaced at the configuration boundary of the pipeline.
///
/// Per-frame processing problems never show up here; they are logged and the
/// affected frame is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyzerError {
    #[error("transform size {0} must be a non-zero power of two")]
    InvalidTransformSize(usize),
    #[error("unsupported window function `{0}`")]
    UnsupportedWindow(String),
    #[error("unsupported frequency scale `{0}`")]
    UnsupportedScale(String),
    #[error("sample rate must be positive and finite (got {0})")]
    InvalidSampleRate(f32),
    #[error("FFT input is empty")]
    EmptyInput,
    #[error("FFT buffer holds {actual} bins but the engine expects {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("channel capacity must be greater than zero")]
    InvalidCapacity,
    #[error("allocation of {0} elements failed")]
    Allocation(usize),
    #[error("analyzer has been shut down")]
    Disposed,
}
