pub mod capture;
pub mod ring_buffer;

pub use capture::{CaptureAdapter, SampleFormat};

/// Sample rate assumed by the demo stream and tests.
pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;
