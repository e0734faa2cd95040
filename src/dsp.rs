//! Signal processing stages of the analyzer.
//!
//! Each stage is usable on its own; [`crate::pipeline`] wires them together
//! across threads.

pub mod accumulator;
pub mod fft;
pub mod pool;
pub mod scale;
pub mod spectrum;
pub mod trig;
pub mod window;

pub use accumulator::SampleAccumulator;
pub use fft::FftEngine;
pub use pool::{BufferPool, PooledBuffer};
pub use scale::FrequencyScale;
pub use spectrum::{GainProvider, SpectrumConverter, SpectrumParameters};
pub use trig::{TrigTable, TrigTableCache};
pub use window::{WindowBank, WindowCache, WindowKind};
