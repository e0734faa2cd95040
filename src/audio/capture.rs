//! Bridges raw interleaved PCM from a loopback capture into the analyzer.

use crate::pipeline::{Admission, CancelToken, SpectrumAnalyzer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Sample encodings a capture source may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    F32Le,
    F32Be,
    F64Le,
    F64Be,
    S32Le,
    S32Be,
    S16Le,
    S16Be,
    U16Le,
    U16Be,
    S8,
    U8,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::F64Le | Self::F64Be => 8,
            Self::F32Le | Self::F32Be | Self::S32Le | Self::S32Be => 4,
            Self::S16Le | Self::S16Be | Self::U16Le | Self::U16Be => 2,
            Self::S8 | Self::U8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::F32Le => "f32le",
            Self::F32Be => "f32be",
            Self::F64Le => "f64le",
            Self::F64Be => "f64be",
            Self::S32Le => "s32le",
            Self::S32Be => "s32be",
            Self::S16Le => "s16le",
            Self::S16Be => "s16be",
            Self::U16Le => "u16le",
            Self::U16Be => "u16be",
            Self::S8 => "s8",
            Self::U8 => "u8",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        [
            Self::F32Le,
            Self::F32Be,
            Self::F64Le,
            Self::F64Be,
            Self::S32Le,
            Self::S32Be,
            Self::S16Le,
            Self::S16Be,
            Self::U16Le,
            Self::U16Be,
            Self::S8,
            Self::U8,
        ]
        .into_iter()
        .find(|format| format.name() == lowered)
        .ok_or_else(|| format!("unknown sample format '{s}'"))
    }
}

/// Appends `bytes` decoded as `format` to `out`, normalized to `[-1, 1]`.
///
/// Returns `false` (leaving `out` untouched) if the buffer is not a whole
/// number of samples.
pub fn decode_interleaved(bytes: &[u8], format: SampleFormat, out: &mut Vec<f32>) -> bool {
    let width = format.bytes_per_sample();
    if !bytes.len().is_multiple_of(width) {
        warn!(
            "[capture] buffer length {} is not aligned to {format}",
            bytes.len()
        );
        return false;
    }
    out.reserve(bytes.len() / width);

    macro_rules! decode {
        ($ty:ty, $from:ident, |$raw:ident| $norm:expr) => {{
            out.extend(bytes.chunks_exact(width).map(|chunk| {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(chunk);
                let $raw = <$ty>::$from(raw);
                $norm
            }))
        }};
    }

    match format {
        SampleFormat::F32Le => decode!(f32, from_le_bytes, |v| v),
        SampleFormat::F32Be => decode!(f32, from_be_bytes, |v| v),
        SampleFormat::F64Le => decode!(f64, from_le_bytes, |v| v as f32),
        SampleFormat::F64Be => decode!(f64, from_be_bytes, |v| v as f32),
        SampleFormat::S32Le => decode!(i32, from_le_bytes, |v| v as f32 / i32::MAX as f32),
        SampleFormat::S32Be => decode!(i32, from_be_bytes, |v| v as f32 / i32::MAX as f32),
        SampleFormat::S16Le => decode!(i16, from_le_bytes, |v| v as f32 / i16::MAX as f32),
        SampleFormat::S16Be => decode!(i16, from_be_bytes, |v| v as f32 / i16::MAX as f32),
        SampleFormat::U16Le => decode!(u16, from_le_bytes, |v| (v as f32 - 32_768.0) / 32_768.0),
        SampleFormat::U16Be => decode!(u16, from_be_bytes, |v| (v as f32 - 32_768.0) / 32_768.0),
        SampleFormat::S8 => out.extend(bytes.iter().map(|&b| (b as i8) as f32 / i8::MAX as f32)),
        SampleFormat::U8 => out.extend(bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0)),
    }
    true
}

/// Averages interleaved frames into `mono`. A trailing partial frame is dropped.
pub fn mixdown_into(mono: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    match channels {
        0 => {}
        1 => mono.extend_from_slice(interleaved),
        2 => mono.extend(
            interleaved
                .chunks_exact(2)
                .map(|frame| (frame[0] + frame[1]) * 0.5),
        ),
        channels => {
            let inv = 1.0 / channels as f32;
            mono.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() * inv),
            );
        }
    }
}

/// Capture-thread side of the analyzer: decodes, downmixes and forwards
/// buffers without blocking. Scratch space is reused between callbacks.
pub struct CaptureAdapter {
    analyzer: Arc<SpectrumAnalyzer>,
    token: CancelToken,
    decoded: Vec<f32>,
    mono: Vec<f32>,
}

impl CaptureAdapter {
    pub fn new(analyzer: Arc<SpectrumAnalyzer>) -> Self {
        Self::with_token(analyzer, CancelToken::new())
    }

    pub fn with_token(analyzer: Arc<SpectrumAnalyzer>, token: CancelToken) -> Self {
        Self {
            analyzer,
            token,
            decoded: Vec::new(),
            mono: Vec::new(),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Handles one capture callback worth of interleaved PCM.
    pub fn on_buffer(
        &mut self,
        bytes: &[u8],
        format: SampleFormat,
        channels: usize,
        sample_rate: f32,
    ) -> Admission {
        if channels == 0 || bytes.is_empty() {
            return Admission::Ignored;
        }

        self.decoded.clear();
        if !decode_interleaved(bytes, format, &mut self.decoded) {
            return Admission::Ignored;
        }
        if channels == 1 {
            return self
                .analyzer
                .add_samples(&self.decoded, sample_rate, &self.token);
        }

        self.mono.clear();
        mixdown_into(&mut self.mono, &self.decoded, channels);
        self.analyzer
            .add_samples(&self.mono, sample_rate, &self.token)
    }

    /// Stops forwarding anything this adapter has queued but not yet analysed.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl fmt::Debug for CaptureAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureAdapter")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}
