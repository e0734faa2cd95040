//! Frequency axis scales and their Hz mappings.

use crate::error::{AnalyzerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyScale {
    Linear,
    #[default]
    Logarithmic,
    Mel,
    Bark,
    Erb,
}

impl FrequencyScale {
    pub const ALL: [FrequencyScale; 5] = [
        FrequencyScale::Linear,
        FrequencyScale::Logarithmic,
        FrequencyScale::Mel,
        FrequencyScale::Bark,
        FrequencyScale::Erb,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FrequencyScale::Linear => "linear",
            FrequencyScale::Logarithmic => "logarithmic",
            FrequencyScale::Mel => "mel",
            FrequencyScale::Bark => "bark",
            FrequencyScale::Erb => "erb",
        }
    }

    /// Hz ↔ scale-domain pair, `None` for the linear axis.
    pub fn mapping(self) -> Option<FrequencyMapping> {
        let (forward, inverse): (fn(f32) -> f32, fn(f32) -> f32) = match self {
            FrequencyScale::Linear => return None,
            FrequencyScale::Logarithmic => (hz_to_log, log_to_hz),
            FrequencyScale::Mel => (hz_to_mel, mel_to_hz),
            FrequencyScale::Bark => (hz_to_bark, bark_to_hz),
            FrequencyScale::Erb => (hz_to_erb, erb_to_hz),
        };
        Some(FrequencyMapping { forward, inverse })
    }
}

impl fmt::Display for FrequencyScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrequencyScale {
    type Err = AnalyzerError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let normalized = match normalized.as_str() {
            "log" => "logarithmic",
            other => other,
        };
        FrequencyScale::ALL
            .into_iter()
            .find(|scale| scale.name() == normalized)
            .ok_or_else(|| AnalyzerError::UnsupportedScale(value.to_owned()))
    }
}

/// Forward (Hz → domain) and inverse (domain → Hz) functions of a scale.
#[derive(Clone, Copy)]
pub struct FrequencyMapping {
    pub forward: fn(f32) -> f32,
    pub inverse: fn(f32) -> f32,
}

impl fmt::Debug for FrequencyMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyMapping").finish_non_exhaustive()
    }
}

pub fn hz_to_log(hz: f32) -> f32 {
    hz.log10()
}

pub fn log_to_hz(value: f32) -> f32 {
    10.0f32.powf(value)
}

pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Traunmüller's closed-form Bark approximation.
pub fn hz_to_bark(hz: f32) -> f32 {
    26.81 * hz / (1960.0 + hz) - 0.53
}

pub fn bark_to_hz(bark: f32) -> f32 {
    1960.0 * (bark + 0.53) / (26.28 - bark)
}

/// Glasberg & Moore ERB-rate.
pub fn hz_to_erb(hz: f32) -> f32 {
    21.4 * (1.0 + 0.004_37 * hz).log10()
}

pub fn erb_to_hz(erb: f32) -> f32 {
    (10.0f32.powf(erb / 21.4) - 1.0) / 0.004_37
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_invert_each_other() {
        for scale in FrequencyScale::ALL {
            let Some(mapping) = scale.mapping() else {
                assert_eq!(scale, FrequencyScale::Linear);
                continue;
            };
            for hz in [1.0f32, 440.0, 12_000.0] {
                let back = (mapping.inverse)((mapping.forward)(hz));
                assert!(
                    (back - hz).abs() / hz < 1e-3,
                    "{scale}: {hz} Hz came back as {back}"
                );
            }
        }
    }

    #[test]
    fn mel_reference_point() {
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 0.5);
    }

    #[test]
    fn forward_maps_are_increasing() {
        for scale in FrequencyScale::ALL {
            if let Some(mapping) = scale.mapping() {
                assert!((mapping.forward)(100.0) < (mapping.forward)(1000.0));
            }
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!("ERB".parse::<FrequencyScale>().unwrap(), FrequencyScale::Erb);
        assert_eq!(
            "log".parse::<FrequencyScale>().unwrap(),
            FrequencyScale::Logarithmic
        );
        assert!(matches!(
            "octave".parse::<FrequencyScale>(),
            Err(AnalyzerError::UnsupportedScale(_))
        ));
    }
}
