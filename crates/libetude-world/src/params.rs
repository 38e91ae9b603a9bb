//! The shared `WorldParameters` bundle produced by analysis and consumed by
//! synthesis.

use libetude_core::error::{LibetudeError, Result};
use serde::{Deserialize, Serialize};

/// Sample rate, analysis, and FFT configuration shared by every WORLD stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub sample_rate: u32,
    /// Analysis frame stride, in milliseconds.
    pub frame_period: f64,
    pub f0_floor: f64,
    pub f0_ceil: f64,
    pub fft_size: usize,
}

impl WorldConfig {
    /// Sensible defaults matching the reference WORLD vocoder's own
    /// defaults (200 Hz ceiling headroom for singing voice, 5ms frames).
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_period: 5.0,
            f0_floor: 71.0,
            f0_ceil: 800.0,
            fft_size: default_fft_size(sample_rate, 71.0),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(LibetudeError::invalid_argument("sample_rate must be non-zero"));
        }
        if self.frame_period <= 0.0 {
            return Err(LibetudeError::invalid_argument("frame_period must be positive"));
        }
        if self.f0_floor <= 0.0 || self.f0_ceil <= self.f0_floor {
            return Err(LibetudeError::invalid_argument("require 0 < f0_floor < f0_ceil"));
        }
        if !self.fft_size.is_power_of_two() {
            return Err(LibetudeError::invalid_argument("fft_size must be a power of two"));
        }
        Ok(())
    }

    /// Frame stride in samples.
    pub fn stride_samples(&self) -> usize {
        (self.frame_period * self.sample_rate as f64 / 1000.0).round() as usize
    }
}

/// The smallest power-of-two FFT size covering 3 pitch periods at `f0_floor`,
/// matching the reference WORLD implementation's sizing rule.
fn default_fft_size(sample_rate: u32, f0_floor: f64) -> usize {
    let period_samples = 3.0 * sample_rate as f64 / f0_floor;
    (period_samples.log2().ceil().exp2() as usize).max(256)
}

/// F0 sequence + time axis + spectrogram + aperiodicity, the full analysis
/// bundle a synthesizer consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldParameters {
    pub config: WorldConfig,
    pub audio_length: usize,
    /// `f0[i]` is 0 for an unvoiced frame, else within `[f0_floor, f0_ceil]`.
    pub f0: Vec<f64>,
    /// `time_axis[i]` is the frame center, in seconds.
    pub time_axis: Vec<f64>,
    /// `spectrogram[t][0..fft_size/2]`, non-negative.
    pub spectrogram: Vec<Vec<f64>>,
    /// `aperiodicity[t][0..fft_size/2]`, in `[0, 1]`.
    pub aperiodicity: Vec<Vec<f64>>,
}

impl WorldParameters {
    /// The number of analysis frames implied by `config`/`audio_length`,
    /// per the spec invariant
    /// `f0_length == ceil(audio_length / (sample_rate * frame_period/1000)) + 1`.
    pub fn f0_length(config: &WorldConfig, audio_length: usize) -> usize {
        let stride = config.stride_samples().max(1);
        audio_length.div_ceil(stride) + 1
    }

    /// Allocates an all-zero bundle of the correct shape for `config` and
    /// `audio_length`; analysis stages fill it in place.
    pub fn zeroed(config: WorldConfig, audio_length: usize) -> Result<Self> {
        config.validate()?;
        let f0_length = Self::f0_length(&config, audio_length);
        let bins = config.fft_size / 2 + 1;
        let stride_secs = config.frame_period / 1000.0;
        Ok(Self {
            config,
            audio_length,
            f0: alloc_vec(f0_length, 0.0),
            time_axis: (0..f0_length).map(|i| i as f64 * stride_secs).collect(),
            spectrogram: (0..f0_length).map(|_| alloc_vec(bins, 0.0)).collect(),
            aperiodicity: (0..f0_length).map(|_| alloc_vec(bins, 1.0)).collect(),
        })
    }

    /// Checks the cross-array invariants: equal leading dimension, finite
    /// values, F0 either zero or within the configured floor/ceil.
    pub fn validate(&self) -> Result<()> {
        let n = self.f0.len();
        if self.time_axis.len() != n || self.spectrogram.len() != n || self.aperiodicity.len() != n {
            return Err(LibetudeError::invalid_argument(
                "f0/time_axis/spectrogram/aperiodicity must share a leading dimension",
            ));
        }
        for &f0 in &self.f0 {
            if !f0.is_finite() {
                return Err(LibetudeError::invalid_argument("f0 contains a non-finite value"));
            }
            if f0 != 0.0 && !(self.config.f0_floor..=self.config.f0_ceil).contains(&f0) {
                return Err(LibetudeError::invalid_argument("voiced f0 outside [f0_floor, f0_ceil]"));
            }
        }
        Ok(())
    }

    /// Whether frame `t` is voiced.
    pub fn is_voiced(&self, t: usize) -> bool {
        self.f0.get(t).is_some_and(|&f| f > 0.0)
    }
}

fn alloc_vec(len: usize, value: f64) -> Vec<f64> {
    vec![value; len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f0_length_matches_spec_formula() {
        let config = WorldConfig::new(48000);
        let stride = config.stride_samples();
        let len = WorldParameters::f0_length(&config, stride * 10);
        assert_eq!(len, 11);
    }

    #[test]
    fn zeroed_bundle_satisfies_invariants() {
        let config = WorldConfig::new(48000);
        let params = WorldParameters::zeroed(config, 48000).unwrap();
        params.validate().unwrap();
        assert_eq!(params.spectrogram[0].len(), config.fft_size / 2 + 1);
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let mut config = WorldConfig::new(48000);
        config.sample_rate = 0;
        assert!(WorldParameters::zeroed(config, 1000).is_err());
    }
}
