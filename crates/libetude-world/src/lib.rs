//! libetude-world - WORLD-derived analysis/synthesis vocoder pipeline
//!
//! Implements the "Graph-over-WORLD" data layer described by the core
//! engine: F0 extraction, spectral envelope and aperiodicity estimation, a
//! mel filterbank, overlap-add synthesis, and an on-disk analysis cache so
//! repeated runs over the same source audio skip re-analysis.
//!
//! - [`params`] - `WorldConfig`/`WorldParameters`, the shared data model
//! - [`f0`] - DIO and Harvest fundamental-frequency extraction
//! - [`cheaptrick`] - spectral envelope estimation
//! - [`d4c`] - aperiodicity estimation
//! - [`synth`] - overlap-add and real-time chunked synthesis
//! - [`mel`] - mel-scale filterbank (dense, sparse, pseudo-inverse)
//! - [`cache`] - SHA-256-keyed on-disk analysis cache
//! - [`fft`] - FFT wrapper with windowing functions, shared by every stage

pub mod cache;
pub mod cheaptrick;
pub mod d4c;
pub mod f0;
pub mod fft;
pub mod mel;
pub mod params;
pub mod synth;

pub use cache::AnalysisCache;
pub use f0::{F0Estimate, dio, harvest};
pub use fft::{Fft, Window};
pub use mel::{CsrEntry, FilterbankCache, MelConfig, MelFilterbank, MelScaleType};
pub use params::{WorldConfig, WorldParameters};
pub use synth::{RealtimeSynthesizer, SynthesizerState, synthesize};

use libetude_core::error::Result;

/// Runs the full analysis pipeline (F0, spectral envelope, aperiodicity)
/// over `signal`, using `config`'s F0 algorithm choice.
pub fn analyze(signal: &[f32], config: &WorldConfig, algorithm: F0Algorithm) -> Result<WorldParameters> {
    let estimate = match algorithm {
        F0Algorithm::Dio => f0::dio(signal, config)?,
        F0Algorithm::Harvest => f0::harvest(signal, config)?,
    };
    let spectrogram = cheaptrick::analyze(signal, &estimate.f0, &estimate.time_axis, config)?;
    let aperiodicity = d4c::analyze(signal, &estimate.f0, &estimate.time_axis, config)?;
    Ok(WorldParameters {
        config: *config,
        audio_length: signal.len(),
        f0: estimate.f0,
        time_axis: estimate.time_axis,
        spectrogram,
        aperiodicity,
    })
}

/// Selects which fundamental-frequency extractor [`analyze`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum F0Algorithm {
    Dio,
    Harvest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_produces_matching_length_arrays() {
        let config = WorldConfig::new(16000);
        let signal: Vec<f32> =
            (0..8000).map(|i| (2.0 * std::f32::consts::PI * 150.0 * i as f32 / 16000.0).sin()).collect();
        let params = analyze(&signal, &config, F0Algorithm::Dio).unwrap();
        assert_eq!(params.f0.len(), params.time_axis.len());
        assert_eq!(params.f0.len(), params.spectrogram.len());
        assert_eq!(params.f0.len(), params.aperiodicity.len());
    }
}
