//! Overlap-add synthesis from WORLD parameters, plus a real-time chunked
//! synthesizer for streaming use.

use libetude_core::error::{LibetudeError, Result};
use rustfft::num_complex::Complex;

use crate::fft::{Fft, Window};
use crate::params::WorldParameters;

/// A minimum-phase lift of a magnitude spectrum: approximates the
/// reference implementation's cepstral minimum-phase reconstruction by
/// zeroing the negative-quefrency half of the real cepstrum before
/// returning to the spectral domain, which concentrates energy causally.
fn minimum_phase_spectrum(magnitude: &[f64]) -> Vec<Complex<f64>> {
    let n = magnitude.len();
    let mut full = vec![0.0f64; 2 * (n - 1)];
    for (i, &m) in magnitude.iter().enumerate() {
        full[i] = m.max(1e-12).ln();
    }
    for i in 1..n - 1 {
        full[full.len() - i] = full[i];
    }

    let cepstrum = real_dft(&full);
    let len = cepstrum.len();
    let mut lifted = cepstrum;
    for i in 1..len / 2 {
        lifted[i] *= 2.0;
        lifted[len - i] = Complex::new(0.0, 0.0);
    }

    let log_spectrum = real_idft(&lifted);
    log_spectrum[..n].iter().map(|&v| Complex::from_polar(v.exp(), 0.0)).collect()
}

fn real_dft(input: &[f64]) -> Vec<Complex<f64>> {
    let n = input.len();
    (0..n)
        .map(|k| {
            let mut sum = Complex::new(0.0, 0.0);
            for (t, &x) in input.iter().enumerate() {
                let angle = -2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
                sum += Complex::new(x, 0.0) * Complex::new(angle.cos(), angle.sin());
            }
            sum
        })
        .collect()
}

fn real_idft(input: &[Complex<f64>]) -> Vec<f64> {
    let n = input.len();
    (0..n)
        .map(|t| {
            let mut sum = Complex::new(0.0, 0.0);
            for (k, &x) in input.iter().enumerate() {
                let angle = 2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
                sum += x * Complex::new(angle.cos(), angle.sin());
            }
            (sum / n as f64).re
        })
        .collect()
}

/// A reproducible, cheap pseudo-random generator for per-frame noise —
/// deterministic so tests are stable, unlike `rand`'s thread-local state.
struct NoiseSource(u64);

impl NoiseSource {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_f32(&mut self) -> f32 {
        // xorshift64
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
    }
}

fn synthesize_frame(
    fft: &Fft,
    spectrogram: &[f64],
    aperiodicity: &[f64],
    f0: f64,
    noise: &mut NoiseSource,
) -> Vec<f32> {
    let minimum_phase = minimum_phase_spectrum(spectrogram);
    let n = fft.size();
    let mut spectrum = vec![Complex::new(0.0, 0.0); n / 2 + 1];

    for i in 0..spectrum.len().min(minimum_phase.len()) {
        let periodic_ratio = (1.0 - aperiodicity.get(i).copied().unwrap_or(1.0)).max(0.0);
        let noise_ratio = aperiodicity.get(i).copied().unwrap_or(1.0);
        let magnitude = minimum_phase[i].norm();

        let periodic = minimum_phase[i] * periodic_ratio;
        let noise_phase = noise.next_f32() as f64 * std::f64::consts::PI;
        let noise_component = Complex::from_polar(magnitude * noise_ratio, noise_phase);
        spectrum[i] = periodic + noise_component;
    }

    if f0 <= 0.0 {
        // Unvoiced branch: shaped noise only.
        for (i, value) in spectrum.iter_mut().enumerate() {
            let magnitude = minimum_phase.get(i).map(|c| c.norm()).unwrap_or(0.0);
            let phase = noise.next_f32() as f64 * std::f64::consts::PI;
            *value = Complex::from_polar(magnitude, phase);
        }
    }

    let mut time_domain = fft.inverse(&spectrum);
    Window::Hann.apply(&mut time_domain);
    time_domain
}

/// Synthesizes the full output waveform from `params` by overlap-adding
/// every frame's contribution at its time-axis sample index.
pub fn synthesize(params: &WorldParameters) -> Result<Vec<f32>> {
    params.validate()?;
    let fft = Fft::new(params.config.fft_size);
    let mut output = vec![0.0f32; params.audio_length + params.config.fft_size];
    let mut noise = NoiseSource::new(0x9E3779B97F4A7C15);

    for t in 0..params.f0.len() {
        let frame = synthesize_frame(&fft, &params.spectrogram[t], &params.aperiodicity[t], params.f0[t], &mut noise);
        let center = (params.time_axis[t] * params.config.sample_rate as f64).round() as usize;
        let half = frame.len() / 2;
        for (i, &sample) in frame.iter().enumerate() {
            let idx = center + i;
            if idx >= half && idx - half < output.len() {
                output[idx - half] += sample;
            }
        }
    }

    output.truncate(params.audio_length);
    Ok(output)
}

/// Real-time chunked synthesis lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizerState {
    Idle,
    Running,
}

/// Chunked synthesizer: produces `chunk_size`-sample blocks, carrying the
/// overhanging tail of each frame forward in an internal overlap buffer.
pub struct RealtimeSynthesizer {
    params: WorldParameters,
    fft: Fft,
    overlap: Vec<f32>,
    cursor: usize,
    next_frame: usize,
    noise: NoiseSource,
    state: SynthesizerState,
}

impl RealtimeSynthesizer {
    /// Initializes a chunked synthesizer over `params`. `chunk_size` only
    /// affects how many samples [`Self::process`] emits per call; it does
    /// not change the overlap-add math.
    pub fn init(params: WorldParameters, _chunk_size: usize) -> Result<Self> {
        params.validate()?;
        let overlap_len = params.config.fft_size;
        let fft = Fft::new(params.config.fft_size);
        Ok(Self {
            params,
            fft,
            overlap: vec![0.0; overlap_len],
            cursor: 0,
            next_frame: 0,
            noise: NoiseSource::new(0x243F6A8885A308D3),
            state: SynthesizerState::Idle,
        })
    }

    pub fn state(&self) -> SynthesizerState {
        self.state
    }

    /// Advances synthesis by `chunk_size` samples, writing them into
    /// `chunk_out` (which must be exactly `chunk_size` long).
    pub fn process(&mut self, chunk_out: &mut [f32], chunk_size: usize) -> Result<()> {
        if chunk_out.len() != chunk_size {
            return Err(LibetudeError::invalid_argument("chunk_out length must equal chunk_size"));
        }
        self.state = SynthesizerState::Running;

        let chunk_start = self.cursor;
        let chunk_end = chunk_start + chunk_size;

        // Mix in every frame whose window overlaps [chunk_start, chunk_end).
        while self.next_frame < self.params.f0.len() {
            let center =
                (self.params.time_axis[self.next_frame] * self.params.config.sample_rate as f64).round() as usize;
            let half = self.params.config.fft_size / 2;
            if center.saturating_sub(half) >= chunk_end {
                break;
            }
            let frame = synthesize_frame(
                &self.fft,
                &self.params.spectrogram[self.next_frame],
                &self.params.aperiodicity[self.next_frame],
                self.params.f0[self.next_frame],
                &mut self.noise,
            );
            for (i, &sample) in frame.iter().enumerate() {
                let abs_idx = center + i;
                if abs_idx >= half {
                    let rel = abs_idx - half;
                    if rel >= chunk_start && rel < self.overlap_horizon(chunk_start) {
                        let overlap_idx = rel - chunk_start;
                        if overlap_idx < self.overlap.len() {
                            self.overlap[overlap_idx] += sample;
                        }
                    }
                }
            }
            self.next_frame += 1;
        }

        let take = chunk_size.min(self.overlap.len());
        chunk_out[..take].copy_from_slice(&self.overlap[..take]);
        for v in &mut chunk_out[take..] {
            *v = 0.0;
        }

        self.overlap.copy_within(chunk_size.min(self.overlap.len()).., 0);
        let drained = chunk_size.min(self.overlap.len());
        let tail_start = self.overlap.len() - drained.min(self.overlap.len());
        for v in &mut self.overlap[tail_start..] {
            *v = 0.0;
        }
        self.cursor += chunk_size;
        Ok(())
    }

    fn overlap_horizon(&self, chunk_start: usize) -> usize {
        chunk_start + self.overlap.len()
    }

    /// Returns to `Idle` and clears the overlap buffer, discarding any
    /// carried-forward tail.
    pub fn reset(&mut self) {
        self.overlap.iter_mut().for_each(|v| *v = 0.0);
        self.cursor = 0;
        self.next_frame = 0;
        self.state = SynthesizerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::WorldConfig;

    #[test]
    fn synthesize_produces_requested_length() {
        let config = WorldConfig::new(16000);
        let params = WorldParameters::zeroed(config, 4000).unwrap();
        let out = synthesize(&params).unwrap();
        assert_eq!(out.len(), 4000);
    }

    #[test]
    fn realtime_synthesizer_starts_idle_and_transitions_to_running() {
        let config = WorldConfig::new(16000);
        let params = WorldParameters::zeroed(config, 4000).unwrap();
        let mut synth = RealtimeSynthesizer::init(params, 256).unwrap();
        assert_eq!(synth.state(), SynthesizerState::Idle);
        let mut chunk = vec![0.0f32; 256];
        synth.process(&mut chunk, 256).unwrap();
        assert_eq!(synth.state(), SynthesizerState::Running);
    }

    #[test]
    fn reset_returns_to_idle() {
        let config = WorldConfig::new(16000);
        let params = WorldParameters::zeroed(config, 4000).unwrap();
        let mut synth = RealtimeSynthesizer::init(params, 256).unwrap();
        let mut chunk = vec![0.0f32; 256];
        synth.process(&mut chunk, 256).unwrap();
        synth.reset();
        assert_eq!(synth.state(), SynthesizerState::Idle);
    }

    #[test]
    fn process_rejects_mismatched_chunk_length() {
        let config = WorldConfig::new(16000);
        let params = WorldParameters::zeroed(config, 4000).unwrap();
        let mut synth = RealtimeSynthesizer::init(params, 256).unwrap();
        let mut chunk = vec![0.0f32; 128];
        assert!(synth.process(&mut chunk, 256).is_err());
    }
}
