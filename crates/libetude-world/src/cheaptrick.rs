//! Spectral envelope estimation (CheapTrick).

use libetude_core::error::{LibetudeError, Result};
use rustfft::num_complex::Complex;

use crate::fft::{Fft, Window};
use crate::params::WorldConfig;

/// Cepstral lifter cutoff (negative quefrency fraction, per the reference
/// implementation's default).
const Q1: f64 = -0.15;

/// F0-adaptive window length for a voiced frame: roughly three pitch periods.
fn voiced_window_len(sample_rate: u32, f0: f64) -> usize {
    ((3.0 * sample_rate as f64 / f0).round() as usize).max(32)
}

/// Extracts the frame centered at `center` with `window_len` samples
/// (zero-padded at the signal boundary), applies a Blackman-like window.
fn windowed_frame(signal: &[f32], center: usize, window_len: usize) -> Vec<f32> {
    let half = window_len / 2;
    let mut frame = vec![0.0f32; window_len];
    for i in 0..window_len {
        let src = center as isize - half as isize + i as isize;
        if src >= 0 && (src as usize) < signal.len() {
            frame[i] = signal[src as usize];
        }
    }
    Window::Blackman.apply(&mut frame);
    frame
}

/// Rectangular-window smoothing of the magnitude spectrum, width matching
/// the current frame's F0 (in bins).
fn smooth_by_f0(magnitude: &[f64], bin_width: usize) -> Vec<f64> {
    if bin_width <= 1 {
        return magnitude.to_vec();
    }
    let half = bin_width / 2;
    (0..magnitude.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(magnitude.len());
            magnitude[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

/// Cepstral lifter: removes the low-quefrency harmonic ripple by damping
/// cepstral coefficients beyond the `q1`-derived cutoff.
fn cepstral_lifter(log_spectrum: &[f64], q1: f64) -> Vec<f64> {
    let n = log_spectrum.len();
    // Mirror to a full symmetric spectrum for the cepstral round-trip.
    let mut full: Vec<Complex<f64>> = log_spectrum.iter().map(|&v| Complex::new(v, 0.0)).collect();
    full.extend(log_spectrum[1..n - 1].iter().rev().map(|&v| Complex::new(v, 0.0)));

    let cepstrum = real_fft_like(&full);
    let cutoff = ((q1.abs()) * full.len() as f64).round() as usize;
    let mut liftered = cepstrum;
    for (i, c) in liftered.iter_mut().enumerate() {
        let quefrency = i.min(full.len() - i);
        if quefrency > cutoff {
            *c *= 0.0;
        }
    }
    let restored = real_ifft_like(&liftered);
    restored[..n].to_vec()
}

/// A minimal, self-contained DFT used only for the cepstral round-trip
/// (sizes here are small compared to the main analysis FFT, so a direct
/// transform keeps this module independent of `Fft`'s power-of-two plans).
fn real_fft_like(input: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let n = input.len();
    (0..n)
        .map(|k| {
            let mut sum = Complex::new(0.0, 0.0);
            for (t, &x) in input.iter().enumerate() {
                let angle = -2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
                sum += x * Complex::new(angle.cos(), angle.sin());
            }
            sum
        })
        .collect()
}

fn real_ifft_like(input: &[Complex<f64>]) -> Vec<f64> {
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

/// Estimates one frame's spectral envelope (magnitude, non-negative,
/// `fft_size/2 + 1` bins) centered at `center` with fundamental `f0`
/// (`0.0` for unvoiced).
fn estimate_frame(fft: &Fft, signal: &[f32], center: usize, f0: f64, config: &WorldConfig) -> Vec<f64> {
    let window_len = if f0 > 0.0 {
        voiced_window_len(config.sample_rate, f0)
    } else {
        config.fft_size
    };
    let frame = windowed_frame(signal, center, window_len.min(config.fft_size));
    let spectrum = fft.forward(&frame);
    let magnitude: Vec<f64> = spectrum.iter().map(|c| (c.norm() as f64).max(1e-12)).collect();

    let bin_hz = config.sample_rate as f64 / config.fft_size as f64;
    let bin_width = if f0 > 0.0 { ((f0 / bin_hz).round() as usize).max(1) } else { 1 };
    let smoothed = smooth_by_f0(&magnitude, bin_width);

    let log_spectrum: Vec<f64> = smoothed.iter().map(|&m| m.ln()).collect();
    let liftered = cepstral_lifter(&log_spectrum, Q1);
    liftered.into_iter().map(|v| v.exp().max(0.0)).collect()
}

/// Computes the full `spectrogram[t][0..fft_size/2]` for every frame in
/// `time_axis`, using `f0[t]` to select the voiced/unvoiced window.
pub fn analyze(signal: &[f32], f0: &[f64], time_axis: &[f64], config: &WorldConfig) -> Result<Vec<Vec<f64>>> {
    if f0.len() != time_axis.len() {
        return Err(LibetudeError::invalid_argument("f0 and time_axis must have equal length"));
    }
    let fft = Fft::new(config.fft_size);
    Ok(f0
        .iter()
        .zip(time_axis)
        .map(|(&f0, &t)| {
            let center = (t * config.sample_rate as f64).round() as usize;
            estimate_frame(&fft, signal, center, f0, config)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn analyze_rejects_mismatched_lengths() {
        let config = WorldConfig::new(16000);
        let signal = vec![0.0f32; 1000];
        assert!(analyze(&signal, &[1.0, 2.0], &[0.0], &config).is_err());
    }

    #[test]
    fn spectrogram_is_non_negative_and_right_shaped() {
        let config = WorldConfig::new(16000);
        let n = 4000;
        let signal: Vec<f32> = (0..n).map(|i| (2.0 * PI * 150.0 * i as f32 / 16000.0).sin()).collect();
        let f0 = vec![150.0; 4];
        let time_axis = vec![0.05, 0.1, 0.15, 0.2];
        let spectrogram = analyze(&signal, &f0, &time_axis, &config).unwrap();
        assert_eq!(spectrogram.len(), 4);
        for frame in &spectrogram {
            assert_eq!(frame.len(), config.fft_size / 2 + 1);
            assert!(frame.iter().all(|&v| v >= 0.0 && v.is_finite()));
        }
    }

    #[test]
    fn unvoiced_frame_uses_full_fft_size_window() {
        let config = WorldConfig::new(16000);
        let signal = vec![0.1f32; 4000];
        let spectrogram = analyze(&signal, &[0.0], &[0.1], &config).unwrap();
        assert_eq!(spectrogram[0].len(), config.fft_size / 2 + 1);
    }
}
