//! Aperiodicity estimation (D4C): per-band ratio of smoothed to raw group
//! delay, compared against a threshold.

use libetude_core::error::{LibetudeError, Result};

use crate::fft::{Fft, Window};
use crate::params::WorldConfig;

/// Group-delay smoothing vs. raw comparison threshold (reference default).
const THRESHOLD: f64 = 0.85;

/// Number of aperiodicity bands the group delay is decomposed into.
const NUM_BANDS: usize = 3;

fn group_delay(signal: &[f32], fft: &Fft) -> Vec<f64> {
    let spectrum = fft.forward(signal);
    let magnitude: Vec<f64> = spectrum.iter().map(|c| c.norm() as f64).collect();
    let phase: Vec<f64> = spectrum.iter().map(|c| c.arg() as f64).collect();
    // Static group delay: negative derivative of unwrapped phase w.r.t. bin,
    // weighted by local magnitude so silent bins don't dominate the estimate.
    let unwrapped = unwrap_phase(&phase);
    (0..unwrapped.len())
        .map(|i| {
            let prev = if i == 0 { unwrapped[0] } else { unwrapped[i - 1] };
            let next = if i + 1 < unwrapped.len() { unwrapped[i + 1] } else { unwrapped[i] };
            let delay = -(next - prev) / 2.0;
            delay * magnitude[i].max(1e-9)
        })
        .collect()
}

fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    let mut prev = phase[0];
    out.push(phase[0]);
    for &p in &phase[1..] {
        let mut diff = p - prev;
        while diff > std::f64::consts::PI {
            offset -= 2.0 * std::f64::consts::PI;
            diff -= 2.0 * std::f64::consts::PI;
        }
        while diff < -std::f64::consts::PI {
            offset += 2.0 * std::f64::consts::PI;
            diff += 2.0 * std::f64::consts::PI;
        }
        prev = p;
        out.push(p + offset);
    }
    out
}

fn smooth(values: &[f64], width: usize) -> Vec<f64> {
    let half = width / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            values[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

/// Estimates one frame's aperiodicity curve, `fft_size/2 + 1` bins, each in
/// `[0, 1]`. Unvoiced frames (`f0 == 0`) return all-ones.
fn estimate_frame(fft: &Fft, signal: &[f32], center: usize, f0: f64, config: &WorldConfig) -> Vec<f64> {
    let bins = config.fft_size / 2 + 1;
    if f0 <= 0.0 {
        return vec![1.0; bins];
    }

    let window_len = config.fft_size.min(signal.len().max(1));
    let half = window_len / 2;
    let mut frame = vec![0.0f32; window_len];
    for i in 0..window_len {
        let src = center as isize - half as isize + i as isize;
        if src >= 0 && (src as usize) < signal.len() {
            frame[i] = signal[src as usize];
        }
    }
    Window::Hann.apply(&mut frame);

    let raw_delay = group_delay(&frame, fft);
    let bin_hz = config.sample_rate as f64 / config.fft_size as f64;
    let smooth_width = ((f0 / bin_hz).round() as usize).max(1);
    let smoothed_delay = smooth(&raw_delay, smooth_width);

    let band_width = bins.div_ceil(NUM_BANDS).max(1);
    let mut out = vec![0.0; bins];
    for band_start in (0..bins).step_by(band_width) {
        let band_end = (band_start + band_width).min(bins);
        let raw_energy: f64 = raw_delay[band_start..band_end].iter().map(|v| v.abs()).sum();
        let smooth_energy: f64 = smoothed_delay[band_start..band_end].iter().map(|v| v.abs()).sum();
        let ratio = if raw_energy > 1e-12 { (smooth_energy / raw_energy).min(1.0) } else { 1.0 };
        let aperiodicity = if ratio > THRESHOLD { 1.0 } else { ratio / THRESHOLD };
        for slot in &mut out[band_start..band_end] {
            *slot = aperiodicity.clamp(0.0, 1.0);
        }
    }
    out
}

/// Computes `aperiodicity[t][0..fft_size/2]` for every frame.
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

    #[test]
    fn unvoiced_frames_are_all_ones() {
        let config = WorldConfig::new(16000);
        let signal = vec![0.0f32; 4000];
        let aperiodicity = analyze(&signal, &[0.0], &[0.1], &config).unwrap();
        assert!(aperiodicity[0].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn voiced_frames_are_bounded_zero_one() {
        let config = WorldConfig::new(16000);
        let signal: Vec<f32> = (0..4000)
            .map(|i| (2.0 * std::f32::consts::PI * 150.0 * i as f32 / 16000.0).sin())
            .collect();
        let aperiodicity = analyze(&signal, &[150.0], &[0.1], &config).unwrap();
        assert!(aperiodicity[0].iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let config = WorldConfig::new(16000);
        let signal = vec![0.0f32; 1000];
        assert!(analyze(&signal, &[1.0, 2.0], &[0.0], &config).is_err());
    }
}
