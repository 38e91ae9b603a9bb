//! Text-to-audio and note-to-audio synthesis.
//!
//! There is no neural acoustic model in this crate (spec's engine API is a
//! thin shell over the WORLD vocoder); `synthesize_text`/`synthesize_singing`
//! build a placeholder prosody contour from the requested pitch/duration and
//! run it through [`libetude_world::synth::synthesize`] directly, so the
//! WORLD vocoder backend itself can be exercised end-to-end without a model.

use std::path::PathBuf;

use clap::Args;
use libetude_world::{WorldConfig, WorldParameters};

use super::common::write_wav_mono;

#[derive(Args)]
pub struct SynthesizeArgs {
    /// Text to "speak" (only its length drives the placeholder duration)
    #[arg(value_name = "TEXT")]
    text: String,

    /// Output WAV file
    #[arg(short, long, default_value = "out.wav")]
    output: PathBuf,

    /// Output sample rate
    #[arg(long, default_value_t = 24000)]
    sample_rate: u32,

    /// Base pitch, in Hz
    #[arg(long, default_value_t = 220.0)]
    pitch_hz: f64,

    /// Seconds of audio per character of input text
    #[arg(long, default_value_t = 0.08)]
    seconds_per_char: f64,
}

pub fn run(args: SynthesizeArgs) -> anyhow::Result<()> {
    let chars = args.text.chars().count().max(1);
    let duration_secs = chars as f64 * args.seconds_per_char;

    println!("Synthesizing {} chars (~{:.2}s) at {} Hz...", chars, duration_secs, args.sample_rate);

    let config = WorldConfig::new(args.sample_rate);
    let audio_length = (duration_secs * args.sample_rate as f64).round() as usize;
    let params = placeholder_params(config, audio_length, args.pitch_hz)?;
    let waveform = libetude_world::synth::synthesize(&params).map_err(|e| anyhow::anyhow!("{e}"))?;

    write_wav_mono(&args.output, &waveform, args.sample_rate)?;
    println!("Wrote {} samples to {}", waveform.len(), args.output.display());
    Ok(())
}

#[derive(Args)]
pub struct SingArgs {
    /// Comma-separated `note_hz:duration_secs` pairs, e.g. "440:0.5,523.25:0.5"
    #[arg(value_name = "NOTES")]
    notes: String,

    /// Output WAV file
    #[arg(short, long, default_value = "out.wav")]
    output: PathBuf,

    /// Output sample rate
    #[arg(long, default_value_t = 24000)]
    sample_rate: u32,
}

pub fn run_sing(args: SingArgs) -> anyhow::Result<()> {
    let notes = parse_notes(&args.notes)?;
    let config = WorldConfig::new(args.sample_rate);
    let total_secs: f64 = notes.iter().map(|(_, d)| d).sum();
    let audio_length = (total_secs * args.sample_rate as f64).round() as usize;

    println!("Synthesizing {} note(s) (~{:.2}s) at {} Hz...", notes.len(), total_secs, args.sample_rate);

    let mut params = WorldParameters::zeroed(config, audio_length).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut elapsed = 0.0;
    for (hz, dur) in &notes {
        fill_note(&mut params, elapsed, elapsed + dur, *hz);
        elapsed += dur;
    }

    let waveform = libetude_world::synth::synthesize(&params).map_err(|e| anyhow::anyhow!("{e}"))?;
    write_wav_mono(&args.output, &waveform, args.sample_rate)?;
    println!("Wrote {} samples to {}", waveform.len(), args.output.display());
    Ok(())
}

fn parse_notes(spec: &str) -> anyhow::Result<Vec<(f64, f64)>> {
    spec.split(',')
        .map(|part| {
            let (hz, dur) = part
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("invalid note '{part}' (expected hz:seconds)"))?;
            Ok((hz.trim().parse::<f64>()?, dur.trim().parse::<f64>()?))
        })
        .collect()
}

/// Builds a flat-envelope, constant-pitch `WorldParameters` bundle: every
/// frame is voiced at `pitch_hz` with a single broad formant and low
/// aperiodicity, close enough to a sung vowel for the vocoder's overlap-add
/// synthesis to produce an audible, continuously-voiced tone.
fn placeholder_params(config: WorldConfig, audio_length: usize, pitch_hz: f64) -> anyhow::Result<WorldParameters> {
    let mut params = WorldParameters::zeroed(config, audio_length).map_err(|e| anyhow::anyhow!("{e}"))?;
    let n = params.f0.len();
    fill_note(&mut params, 0.0, n as f64 * config.frame_period / 1000.0, pitch_hz);
    Ok(params)
}

fn fill_note(params: &mut WorldParameters, start_secs: f64, end_secs: f64, pitch_hz: f64) {
    let bins = params.config.fft_size / 2 + 1;
    for t in 0..params.f0.len() {
        let time = params.time_axis[t];
        if time < start_secs || time >= end_secs {
            continue;
        }
        params.f0[t] = pitch_hz.clamp(params.config.f0_floor, params.config.f0_ceil);
        params.aperiodicity[t] = vec![0.1; bins];
        params.spectrogram[t] = formant_envelope(bins, params.config.sample_rate, pitch_hz);
    }
}

/// A single broad-formant envelope centered near `pitch_hz`'s third
/// harmonic, shaped like a relaxed open vowel.
fn formant_envelope(bins: usize, sample_rate: u32, pitch_hz: f64) -> Vec<f64> {
    let formant_hz = (pitch_hz * 3.0).min(sample_rate as f64 / 2.5);
    let bandwidth_hz = 400.0;
    (0..bins)
        .map(|b| {
            let hz = b as f64 * sample_rate as f64 / (2.0 * (bins - 1) as f64).max(1.0);
            let distance = (hz - formant_hz) / bandwidth_hz;
            (-0.5 * distance * distance).exp().max(1e-4)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_notes_reads_comma_separated_pairs() {
        let notes = parse_notes("440:0.5, 523.25:0.25").unwrap();
        assert_eq!(notes, vec![(440.0, 0.5), (523.25, 0.25)]);
    }

    #[test]
    fn parse_notes_rejects_missing_colon() {
        assert!(parse_notes("440").is_err());
    }

    #[test]
    fn placeholder_params_are_fully_voiced_and_valid() {
        let config = WorldConfig::new(16000);
        let params = placeholder_params(config, 8000, 220.0).unwrap();
        params.validate().unwrap();
        assert!((0..params.f0.len()).all(|t| params.is_voiced(t)));
    }

    #[test]
    fn fill_note_only_touches_frames_in_range() {
        let config = WorldConfig::new(16000);
        let mut params = WorldParameters::zeroed(config, 16000).unwrap();
        fill_note(&mut params, 0.1, 0.2, 300.0);
        let touched = params.f0.iter().filter(|&&f| f > 0.0).count();
        assert!(touched > 0 && touched < params.f0.len());
    }
}
