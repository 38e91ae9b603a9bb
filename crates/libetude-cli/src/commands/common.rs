//! Shared CLI helpers used across multiple commands.

use std::path::Path;

/// Reads a WAV file, mixing down to mono f32 samples in `[-1, 1]`.
pub fn read_wav_mono(path: &Path) -> anyhow::Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader.samples::<i32>().map(|s| s.map(|v| v as f32 / max)).collect::<Result<_, _>>()?
        }
    };

    let mono = if channels <= 1 {
        samples
    } else {
        samples.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Writes mono f32 samples to a 32-bit float WAV file.
pub fn write_wav_mono(path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Parses a `key=value` string for clap's `value_parser`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("invalid parameter format: '{}' (expected key=value)", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_val_splits_on_first_equals() {
        assert_eq!(parse_key_val("n_mels=80").unwrap(), ("n_mels".to_string(), "80".to_string()));
        assert_eq!(parse_key_val("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
    }

    #[test]
    fn parse_key_val_rejects_missing_equals() {
        assert!(parse_key_val("no_equals_sign").is_err());
    }

    #[test]
    fn wav_round_trips_through_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();

        write_wav_mono(&path, &samples, 16000).unwrap();
        let (read_back, sample_rate) = read_wav_mono(&path).unwrap();

        assert_eq!(sample_rate, 16000);
        assert_eq!(read_back.len(), samples.len());
        for (a, b) in samples.iter().zip(read_back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
