//! Structured configuration objects passed to the engine and pool at
//! creation time (spec §6): quality presets and the mel-scale / F0-algorithm
//! choices that flow through to `libetude-world`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Overall inference quality/speed tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    /// Smallest FFT sizes and thread counts; favors latency.
    Fast,
    /// The default tradeoff.
    Balanced,
    /// Largest analysis windows and full thread pool; favors fidelity.
    High,
}

impl QualityMode {
    /// Parses a quality mode from a case-insensitive name, as accepted by
    /// TOML config files and CLI flags.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "fast" => Ok(QualityMode::Fast),
            "balanced" => Ok(QualityMode::Balanced),
            "high" => Ok(QualityMode::High),
            other => Err(ConfigError::unknown_variant("quality_mode", other)),
        }
    }

    /// The worker-thread count this mode suggests for the executor's
    /// parallel mode, scaled from the available CPU count.
    pub fn suggested_threads(self, available_cpus: usize) -> usize {
        match self {
            QualityMode::Fast => 1,
            QualityMode::Balanced => (available_cpus / 2).max(1),
            QualityMode::High => available_cpus.max(1),
        }
    }
}

/// Mel-scale conversion curve, mirroring `libetude_world::mel::MelScaleType`
/// (kept independent here so `libetude-config` has no dependency on the
/// WORLD pipeline crate; callers convert between the two at the boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MelScaleType {
    Htk,
    Slaney,
}

impl MelScaleType {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_uppercase().as_str() {
            "HTK" => Ok(MelScaleType::Htk),
            "SLANEY" => Ok(MelScaleType::Slaney),
            other => Err(ConfigError::unknown_variant("mel_scale", other)),
        }
    }
}

/// Which F0 extractor the pipeline runs, mirroring
/// `libetude_world::F0Algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum F0Algorithm {
    Dio,
    Harvest,
}

impl F0Algorithm {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_uppercase().as_str() {
            "DIO" => Ok(F0Algorithm::Dio),
            "HARVEST" => Ok(F0Algorithm::Harvest),
            other => Err(ConfigError::unknown_variant("f0_algorithm", other)),
        }
    }
}

/// The full set of structured parameters accepted at engine creation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub sample_rate: u32,
    pub quality_mode: QualityMode,
    pub mel_scale: MelScaleType,
    pub f0_algorithm: F0Algorithm,
    pub n_mels: usize,
    /// Analysis cache cap, in bytes.
    pub cache_max_bytes: u64,
    pub cache_compress: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            quality_mode: QualityMode::Balanced,
            mel_scale: MelScaleType::Htk,
            f0_algorithm: F0Algorithm::Harvest,
            n_mels: 80,
            cache_max_bytes: 256 * 1024 * 1024,
            cache_compress: true,
        }
    }
}

impl RuntimeConfig {
    /// Validates cross-field invariants not expressible in the type system
    /// alone (e.g. `n_mels` must be non-zero).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid_value("sample_rate", "must be non-zero"));
        }
        if self.n_mels == 0 {
            return Err(ConfigError::invalid_value("n_mels", "must be non-zero"));
        }
        Ok(())
    }

    /// Loads a `RuntimeConfig` from a TOML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes and writes this config as TOML.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|e| ConfigError::write_file(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        RuntimeConfig::default().validate().unwrap();
    }

    #[test]
    fn quality_mode_parses_case_insensitively() {
        assert_eq!(QualityMode::parse("FAST").unwrap(), QualityMode::Fast);
        assert_eq!(QualityMode::parse("balanced").unwrap(), QualityMode::Balanced);
        assert!(QualityMode::parse("turbo").is_err());
    }

    #[test]
    fn suggested_threads_scale_with_mode() {
        assert_eq!(QualityMode::Fast.suggested_threads(8), 1);
        assert_eq!(QualityMode::Balanced.suggested_threads(8), 4);
        assert_eq!(QualityMode::High.suggested_threads(8), 8);
    }

    #[test]
    fn round_trips_through_toml() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let config = RuntimeConfig { sample_rate: 16000, ..RuntimeConfig::default() };
        config.save(tmp.path()).unwrap();
        let loaded = RuntimeConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let config = RuntimeConfig { sample_rate: 0, ..RuntimeConfig::default() };
        assert!(config.validate().is_err());
    }
}
