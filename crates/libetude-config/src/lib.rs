//! Configuration and path management for the LibEtude runtime.
//!
//! This crate provides the structured parameter objects the engine API
//! accepts at creation time (spec §6) plus platform-specific paths for
//! locating model files and cache directories.
//!
//! # Features
//!
//! - **Quality/DSP config**: `QualityMode`, `MelScaleType`, `F0Algorithm`,
//!   bundled into a TOML-serializable `RuntimeConfig`.
//! - **Paths**: Platform-specific model/cache/config directories.
//!
//! # Example
//!
//! ```rust,no_run
//! use libetude_config::{RuntimeConfig, QualityMode, user_config_dir};
//!
//! let mut config = RuntimeConfig::default();
//! config.quality_mode = QualityMode::High;
//!
//! let path = user_config_dir().join("runtime.toml");
//! config.save(&path).unwrap();
//! ```

mod error;
mod quality;

/// Platform-specific paths for model files, presets, and configuration.
pub mod paths;

pub use error::ConfigError;
pub use paths::{
    ensure_user_config_dir, ensure_user_presets_dir, find_preset, list_all_presets,
    list_system_presets, list_user_presets, preset_name_from_path, system_presets_dir,
    user_config_dir, user_presets_dir,
};
pub use quality::{F0Algorithm, MelScaleType, QualityMode, RuntimeConfig};
