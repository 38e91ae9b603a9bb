//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// An enum-valued config field held a string that matches none of its
    /// recognized variants (e.g. `quality_mode = "Turbo"`).
    #[error("unknown value '{value}' for field '{field}'")]
    UnknownVariant {
        /// The config field whose value was unrecognized.
        field: String,
        /// The offending value.
        value: String,
    },

    /// A numeric field fell outside its valid range.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue {
        /// The config field that failed validation.
        field: String,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile { path: path.into(), source }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile { path: path.into(), source }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir { path: path.into(), source }
    }

    /// Create an unknown-variant error.
    pub fn unknown_variant(field: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigError::UnknownVariant { field: field.into(), value: value.into() }
    }

    /// Create an invalid-value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue { field: field.into(), reason: reason.into() }
    }
}

impl From<ConfigError> for libetude_core::error::LibetudeError {
    fn from(err: ConfigError) -> Self {
        use libetude_core::error::LibetudeError;
        match err {
            ConfigError::ReadFile { .. } | ConfigError::WriteFile { .. } | ConfigError::CreateDir { .. } => {
                LibetudeError::io(err.to_string())
            }
            ConfigError::TomlParse(_) | ConfigError::TomlSerialize(_) => LibetudeError::invalid_format(err.to_string()),
            ConfigError::UnknownVariant { .. } | ConfigError::InvalidValue { .. } => {
                LibetudeError::invalid_argument(err.to_string())
            }
        }
    }
}
