//! Error types for the srtrain core library.
//!
//! Uses `thiserror` for public API error types covering option parsing,
//! experiment layout and resume-state handling.

use std::path::PathBuf;

/// Top-level error type for the srtrain core library.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Options error: {0}")]
    Options(#[from] OptionsError),

    #[error("Resume error: {0}")]
    Resume(#[from] ResumeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised while loading and normalizing an option file.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("Option file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Malformed YAML: {message}")]
    Malformed { message: String },

    #[error("Missing required option: {field}")]
    MissingField { field: String },

    #[error("Invalid option '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Override '{entry}' is not of the form key:sub=value")]
    MalformedOverride { entry: String },

    #[error("Override '{entry}' targets unknown key '{key}'")]
    UnknownOverrideKey { entry: String, key: String },

    #[error("Dataset phase {phase} is not recognized.")]
    UnknownPhase { phase: String },

    #[error("Environment variable {var} is not a valid integer: {value}")]
    BadEnv { var: String, value: String },
}

/// Errors from locating or reading a resume state.
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error("Resume state not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Resume state {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl OptionsError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

impl From<serde_yaml::Error> for OptionsError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Malformed {
            message: err.to_string(),
        }
    }
}
