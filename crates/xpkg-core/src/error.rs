//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid package reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("Malformed package: {message}")]
    MalformedPackage { message: String },

    #[error("{kind} package failed lint:\n{}", .violations.join("\n"))]
    LintFailed {
        kind: String,
        violations: Vec<String>,
    },

    #[error("No kind registered for {api_version}, Kind={kind}")]
    UnknownKind { api_version: String, kind: String },

    #[error("Cannot convert {kind} '{name}': {message}")]
    Conversion {
        kind: String,
        name: String,
        message: String,
    },

    #[error("Unsupported meta file: {message}")]
    UnsupportedMeta { message: String },

    #[error("Meta file contains duplicate dependency '{package}'")]
    DuplicateDependency { package: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPackage {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
