//! CLI error types with exit code handling
//!
//! Every library error is folded into a [`CliError`] carrying the help text
//! shown under the message and the process exit code.

use miette::Diagnostic;
use thiserror::Error;
use xpkg_core::CoreError;
use xpkg_repo::RepoError;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Bad package reference or argument
    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Nothing satisfies the request
    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::not_found))]
    NotFound {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::registry))]
    Registry {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::package))]
    Package {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::cycle))]
    Cycle { message: String },

    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Cancelled or past its deadline
    #[error("{message}")]
    #[diagnostic(code(xpkg::cli::interrupted))]
    Interrupted { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(xpkg::cli::io))]
    Io {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(xpkg::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Input { .. } => exit_codes::USAGE_ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Registry { .. } => exit_codes::REGISTRY_ERROR,
            CliError::Package { .. } => exit_codes::PACKAGE_ERROR,
            CliError::Cycle { .. } => exit_codes::CYCLE_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Interrupted { .. } => exit_codes::INTERRUPTED,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        let message = err.to_string();
        match err {
            RepoError::InvalidReference { .. } => CliError::Input {
                message,
                help: Some(
                    "References look like 'registry/org/name', \
                     optionally followed by ':tag' or '@constraint'"
                        .to_string(),
                ),
            },
            RepoError::VersionNotFound { .. } => CliError::NotFound {
                message,
                help: Some(
                    "Loosen the constraint or pick one of the available versions".to_string(),
                ),
            },
            RepoError::NotCached { .. } => CliError::NotFound {
                message,
                help: Some("Run 'xpkg dep add' or 'xpkg dep update-cache' to fetch it".to_string()),
            },
            RepoError::RegistryUnavailable { .. } => CliError::Registry {
                message,
                help: Some("Check network access to the registry and try again".to_string()),
            },
            RepoError::AuthFailed { ref registry, .. } => CliError::Registry {
                help: Some(format!(
                    "Check the credentials for {registry} in your docker config or credential store"
                )),
                message,
            },
            RepoError::MalformedPackage { .. } | RepoError::PackageLintFailed { .. } => {
                CliError::Package {
                    message,
                    help: Some("The package image is invalid; nothing was cached".to_string()),
                }
            }
            RepoError::DependencyCycle { .. } => CliError::Cycle { message },
            RepoError::Cancelled | RepoError::DeadlineExceeded => CliError::Interrupted { message },
            RepoError::InvalidConfig { .. } => CliError::Config {
                message,
                help: Some("Fix the configuration file or pass --config".to_string()),
            },
            RepoError::InvalidProject { .. } => CliError::Config {
                message,
                help: Some(
                    "The project needs a crossplane.yaml or upbound.yaml meta document".to_string(),
                ),
            },
            RepoError::CacheWriteFailed { .. } => CliError::Io {
                message,
                help: Some(
                    "Check permissions on the cache directory or pass --cache-dir".to_string(),
                ),
            },
            RepoError::Io(_) => CliError::Io {
                message,
                help: None,
            },
            RepoError::Serialization(_) => CliError::Internal { message },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        RepoError::from(err).into()
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
            help: None,
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_errors_map_to_exit_codes() {
        let cases = [
            (
                RepoError::NotCached {
                    package: "org/pkg".to_string(),
                    constraint: "latest".to_string(),
                },
                exit_codes::NOT_FOUND,
            ),
            (
                RepoError::AuthFailed {
                    registry: "ghcr.io".to_string(),
                    message: "401".to_string(),
                },
                exit_codes::REGISTRY_ERROR,
            ),
            (
                RepoError::DependencyCycle {
                    cycle: "a -> b -> a".to_string(),
                },
                exit_codes::CYCLE_ERROR,
            ),
            (RepoError::Cancelled, exit_codes::INTERRUPTED),
            (
                RepoError::malformed("org/pkg", "no meta"),
                exit_codes::PACKAGE_ERROR,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(CliError::from(err).exit_code(), code);
        }
    }

    #[test]
    fn test_auth_help_names_registry() {
        let err = CliError::from(RepoError::AuthFailed {
            registry: "ghcr.io".to_string(),
            message: "denied".to_string(),
        });
        match err {
            CliError::Registry { help, .. } => assert!(help.unwrap().contains("ghcr.io")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_reference_is_usage_error() {
        let err = xpkg_core::PackageReference::parse("").unwrap_err();
        assert_eq!(CliError::from(err).exit_code(), exit_codes::USAGE_ERROR);
    }
}
