//! Error types for registry, cache and resolution operations

use thiserror::Error;
use xpkg_core::CoreError;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Reference Errors ============
    #[error("Invalid package reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    // ============ Registry Errors ============
    #[error("No version of {package} satisfies '{constraint}' (available: {available})")]
    VersionNotFound {
        package: String,
        constraint: String,
        available: String,
    },

    #[error("Registry unavailable for {package}: {message}")]
    RegistryUnavailable { package: String, message: String },

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    // ============ Package Errors ============
    #[error("Malformed package {package}: {message}")]
    MalformedPackage { package: String, message: String },

    #[error("Package {package} failed {kind} lint:\n{}", .violations.join("\n"))]
    PackageLintFailed {
        package: String,
        kind: String,
        violations: Vec<String>,
    },

    // ============ Cache Errors ============
    #[error("{package}@{constraint} is not in the package cache")]
    NotCached { package: String, constraint: String },

    #[error("Failed to write cache entry {path}: {message}")]
    CacheWriteFailed { path: String, message: String },

    // ============ Resolution Errors ============
    #[error("Dependency cycle detected: {cycle}")]
    DependencyCycle { cycle: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation exceeded its deadline")]
    DeadlineExceeded,

    // ============ Configuration Errors ============
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid project meta file: {message}")]
    InvalidProject { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Attach a package name to errors raised before it was known
    pub fn for_package(self, name: &str) -> Self {
        match self {
            RepoError::MalformedPackage { package, message } if package.is_empty() => {
                RepoError::MalformedPackage {
                    package: name.to_string(),
                    message,
                }
            }
            RepoError::PackageLintFailed {
                package,
                kind,
                violations,
            } if package.is_empty() => RepoError::PackageLintFailed {
                package: name.to_string(),
                kind,
                violations,
            },
            other => other,
        }
    }

    pub fn malformed(package: impl Into<String>, message: impl Into<String>) -> Self {
        RepoError::MalformedPackage {
            package: package.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from talking to a registry
    pub fn is_registry_error(&self) -> bool {
        matches!(
            self,
            RepoError::RegistryUnavailable { .. } | RepoError::AuthFailed { .. }
        )
    }
}

impl From<CoreError> for RepoError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidReference { reference, reason } => {
                RepoError::InvalidReference { reference, reason }
            }
            CoreError::InvalidConstraint { constraint, reason } => RepoError::InvalidReference {
                reference: constraint,
                reason,
            },
            CoreError::MalformedPackage { message } => RepoError::MalformedPackage {
                package: String::new(),
                message,
            },
            CoreError::LintFailed { kind, violations } => RepoError::PackageLintFailed {
                package: String::new(),
                kind,
                violations,
            },
            e @ (CoreError::UnknownKind { .. } | CoreError::Conversion { .. }) => {
                RepoError::MalformedPackage {
                    package: String::new(),
                    message: e.to_string(),
                }
            }
            e @ (CoreError::UnsupportedMeta { .. } | CoreError::DuplicateDependency { .. }) => {
                RepoError::InvalidProject {
                    message: e.to_string(),
                }
            }
            CoreError::YamlParse(e) => RepoError::Serialization(e.to_string()),
            CoreError::JsonParse(e) => RepoError::Serialization(e.to_string()),
            CoreError::Io(e) => RepoError::Io(e),
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_kinds() {
        let lint: RepoError = CoreError::LintFailed {
            kind: "Provider".to_string(),
            violations: vec!["metadata.name is required".to_string()],
        }
        .into();
        let lint = lint.for_package("org/provider-x");
        assert!(matches!(
            lint,
            RepoError::PackageLintFailed { ref package, .. } if package == "org/provider-x"
        ));

        let reference: RepoError = CoreError::InvalidReference {
            reference: "Bad/Ref".to_string(),
            reason: "uppercase".to_string(),
        }
        .into();
        assert!(matches!(reference, RepoError::InvalidReference { .. }));

        let malformed: RepoError = CoreError::malformed("no meta").into();
        assert!(malformed.for_package("a/b").to_string().contains("a/b"));
    }

    #[test]
    fn test_for_package_keeps_existing_name() {
        let err = RepoError::malformed("org/first", "broken").for_package("org/second");
        assert!(err.to_string().contains("org/first"));
    }
}
