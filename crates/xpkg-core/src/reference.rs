//! Package reference parsing
//!
//! A reference names a package repository and, optionally, which version of
//! it is wanted:
//!
//! ```text
//! xpkg.upbound.io/crossplane-contrib/provider-aws              latest
//! xpkg.upbound.io/crossplane-contrib/provider-aws:v0.20.0      exact tag
//! xpkg.upbound.io/crossplane-contrib/provider-aws@>=v0.18.0    semver range
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::version::{self, Constraint};

/// Constraint value meaning "highest semver tag available"
pub const DEFAULT_VERSION: &str = "latest";

const MAX_NAME_LENGTH: usize = 255;

static REPOSITORY_RE: Lazy<Regex> = Lazy::new(|| {
    let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let domain = format!(r"{domain_component}(?:\.{domain_component})*(?::[0-9]+)?");
    let path_component = r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*";
    let pattern = format!(r"^(?:{domain}/)?{path_component}(?:/{path_component})*$");
    Regex::new(&pattern).expect("repository pattern is valid")
});

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag pattern is valid"));

/// Which version of a package is requested
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionConstraint {
    /// A literal image tag that must exist
    ExactTag(String),
    /// A semver range; the highest satisfying tag wins
    SemverRange(String),
    /// The highest semver tag available
    Latest,
}

/// Where a version string came from, which decides how it is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// After `:`, a literal image tag
    Colon,
    /// After `@`, always a semver constraint
    At,
    /// A `dependsOn` version: a semver constraint, or a literal tag when it
    /// is not one
    DependsOn,
}

impl VersionConstraint {
    /// Classify a version string according to how it was introduced
    pub fn classify(raw: &str, delimiter: Delimiter) -> std::result::Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw == DEFAULT_VERSION {
            return Ok(Self::Latest);
        }

        match delimiter {
            Delimiter::Colon => {
                if TAG_RE.is_match(raw) {
                    Ok(Self::ExactTag(raw.to_string()))
                } else {
                    Err(format!("'{raw}' is not a valid tag"))
                }
            }
            Delimiter::At => Constraint::parse(raw)
                .map(|_| Self::SemverRange(raw.to_string()))
                .map_err(|e| e.to_string()),
            Delimiter::DependsOn => match Constraint::parse(raw) {
                Ok(_) => Ok(Self::SemverRange(raw.to_string())),
                Err(_) if !version::is_range_expression(raw) && TAG_RE.is_match(raw) => {
                    Ok(Self::ExactTag(raw.to_string()))
                }
                Err(e) => Err(e.to_string()),
            },
        }
    }

    /// The constraint as written, `latest` for [`VersionConstraint::Latest`]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExactTag(tag) => tag,
            Self::SemverRange(range) => range,
            Self::Latest => DEFAULT_VERSION,
        }
    }

    /// Range form of this constraint, if it is one
    pub fn range(&self) -> Option<Constraint> {
        match self {
            Self::SemverRange(range) => Constraint::parse(range).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed package reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageReference {
    source: String,
    constraint: VersionConstraint,
}

impl PackageReference {
    /// Parse `registry/repo[:tag|@constraint]`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match split_reference(raw) {
            (source, Some((delimiter, suffix))) => Self::build(raw, source, suffix, delimiter),
            (source, None) => Self::build(raw, source, "", Delimiter::At),
        }
    }

    /// Build a reference from a package source and a `dependsOn` version
    pub fn new(source: &str, constraint: &str) -> Result<Self> {
        let display = if constraint.is_empty() {
            source.to_string()
        } else {
            format!("{source}@{constraint}")
        };
        Self::build(&display, source.trim(), constraint, Delimiter::DependsOn)
    }

    fn build(raw: &str, source: &str, constraint: &str, delimiter: Delimiter) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidReference {
            reference: raw.to_string(),
            reason,
        };

        validate_source(source).map_err(&invalid)?;
        let constraint = VersionConstraint::classify(constraint, delimiter).map_err(&invalid)?;

        Ok(Self {
            source: source.to_string(),
            constraint,
        })
    }

    /// The package source without any version, e.g. `xpkg.upbound.io/org/pkg`
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn constraint(&self) -> &VersionConstraint {
        &self.constraint
    }

    /// Registry host, or an empty string when the source has none
    pub fn registry(&self) -> &str {
        match self.source.split_once('/') {
            Some((first, _)) if is_registry_host(first) => first,
            _ => "",
        }
    }

    /// Repository path below the registry
    pub fn repository(&self) -> &str {
        match self.source.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => rest,
            _ => &self.source,
        }
    }

    /// Prefix `registry` when the source does not name one
    pub fn with_default_registry(&self, registry: &str) -> Self {
        if !self.registry().is_empty() || registry.is_empty() {
            return self.clone();
        }
        Self {
            source: format!("{}/{}", registry.trim_end_matches('/'), self.source),
            constraint: self.constraint.clone(),
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            VersionConstraint::Latest => write!(f, "{}", self.source),
            VersionConstraint::ExactTag(tag) => write!(f, "{}:{}", self.source, tag),
            VersionConstraint::SemverRange(range) => write!(f, "{}@{}", self.source, range),
        }
    }
}

impl FromStr for PackageReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split off the version suffix of the last path segment
///
/// `@` wins over `:` when both appear, because `@` always introduces a
/// constraint while `:` doubles as the plain tag separator.
fn split_reference(raw: &str) -> (&str, Option<(Delimiter, &str)>) {
    let last_start = raw.rfind('/').map(|i| i + 1).unwrap_or(0);
    let last = &raw[last_start..];

    let delimiter = match (last.find('@'), last.find(':')) {
        (Some(idx), _) => Some((Delimiter::At, idx)),
        (None, Some(idx)) => Some((Delimiter::Colon, idx)),
        (None, None) => None,
    };
    match delimiter {
        Some((delimiter, idx)) => {
            let split = last_start + idx;
            (&raw[..split], Some((delimiter, &raw[split + 1..])))
        }
        None => (raw, None),
    }
}

fn validate_source(source: &str) -> std::result::Result<(), String> {
    if source.is_empty() {
        return Err("empty package name".to_string());
    }
    if source.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "repository name must not be more than {MAX_NAME_LENGTH} characters"
        ));
    }
    if !REPOSITORY_RE.is_match(source) {
        return Err(format!(
            "'{source}' is not a valid registry/repository path"
        ));
    }
    Ok(())
}

/// Docker's rule: the first component is a host if it has a dot, a port or
/// is `localhost`
fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}
