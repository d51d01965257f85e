//! Semver constraints as written in package metadata
//!
//! Package authors write constraints in the Masterminds style used across the
//! Crossplane ecosystem (`>=v1.2.0 <v2`, `~v0.3`, `>=1.0, <2.0 || 3.x`).
//! These are mapped onto the `semver` crate:
//!
//! - a leading `v` on any version is dropped
//! - comparators may be separated by commas or whitespace
//! - `||` separates alternatives, any of which may match
//! - `a - b` is an inclusive range
//! - a bare version (`1.2.3`) means exactly that version

use semver::{Op, Version, VersionReq};
use std::fmt;

use crate::error::{CoreError, Result};

const OPERATOR_CHARS: &[char] = &['=', '<', '>', '~', '^', '!'];

/// A parsed version constraint
#[derive(Debug, Clone)]
pub struct Constraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidConstraint {
            constraint: expr.to_string(),
            reason,
        };

        if expr.trim().is_empty() {
            return Err(invalid("empty constraint".to_string()));
        }

        let alternatives = expr
            .split("||")
            .map(|alt| {
                let normalized = normalize_alternative(alt).map_err(&invalid)?;
                VersionReq::parse(&normalized).map_err(|e| invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: expr.to_string(),
            alternatives,
        })
    }

    /// Check whether a version satisfies any alternative
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pick the highest tag whose version satisfies this constraint
    ///
    /// Tags that are not semver are never selected.
    pub fn select_highest<'a, I>(&self, tags: I) -> Option<(&'a str, Version)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter()
            .filter_map(|tag| parse_tag_version(tag).map(|v| (tag, v)))
            .filter(|(_, v)| self.matches(v))
            .max_by(|(_, a), (_, b)| a.cmp(b))
    }

    /// The one version this constraint admits, if it is an exact pin
    pub fn exact_version(&self) -> Option<Version> {
        let [req] = self.alternatives.as_slice() else {
            return None;
        };
        let [cmp] = req.comparators.as_slice() else {
            return None;
        };
        if cmp.op != Op::Exact {
            return None;
        }
        Some(Version {
            major: cmp.major,
            minor: cmp.minor?,
            patch: cmp.patch?,
            pre: cmp.pre.clone(),
            build: semver::BuildMetadata::EMPTY,
        })
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Constraint {}

/// Parse an image tag as a semver version, tolerating a leading `v`
pub fn parse_tag_version(tag: &str) -> Option<Version> {
    let trimmed = tag.strip_prefix(['v', 'V']).unwrap_or(tag);
    Version::parse(trimmed).ok()
}

/// Highest semver tag, ignoring tags that do not parse
pub fn highest_version<'a, I>(tags: I) -> Option<(&'a str, Version)>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter_map(|tag| parse_tag_version(tag).map(|v| (tag, v)))
        .max_by(|(_, a), (_, b)| a.cmp(b))
}

/// Whether a constraint string uses range syntax rather than naming a tag
pub fn is_range_expression(expr: &str) -> bool {
    expr.contains(OPERATOR_CHARS)
        || expr.contains(',')
        || expr.contains('*')
        || expr.contains("||")
        || expr.contains(char::is_whitespace)
}

fn normalize_alternative(alt: &str) -> std::result::Result<String, String> {
    let tokens: Vec<&str> = alt
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err("empty alternative".to_string());
    }

    // Glue dangling operators onto the following version: ">= 1.0" -> ">=1.0"
    let mut glued: Vec<String> = Vec::with_capacity(tokens.len());
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        if token.chars().all(|c| OPERATOR_CHARS.contains(&c)) {
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => glued.push(format!("{op}{token}")),
            None => glued.push(token.to_string()),
        }
    }
    if let Some(op) = pending_op {
        return Err(format!("operator '{op}' without a version"));
    }

    let mut comparators = Vec::with_capacity(glued.len());
    let mut i = 0;
    while i < glued.len() {
        // Hyphen range: "1.2 - 1.4"
        if glued.get(i + 1).map(String::as_str) == Some("-") {
            let upper = glued
                .get(i + 2)
                .ok_or_else(|| "hyphen range without upper bound".to_string())?;
            comparators.push(format!(">={}", strip_v(&glued[i])));
            comparators.push(format!("<={}", strip_v(upper)));
            i += 3;
            continue;
        }
        comparators.push(normalize_comparator(&glued[i])?);
        i += 1;
    }

    Ok(comparators.join(", "))
}

fn normalize_comparator(token: &str) -> std::result::Result<String, String> {
    let split = token
        .find(|c: char| !OPERATOR_CHARS.contains(&c))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(split);

    if op == "!=" {
        return Err("'!=' is not supported".to_string());
    }
    if version.is_empty() {
        return Err(format!("operator '{op}' without a version"));
    }

    let version = strip_v(version);
    if matches!(version, "*" | "x" | "X") {
        return Ok("*".to_string());
    }

    // A bare version pins exactly, unlike cargo's default caret
    let op = if op.is_empty() { "=" } else { op };
    Ok(format!("{op}{version}"))
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix(['v', 'V']).unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_range_with_v_prefix() {
        let c = Constraint::parse(">=v0.1.0,<v0.3.0").unwrap();
        assert!(c.matches(&v("0.1.0")));
        assert!(c.matches(&v("0.2.0")));
        assert!(!c.matches(&v("0.3.0")));
    }

    #[test]
    fn test_whitespace_separated_comparators() {
        let c = Constraint::parse(">= 1.2.0 < 2").unwrap();
        assert!(c.matches(&v("1.9.9")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("1.1.0")));
    }

    #[test]
    fn test_alternatives() {
        let c = Constraint::parse("<1.0.0 || >=3.0.0").unwrap();
        assert!(c.matches(&v("0.5.0")));
        assert!(c.matches(&v("3.1.0")));
        assert!(!c.matches(&v("2.0.0")));
    }

    #[test]
    fn test_hyphen_range() {
        let c = Constraint::parse("v1.2.0 - v1.4.0").unwrap();
        assert!(c.matches(&v("1.4.0")));
        assert!(!c.matches(&v("1.4.1")));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let c = Constraint::parse("v1.2.3").unwrap();
        assert!(c.matches(&v("1.2.3")));
        assert!(!c.matches(&v("1.2.4")));
    }

    #[test]
    fn test_exact_version() {
        assert_eq!(Constraint::parse("v1.2.3").unwrap().exact_version(), Some(v("1.2.3")));
        assert_eq!(
            Constraint::parse("=1.0.0-rc.1").unwrap().exact_version(),
            Some(v("1.0.0-rc.1"))
        );
        assert!(Constraint::parse("v1.2").unwrap().exact_version().is_none());
        assert!(Constraint::parse(">=1.2.3").unwrap().exact_version().is_none());
        assert!(Constraint::parse("1.0.0 || 2.0.0").unwrap().exact_version().is_none());
    }

    #[test]
    fn test_wildcard() {
        let c = Constraint::parse("*").unwrap();
        assert!(c.matches(&v("0.0.1")));
        assert!(c.matches(&v("12.0.0")));
    }

    #[test]
    fn test_invalid_constraints() {
        assert!(Constraint::parse("").is_err());
        assert!(Constraint::parse(">=").is_err());
        assert!(Constraint::parse("!=1.0.0").is_err());
        assert!(Constraint::parse(">=banana").is_err());
    }

    #[test]
    fn test_select_highest() {
        let tags = ["v0.1.0", "v0.2.0", "v0.3.0", "main"];
        let c = Constraint::parse(">=v0.1.0,<v0.3.0").unwrap();
        let (tag, version) = c.select_highest(tags.iter().copied()).unwrap();
        assert_eq!(tag, "v0.2.0");
        assert_eq!(version, v("0.2.0"));

        let none = Constraint::parse("<v0.1.0").unwrap();
        assert!(none.select_highest(tags.iter().copied()).is_none());
    }

    #[test]
    fn test_highest_version_ignores_non_semver() {
        let tags = ["v0.1.0", "v0.2.1", "latest-unparseable-tag"];
        let (tag, _) = highest_version(tags.iter().copied()).unwrap();
        assert_eq!(tag, "v0.2.1");
        assert!(highest_version(["main", "latest"].iter().copied()).is_none());
    }

    #[test]
    fn test_is_range_expression() {
        assert!(is_range_expression(">=v1.0.0"));
        assert!(is_range_expression("1.0.0 - 2.0.0"));
        assert!(is_range_expression("1.x || 2.*"));
        assert!(!is_range_expression("v1.0.0"));
        assert!(!is_range_expression("main-abc123"));
    }
}
