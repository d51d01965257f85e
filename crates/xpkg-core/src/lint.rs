//! Structural lint of a package's documents

use crate::error::{CoreError, Result};
use crate::meta::{PackageMeta, validate_dependency_version};
use crate::object::PackageObject;
use crate::version::Constraint;

/// Lint a package, failing with every violation found
pub fn lint(meta: &PackageMeta, objects: &[PackageObject]) -> Result<()> {
    let violations = violations(meta, objects);
    if violations.is_empty() {
        return Ok(());
    }
    Err(CoreError::LintFailed {
        kind: meta.package_type().to_string(),
        violations,
    })
}

/// Every lint violation, in document order
pub fn violations(meta: &PackageMeta, objects: &[PackageObject]) -> Vec<String> {
    let mut out = check_meta(meta);

    let allowed: fn(&PackageObject) -> bool = match meta {
        PackageMeta::Provider(_) | PackageMeta::Function(_) => PackageObject::is_crd,
        PackageMeta::Configuration(_) => |o: &PackageObject| o.is_xrd() || o.is_composition(),
    };
    let expected = match meta {
        PackageMeta::Provider(_) | PackageMeta::Function(_) => "CustomResourceDefinitions",
        PackageMeta::Configuration(_) => "CompositeResourceDefinitions and Compositions",
    };

    for object in objects {
        if !allowed(object) {
            out.push(format!(
                "{} '{}' ({}) is not allowed: {} packages may only contain {}",
                object.kind(),
                object.name(),
                object.api_version(),
                meta.package_type(),
                expected,
            ));
        }
    }

    out
}

fn check_meta(meta: &PackageMeta) -> Vec<String> {
    let mut out = Vec::new();

    if meta.name().is_none_or(|n| n.trim().is_empty()) {
        out.push("metadata.name is required".to_string());
    }

    if let Some(version) = meta.crossplane_version() {
        if let Err(e) = Constraint::parse(version) {
            out.push(format!("spec.crossplane.version: {e}"));
        }
    }

    for (i, entry) in meta.depends_on().iter().enumerate() {
        match entry.to_dependency() {
            Ok(dep) => {
                if let Err(reason) = validate_dependency_version(&dep.constraints) {
                    out.push(format!("spec.dependsOn[{i}] ({}): {reason}", dep.package));
                }
            }
            Err(reason) => out.push(format!("spec.dependsOn[{i}]: {reason}")),
        }
    }

    if let PackageMeta::Provider(provider) = meta {
        if let Some(controller) = &provider.spec.controller {
            if controller.image.as_deref().is_some_and(|i| i.trim().is_empty()) {
                out.push("spec.controller.image must not be empty".to_string());
            }
        }
    }

    out
}
