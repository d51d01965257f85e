//! Dependency management commands

use console::style;
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use xpkg_core::{Dependency, OsFs, ParsedPackage, ProjectMeta, VersionConstraint};
use xpkg_repo::{Context, RepoError};

use crate::error::{CliError, Result};
use crate::util::{self, GlobalOptions};

/// Fetch a package and its dependencies into the cache, then record it in
/// the project meta file when there is one
pub async fn add(
    ctx: &Context,
    opts: &GlobalOptions<'_>,
    package: &str,
    package_type: Option<&str>,
    project_dir: &Path,
) -> Result<()> {
    let dep = match package_type {
        Some(kind) => Dependency::with_type(package, kind).map_err(|e| {
            CliError::input_with_help(
                e.to_string(),
                "--type takes provider, configuration or function",
            )
        })?,
        None => Dependency::from_reference(package)?,
    };
    let manager = util::manager(opts)?;

    let (resolved, packages) =
        with_spinner(format!("Resolving {dep}"), manager.add_all(ctx, &dep)).await?;

    println!(
        "{} {} {} ({})",
        style("✓").green().bold(),
        style(&resolved.package).cyan(),
        style(&resolved.version).bold(),
        resolved.package_type
    );
    print_dependencies(&packages);

    let fs = OsFs::new();
    match ProjectMeta::find(&fs, project_dir) {
        Some(path) => {
            let mut meta = ProjectMeta::load(&fs, &path)?;
            meta.upsert(&project_entry(&dep, &resolved.version, resolved.package_type)?)?;
            meta.save(&fs, &path)?;
            println!("Updated {}", display_name(&path));
        }
        None => {
            tracing::debug!(
                dir = %project_dir.display(),
                "no project meta file; nothing to update"
            );
        }
    }

    Ok(())
}

/// Fetch every dependency listed in the project meta file
pub async fn update_cache(
    ctx: &Context,
    opts: &GlobalOptions<'_>,
    project_dir: &Path,
) -> Result<()> {
    let fs = OsFs::new();
    let path = ProjectMeta::find(&fs, project_dir).ok_or_else(|| RepoError::InvalidProject {
        message: format!("no crossplane.yaml or upbound.yaml in {}", project_dir.display()),
    })?;
    let meta = ProjectMeta::load(&fs, &path)?;
    let deps = meta.depends_on()?;

    if deps.is_empty() {
        println!("No dependencies declared in {}", display_name(&path));
        return Ok(());
    }

    let manager = util::manager(opts)?;
    let resolutions = with_spinner(
        format!("Resolving {} dependencies", deps.len()),
        manager.add_many(ctx, &deps),
    )
    .await?;

    let total: usize = resolutions.iter().map(|(_, packages)| packages.len()).sum();
    for (resolved, _) in &resolutions {
        println!("  {} {}", style("✓").green(), resolved);
    }
    println!(
        "Cache updated: {} dependencies, {} packages",
        resolutions.len(),
        total
    );
    Ok(())
}

/// Remove every cached package
pub fn clean_cache(opts: &GlobalOptions<'_>) -> Result<()> {
    let (_, cache) = util::open_cache(opts)?;
    cache.clean()?;
    println!("Cleaned package cache at {}", cache.root().display());
    Ok(())
}

/// Resolve a package from the cache alone
pub async fn resolve(ctx: &Context, opts: &GlobalOptions<'_>, package: &str) -> Result<()> {
    let dep = Dependency::from_reference(package)?;
    let manager = util::manager(opts)?;

    let (resolved, packages) = manager.resolve(ctx, &dep).await?;
    let root = packages
        .first()
        .ok_or_else(|| {
            CliError::internal(format!("resolution of {resolved} returned no packages"))
        })?;

    println!("{}", style(&resolved).cyan().bold());
    println!("  type:    {}", resolved.package_type);
    println!("  digest:  {}", util::short_digest(&root.digest));
    println!("  objects: {}", root.objects.len());
    print_dependencies(&packages);
    Ok(())
}

#[derive(Debug, Serialize)]
struct CacheListing {
    package: String,
    version: String,
    path: PathBuf,
}

/// List cached package versions
pub fn list_cache(opts: &GlobalOptions<'_>, json: bool) -> Result<()> {
    let (_, cache) = util::open_cache(opts)?;
    let entries = cache.entries()?;

    if json {
        let listing: Vec<CacheListing> = entries
            .iter()
            .map(|key| CacheListing {
                package: key.source(),
                version: key.version.clone(),
                path: cache.path_for(key),
            })
            .collect();
        let out = serde_json::to_string_pretty(&listing)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{out}");
        return Ok(());
    }

    if entries.is_empty() {
        println!("Package cache is empty ({})", cache.root().display());
        return Ok(());
    }

    let width = entries.iter().map(|k| k.source().len()).max().unwrap_or(0);
    println!("{:<width$}  {}", style("PACKAGE").bold(), style("VERSION").bold());
    for key in &entries {
        println!("{:<width$}  {}", key.source(), key.version);
    }
    Ok(())
}

/// The entry written to `spec.dependsOn`: the constraint as the user gave it,
/// or the resolved version when they asked for the latest one
fn project_entry(
    dep: &Dependency,
    version: &str,
    resolved_type: xpkg_core::PackageType,
) -> Result<Dependency> {
    let constraints = match dep.reference()?.constraint() {
        VersionConstraint::Latest => version.to_string(),
        other => other.as_str().to_string(),
    };
    Ok(Dependency::new(
        dep.package.clone(),
        Some(dep.package_type.unwrap_or(resolved_type)),
        constraints,
    ))
}

fn print_dependencies(packages: &[std::sync::Arc<ParsedPackage>]) {
    if packages.len() <= 1 {
        return;
    }
    println!("  dependencies:");
    for package in &packages[1..] {
        println!(
            "    {} {}@{} ({})",
            style("→").blue(),
            package.source(),
            package.version,
            package.package_type()
        );
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn with_spinner<T>(
    message: String,
    fut: impl std::future::Future<Output = xpkg_repo::Result<T>>,
) -> Result<T> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = fut.await;
    spinner.finish_and_clear();
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpkg_core::PackageType;

    #[test]
    fn test_project_entry_pins_latest() {
        let dep = Dependency::from_reference("xpkg.upbound.io/org/provider-a").unwrap();
        let entry = project_entry(&dep, "v0.3.0", PackageType::Provider).unwrap();
        assert_eq!(entry.constraints, "v0.3.0");
        assert_eq!(entry.package_type, Some(PackageType::Provider));
        assert_eq!(entry.package, "xpkg.upbound.io/org/provider-a");
    }

    #[test]
    fn test_project_entry_keeps_range() {
        let dep = Dependency::with_type("org/configuration-b@>=v1.0.0", "Configuration").unwrap();
        let entry = project_entry(&dep, "v1.4.0", PackageType::Provider).unwrap();
        assert_eq!(entry.constraints, ">=v1.0.0");
        assert_eq!(entry.package_type, Some(PackageType::Configuration));
    }
}
