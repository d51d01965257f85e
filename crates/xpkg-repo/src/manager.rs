//! Dependency manager
//!
//! Resolves a dependency and everything it depends on, fetching what the
//! cache does not already hold. The cache is the only memo: a package that
//! is already cached is never fetched again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use xpkg_core::version::{self, Constraint};
use xpkg_core::{Dependency, PackageReference, ParsedPackage, ResolvedDependency, VersionConstraint};

use crate::cache::{CacheKey, LocalCache};
use crate::context::Context;
use crate::error::{RepoError, Result};
use crate::marshaler::Marshaler;
use crate::resolver::ImageResolver;

/// A requested dependency, pinned, plus every package it pulled in
pub type Resolution = (ResolvedDependency, Vec<Arc<ParsedPackage>>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Fetch whatever the cache is missing
    Fetch,
    /// Only read the cache
    CacheOnly,
}

enum Step {
    Enter(Dependency),
    Exit,
}

/// Per-key locks collapsing concurrent fetches of the same package
#[derive(Debug, Default)]
struct InFlight {
    locks: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

impl InFlight {
    fn entry(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }
}

/// Dependency manager
///
/// Cheap to clone; clones share the cache, the fetch limit and the
/// in-flight table.
#[derive(Clone)]
pub struct Manager {
    cache: LocalCache,
    resolver: ImageResolver,
    marshaler: Marshaler,
    default_registry: String,
    fetch_limit: Option<Arc<Semaphore>>,
    in_flight: Option<Arc<InFlight>>,
}

impl Manager {
    pub fn new(cache: LocalCache, resolver: ImageResolver, marshaler: Marshaler) -> Self {
        Self {
            cache,
            resolver,
            marshaler,
            default_registry: crate::config::DEFAULT_REGISTRY.to_string(),
            fetch_limit: None,
            in_flight: Some(Arc::new(InFlight::default())),
        }
    }

    /// Registry used for references that do not name one
    pub fn with_default_registry(mut self, registry: impl Into<String>) -> Self {
        self.default_registry = registry.into();
        self
    }

    /// Bound concurrent registry calls across every clone of this manager
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.fetch_limit = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// Let concurrent misses for the same package fetch independently
    pub fn without_dedup(mut self) -> Self {
        self.in_flight = None;
        self
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Resolve `dep` and its dependencies, fetching whatever is not cached
    ///
    /// The returned packages start with the requested one, followed by its
    /// transitive dependencies in discovery order.
    pub async fn add_all(&self, ctx: &Context, dep: &Dependency) -> Result<Resolution> {
        self.walk(ctx, dep, Mode::Fetch).await
    }

    /// Like [`Manager::add_all`] but only reads the cache
    pub async fn resolve(&self, ctx: &Context, dep: &Dependency) -> Result<Resolution> {
        self.walk(ctx, dep, Mode::CacheOnly).await
    }

    /// [`Manager::add_all`] for each dependency in turn
    pub async fn add_many(&self, ctx: &Context, deps: &[Dependency]) -> Result<Vec<Resolution>> {
        let mut resolutions = Vec::with_capacity(deps.len());
        for dep in deps {
            resolutions.push(self.add_all(ctx, dep).await?);
        }
        Ok(resolutions)
    }

    async fn walk(&self, ctx: &Context, dep: &Dependency, mode: Mode) -> Result<Resolution> {
        let mut stack = vec![Step::Enter(dep.clone())];
        let mut path: Vec<CacheKey> = Vec::new();
        let mut seen: HashSet<CacheKey> = HashSet::new();
        let mut packages: Vec<Arc<ParsedPackage>> = Vec::new();

        while let Some(step) = stack.pop() {
            let dep = match step {
                Step::Exit => {
                    path.pop();
                    continue;
                }
                Step::Enter(dep) => dep,
            };

            if let Some(err) = ctx.err() {
                return Err(err);
            }

            let package = self.one(ctx, &dep, mode).await?;
            let key = CacheKey::for_package(&package);

            if path.contains(&key) {
                let mut cycle: Vec<String> = path.iter().map(ToString::to_string).collect();
                cycle.push(key.to_string());
                return Err(RepoError::DependencyCycle {
                    cycle: cycle.join(" -> "),
                });
            }
            if !seen.insert(key.clone()) {
                continue;
            }

            if let Some(wanted) = dep.package_type {
                if wanted != package.package_type() {
                    tracing::warn!(
                        package = %key,
                        expected = %wanted,
                        actual = %package.package_type(),
                        "package kind differs from the requested kind"
                    );
                }
            }

            path.push(key);
            stack.push(Step::Exit);
            for child in package.dependencies.iter().rev() {
                stack.push(Step::Enter(child.clone()));
            }
            packages.push(package);
        }

        let resolved = packages
            .first()
            .map(|p| p.resolved())
            .ok_or_else(|| RepoError::NotCached {
                package: dep.package.clone(),
                constraint: dep.constraints.clone(),
            })?;
        Ok((resolved, packages))
    }

    async fn one(&self, ctx: &Context, dep: &Dependency, mode: Mode) -> Result<Arc<ParsedPackage>> {
        let reference = dep
            .reference()?
            .with_default_registry(&self.default_registry);
        match mode {
            Mode::Fetch => self.fetch_one(ctx, &reference).await,
            Mode::CacheOnly => self.cached_one(&reference),
        }
    }

    async fn fetch_one(
        &self,
        ctx: &Context,
        reference: &PackageReference,
    ) -> Result<Arc<ParsedPackage>> {
        if let Some(package) = self.cached_pin(reference)? {
            return Ok(package);
        }

        let tag = {
            let _permit = self.permit(ctx).await?;
            self.resolver.select_tag(ctx, reference).await?
        };
        let key = CacheKey::for_reference(reference, &tag);

        let _guard = self.lock(ctx, &key).await?;
        if let Some(package) = self.cache.get(&key) {
            return Ok(package);
        }

        let image = {
            let _permit = self.permit(ctx).await?;
            self.resolver.fetch(ctx, reference, &tag).await?
        };

        let mut package = self.marshaler.from_image(&image)?;
        package.registry = key.registry.clone();
        package.repository = key.repository.clone();
        package.version = key.version.clone();

        self.cache.store(&key, &package)?;
        tracing::info!(package = %key, digest = %package.digest, "added package");
        Ok(Arc::new(package))
    }

    /// A cached package for a reference that names exactly one version
    ///
    /// Pins are answered without listing the registry's tags.
    fn cached_pin(&self, reference: &PackageReference) -> Result<Option<Arc<ParsedPackage>>> {
        let tag = match reference.constraint() {
            VersionConstraint::ExactTag(tag) => tag.clone(),
            VersionConstraint::SemverRange(range) => {
                let Some(pinned) = Constraint::parse(range)?.exact_version() else {
                    return Ok(None);
                };
                let versions = self
                    .cache
                    .versions(reference.registry(), reference.repository())?;
                match versions
                    .into_iter()
                    .find(|tag| version::parse_tag_version(tag).as_ref() == Some(&pinned))
                {
                    Some(tag) => tag,
                    None => return Ok(None),
                }
            }
            VersionConstraint::Latest => return Ok(None),
        };
        Ok(self.cache.get(&CacheKey::for_reference(reference, &tag)))
    }

    fn cached_one(&self, reference: &PackageReference) -> Result<Arc<ParsedPackage>> {
        let not_cached = || RepoError::NotCached {
            package: reference.source().to_string(),
            constraint: reference.constraint().to_string(),
        };

        let version = match reference.constraint() {
            VersionConstraint::ExactTag(tag) => tag.clone(),
            constraint => {
                let versions = self
                    .cache
                    .versions(reference.registry(), reference.repository())?;
                let candidates = versions.iter().map(String::as_str);
                let selected = match constraint {
                    VersionConstraint::SemverRange(range) => {
                        Constraint::parse(range)?.select_highest(candidates)
                    }
                    _ => version::highest_version(candidates),
                };
                selected.map(|(tag, _)| tag.to_string()).ok_or_else(not_cached)?
            }
        };

        self.cache
            .get(&CacheKey::for_reference(reference, &version))
            .ok_or_else(not_cached)
    }

    async fn permit(&self, ctx: &Context) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(limit) = &self.fetch_limit else {
            return Ok(None);
        };
        let limit = Arc::clone(limit);
        ctx.run(async move {
            limit
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| RepoError::Cancelled)
        })
        .await
    }

    async fn lock(&self, ctx: &Context, key: &CacheKey) -> Result<Option<OwnedMutexGuard<()>>> {
        let Some(in_flight) = &self.in_flight else {
            return Ok(None);
        };
        let lock = in_flight.entry(key);
        ctx.run(async move { Ok(Some(lock.lock_owned().await)) }).await
    }
}
